//! Configuration for Questlog.
//!
//! TOML files are discovered in the user config directory and the working
//! directory, merged section by section, validated, and exposed through
//! accessors that apply defaults and floors.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadOptions, LoadedConfig, load_config, load_config_file,
    load_config_with_options, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::{
    AgentConfig, CoachConfig, KNOWN_SEARCH_PROVIDERS, LlmConfig, LoggingConfig, ModelConfig,
    ProviderConfig, QuestlogConfig, QuotaConfig, SearchConfig, SearchProviderConfig,
    StorageConfig, TierConfig, data_dir,
};
