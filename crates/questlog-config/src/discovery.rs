//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/questlog/config.toml` (or `$QUESTLOG_CONFIG_DIR/config.toml`)
//! 2. `./questlog.toml` (project-local)
//! 3. An explicit `--config <path>` file

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::types::{APP_NAME, QuestlogConfig};

const PROJECT_CONFIG_FILE: &str = "questlog.toml";

const USER_CONFIG_FILE: &str = "config.toml";

/// Environment variable to override the user config directory.
const CONFIG_DIR_ENV: &str = "QUESTLOG_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: QuestlogConfig,
    /// Sources that were checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Warnings generated during loading (unreadable layers, plaintext keys).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Options controlling discovery.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Directory searched for `questlog.toml`. Defaults to the working directory.
    pub project_dir: Option<PathBuf>,
    /// User config directory. Overrides `QUESTLOG_CONFIG_DIR` and the platform default.
    pub config_dir: Option<PathBuf>,
    /// A file loaded last. Unlike discovered layers, failing to read it is an error.
    pub explicit: Option<PathBuf>,
}

/// Load configuration with default discovery.
pub fn load_config() -> Result<LoadedConfig> {
    load_config_with_options(&LoadOptions::default())
}

/// Load configuration by discovering and merging every layer.
pub fn load_config_with_options(options: &LoadOptions) -> Result<LoadedConfig> {
    let mut config = QuestlogConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_path = match &options.config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = options
        .project_dir
        .as_ref()
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    if let Some(path) = &options.explicit {
        config.merge(load_config_file(path)?);
        sources.push(ConfigSource {
            path: path.clone(),
            loaded: true,
        });
    }

    config.validate()?;
    check_plaintext_keys(&config, &mut warnings);

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<QuestlogConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    QuestlogConfig::from_toml(&contents)
}

/// Path of the user config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory: `QUESTLOG_CONFIG_DIR`, then the platform default.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

fn load_layer(config: &mut QuestlogConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    let loaded = match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            true
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            false
        }
    };
    ConfigSource {
        path: path.to_path_buf(),
        loaded,
    }
}

fn check_plaintext_keys(config: &QuestlogConfig, warnings: &mut Vec<String>) {
    if let Some(llm) = &config.llm {
        for (name, provider) in &llm.providers {
            if provider.api_key.is_some() {
                warnings.push(format!(
                    "[llm.providers.{}] contains a plaintext API key. \
                     Consider using api_key_env instead.",
                    name
                ));
            }
        }
    }
    if let Some(search) = &config.search {
        for (name, provider) in &search.providers {
            if provider.api_key.is_some() {
                warnings.push(format!(
                    "[search.providers.{}] contains a plaintext API key. \
                     Consider using api_key_env instead.",
                    name
                ));
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn isolated(project: &TempDir, user: &TempDir) -> LoadOptions {
        LoadOptions {
            project_dir: Some(project.path().to_path_buf()),
            config_dir: Some(user.path().to_path_buf()),
            explicit: None,
        }
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/questlog.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(matches!(
            load_config_file(&path).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_no_files_gives_defaults() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let loaded = load_config_with_options(&isolated(&project, &user)).unwrap();
        assert!(loaded.config.llm.is_none());
        assert!(loaded.loaded_from().is_empty());
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn test_project_overrides_user() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(
            user.path().join("config.toml"),
            "[quota]\ndaily_limit = 10\n\n[coach]\nhistory_turns = 3\n",
        )
        .unwrap();
        fs::write(
            project.path().join("questlog.toml"),
            "[quota]\ndaily_limit = 2\n",
        )
        .unwrap();

        let loaded = load_config_with_options(&isolated(&project, &user)).unwrap();
        assert_eq!(loaded.config.quota().daily_limit, 2);
        assert_eq!(loaded.config.coach().history_turns, 3);
        assert_eq!(loaded.loaded_from().len(), 2);
    }

    #[test]
    fn test_explicit_file_wins_and_must_exist() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(
            project.path().join("questlog.toml"),
            "[agent]\nmax_steps = 3\n",
        )
        .unwrap();
        let explicit = user.path().join("override.toml");
        fs::write(&explicit, "[agent]\nmax_steps = 9\n").unwrap();

        let mut options = isolated(&project, &user);
        options.explicit = Some(explicit);
        let loaded = load_config_with_options(&options).unwrap();
        assert_eq!(loaded.config.agent().max_steps, 9);

        options.explicit = Some(user.path().join("missing.toml"));
        assert!(load_config_with_options(&options).is_err());
    }

    #[test]
    fn test_malformed_layer_warns_but_continues() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(project.path().join("questlog.toml"), "not valid {{{{").unwrap();

        let loaded = load_config_with_options(&isolated(&project, &user)).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("Failed to load"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(
            project.path().join("questlog.toml"),
            "[[llm.tiers]]\nname = \"free\"\nmodels = []\n",
        )
        .unwrap();
        let err = load_config_with_options(&isolated(&project, &user)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_plaintext_key_warning() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(
            project.path().join("questlog.toml"),
            r#"
[llm.providers.openrouter]
base_url = "https://openrouter.ai/api/v1"
api_key = "sk-or-secret"

[search.providers.brave]
api_key = "brave-secret"
"#,
        )
        .unwrap();

        let loaded = load_config_with_options(&isolated(&project, &user)).unwrap();
        assert_eq!(loaded.warnings.len(), 2);
        assert!(loaded.warnings[0].contains("[llm.providers.openrouter]"));
        assert!(loaded.warnings[1].contains("[search.providers.brave]"));
    }

    #[test]
    #[serial]
    fn test_config_dir_env_override() {
        let dir = TempDir::new().unwrap();
        unsafe { std::env::set_var(CONFIG_DIR_ENV, dir.path()) };
        assert_eq!(user_config_path(), Some(dir.path().join("config.toml")));
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };
        if let Some(p) = user_config_path() {
            assert!(p.ends_with("questlog/config.toml"));
        }
    }
}
