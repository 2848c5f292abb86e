//! Questlog - gamified time tracker with a productivity agent
//!
//! Main entry point for the Questlog CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use questlog_agent::Mode;
use questlog_config::{LoadOptions, LoggingConfig, load_config_with_options};

mod commands;

use commands::{ask, config, entries, memory, quests, todo, tools};

/// Crates whose logs the default filter lets through.
const LOG_TARGETS: &[&str] = &[
    "questlog",
    "questlog_agent",
    "questlog_llm",
    "questlog_store",
    "questlog_config",
];

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Questlog - gamified time tracker with a productivity agent
#[derive(Parser)]
#[command(name = "questlog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Extra config file, loaded after the discovered ones
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// User id to act as
    #[arg(long, global = true, env = "QUESTLOG_USER", default_value_t = 1)]
    pub user: i64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a one-shot question about your data
    Ask(ask::AskArgs),

    /// Talk to the coach (keeps conversation history and memories)
    Coach(ask::AskArgs),

    /// Log productive minutes
    Log(entries::LogArgs),

    /// Spend fun minutes
    Spend(entries::SpendArgs),

    /// Long-term memory operations
    Memory(memory::MemoryArgs),

    /// Show active quests and their progress
    Quests,

    /// Daily task list operations
    Todo(todo::TodoArgs),

    /// Show the effective configuration and where it came from
    Config,

    /// Search the web through the configured providers
    Search(tools::SearchArgs),

    /// Write a JSON backup of your data
    Backup,
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let loaded = load_config_with_options(&LoadOptions {
        explicit: cli.config.clone(),
        ..LoadOptions::default()
    })
    .context("failed to load configuration")?;

    let _guard = init_tracing(&cli, &loaded.config.logging())?;
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        config: Arc::new(loaded.config.clone()),
        sources: loaded.sources.clone(),
        user_id: cli.user,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    let outcome = match cli.command {
        Commands::Ask(args) => return ask::run(args, Mode::Stateless, &ctx).await,
        Commands::Coach(args) => return ask::run(args, Mode::Coach, &ctx).await,
        Commands::Log(args) => entries::run_log(args, &ctx),
        Commands::Spend(args) => entries::run_spend(args, &ctx),
        Commands::Memory(args) => memory::run(args, &ctx).await,
        Commands::Quests => quests::run(&ctx),
        Commands::Todo(args) => todo::run(args, &ctx).await,
        Commands::Config => config::run(&ctx),
        Commands::Search(args) => tools::run_search(args, &ctx).await,
        Commands::Backup => tools::run_backup(&ctx).await,
    };
    outcome.map(|()| ExitCode::SUCCESS)
}

/// Console logs go to stderr so answers on stdout stay clean. The optional
/// file layer always writes JSON.
fn init_tracing(cli: &Cli, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let level = if cli.verbose {
        "debug"
    } else {
        logging.level.as_str()
    };
    let console_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_for(level)))
    };

    let console = if cli.json || logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(cli.verbose)
            .with_writer(std::io::stderr)
            .with_filter(console_filter())
            .boxed()
    };

    let (file, guard) = if logging.file {
        let dir = logging.log_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(&dir, "questlog.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(EnvFilter::new(filter_for("debug")));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

/// `level` for our crates, `warn` for everything else.
fn filter_for(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .chain(std::iter::once("warn".to_string()))
        .collect::<Vec<_>>()
        .join(",")
}
