//! Main entry point for the repoctx ingestion worker

// Internal modules
mod bootstrap;
mod commands;
mod logging;
mod signal;

// Internal imports (std, crate)
use crate::commands::EnqueueArgs;
use std::path::PathBuf;

// External imports (alphabetized)
use anyhow::Context;
use clap::{Parser, Subcommand};
use repoctx_config::ApplicationConfig;
use repoctx_config::source::{ConfigurationLoader, file_source};

/// repoctx repository ingestion worker
///
/// Claims analysis jobs from the queue, fetches the referenced repository,
/// chunks and embeds its files, and stores the result per context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional configuration file path (TOML or YAML); environment variables override it
    #[arg(long, short = 'c', global = true)]
    config_file: Option<PathBuf>,

    /// Log directory path (defaults to OS-specific location)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool until SIGINT/SIGTERM (default)
    Run,
    /// Add one job to the queue
    Enqueue(EnqueueArgs),
    /// Apply pending database migrations
    Migrate,
    /// Print queue depth as JSON
    Depth,
    /// Print the repository ids a user owns contexts for, as JSON
    Scope {
        /// User id to resolve
        #[arg(long)]
        user: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ApplicationConfig> {
    let mut loader = ConfigurationLoader::new();
    if let Some(path) = path {
        loader = loader.add_source(file_source(path));
    }
    loader
        .load()
        .with_context(|| match path {
            Some(path) => format!("Invalid configuration in '{}'", path.display()),
            None => "Invalid configuration from environment".to_string(),
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize environment (load .env, etc.)
    repoctx_common::initialize_environment();

    let args = Args::parse();
    let config = load_config(args.config_file.as_ref())?;

    // Keep the guards alive for the whole process so buffered log lines are flushed
    let _log_guards = logging::init(&config.telemetry, args.log_dir)?;

    tracing::debug!(?config, "Configuration loaded");

    match args.command.unwrap_or(Command::Run) {
        Command::Run => commands::run(config).await,
        Command::Enqueue(enqueue) => commands::enqueue(&config, enqueue).await,
        Command::Migrate => commands::migrate(&config).await,
        Command::Depth => commands::depth(&config).await,
        Command::Scope { user } => commands::scope(&config, &user).await,
    }
}
