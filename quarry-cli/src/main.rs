//! Quarry CLI: run, resume and inspect research sessions.
//!
//! Every session is an append-only event log on disk; commands other than
//! `run` and `expand` read or continue an existing log by session id.

mod commands;
mod progress;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Quarry: multi-perspective research from the command line
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about, long_about = None)]
struct Cli {
    /// LLM model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Workspace directory (for `.quarry/config.toml`)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Event log directory
    #[arg(long, global = true)]
    event_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StrategyArg {
    /// Interviewer/expert conversations per perspective
    Storm,
    /// Think, search, observe, evaluate loops
    React,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ExportFormat {
    Json,
    Markdown,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default `.quarry/config.toml` in the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a new research session
    Run {
        /// The research question
        query: String,
        /// Worker strategy (defaults to the configured one)
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Session timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Run a gap-filling search after analysis
        #[arg(long)]
        fill_gaps: bool,
    },
    /// Continue a cancelled or interrupted session
    Resume {
        /// Session id
        id: String,
    },
    /// Start a follow-up session that builds on an earlier one
    Expand {
        /// Parent session id
        id: String,
        /// The follow-up question
        query: String,
    },
    /// List recorded sessions
    List,
    /// Show a session's state and report
    Show {
        /// Session id
        id: String,
        /// Print the raw event log instead
        #[arg(long)]
        events: bool,
    },
    /// Export a session to a file
    Export {
        /// Session id
        id: String,
        /// Output format
        #[arg(short, long, value_enum, default_value = "markdown")]
        format: ExportFormat,
        /// Output directory (defaults to the configured export directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        );

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "quarry", "quarry")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from(".quarry").join("logs"));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "quarry.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = quarry_core::config::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(dir) = &cli.event_dir {
        config.store.event_dir = Some(dir.clone());
    }

    commands::handle_command(cli.command, config, &workspace, cli.quiet).await
}
