//! ctxloom CLI: the main entry point.
//!
//! Commands:
//! - `inspect`: show what a persisted transcript turns into for a model call
//! - `config`: print, locate, or validate the engine configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ctxloom",
    about = "ctxloom: conversation context building and citation reconciliation",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of ~/.ctxloom/config.toml
    #[arg(long, global = true, env = "CTXLOOM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand, build, and reconcile a JSON-lines transcript
    Inspect {
        /// Transcript file, one stored message per line
        transcript: PathBuf,

        /// Model whose limits apply (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// Cap the context window at this many tokens
        #[arg(short, long)]
        budget: Option<usize>,

        /// Print every context message
        #[arg(long)]
        messages: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default configuration
    Default,
    /// Print the configuration file path
    Path,
    /// Check the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Inspect {
            transcript,
            model,
            budget,
            messages,
        } => {
            let options = commands::inspect::InspectOptions {
                model,
                budget,
                show_messages: messages,
            };
            commands::inspect::run(config_path, &transcript, &options).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Default => commands::config_cmd::default(),
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
    }

    Ok(())
}
