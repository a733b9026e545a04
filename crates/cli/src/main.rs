//! Turnstile CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP gateway
//! - `config`  — Show, validate, or initialize configuration
//! - `ingest`  — Add a document to the knowledge index
//! - `usage`   — Print a user's quota snapshot
//! - `plan`    — Change a user's plan

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "turnstile",
    about = "Turnstile — admission, quota, and knowledge gateway for chat assistants",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.turnstile/config.toml)
    #[arg(short, long, global = true, env = "TURNSTILE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Split, embed, and index a document
    Ingest {
        /// Text or markdown file to ingest
        file: PathBuf,

        /// Source label shown in context headers (defaults to the file stem)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Show a user's plan and usage counters
    Usage {
        user: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Set a user's plan
    Plan {
        user: String,

        /// free, pro, or enterprise
        tier: String,

        /// Expire the plan after this many days
        #[arg(long)]
        days: Option<i64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force).await?,
        },
        Commands::Ingest { file, source } => {
            commands::ingest::run(config_path, &file, source).await?
        }
        Commands::Usage { user, json } => commands::usage::show(config_path, &user, json).await?,
        Commands::Plan { user, tier, days } => {
            commands::usage::set_plan(config_path, &user, &tier, days).await?
        }
    }

    Ok(())
}
