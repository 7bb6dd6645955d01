use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod catalog;
mod commands;
mod config;
mod sandbox;

use config::Config;

#[derive(Parser)]
#[command(name = "codebox")]
#[command(
    author,
    version,
    about = "Online code-execution sandbox - runs untrusted programs in disposable containers"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: codebox.toml in the current directory)
    #[arg(short, long, global = true, env = "CODEBOX_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program in a fresh sandbox container
    Run(commands::run::RunArgs),

    /// Build, activate and remove sandbox images
    Image {
        #[command(subcommand)]
        action: commands::image::ImageAction,
    },

    /// Register languages
    Lang {
        #[command(subcommand)]
        action: commands::lang::LangAction,
    },

    /// Show execution statistics
    Stats {
        /// Identity to show (default: global totals)
        identity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence
    let default_filter = if cli.verbose {
        "codebox=debug"
    } else {
        "codebox=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)?
        }
    };

    match cli.command {
        Commands::Run(args) => {
            commands::run::run(&config, args).await?;
        }
        Commands::Image { action } => {
            commands::image::run(&config, action).await?;
        }
        Commands::Lang { action } => {
            commands::lang::run(&config, action).await?;
        }
        Commands::Stats { identity } => {
            commands::stats::run(&config, identity).await?;
        }
    }

    Ok(())
}
