//! Reposerve - versioned file server for git repositories
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use reposerve::cli::{Cli, Commands};
use reposerve::config::{Config, ConfigManager};
use reposerve::error::ReposerveResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ReposerveResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Serve(args) => reposerve::cli::commands::serve(args, &config).await,
        Commands::Status => reposerve::cli::commands::status(&config).await,
        Commands::Config(args) => {
            reposerve::cli::commands::config(args, &config_manager, &config).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set
fn init_logging(verbose: u8, config: &Config) {
    let default = match verbose {
        0 => "reposerve=warn",
        1 => "reposerve=info",
        _ => "reposerve=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
