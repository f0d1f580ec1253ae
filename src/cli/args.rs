//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Reposerve - versioned file server for git repositories
///
/// Serves every repository below a directory over HTTP, with optimistic
/// write conflicts and a cache of derived artifacts.
#[derive(Parser, Debug)]
#[command(name = "reposerve")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "REPOSERVE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),

    /// Check that external tools are available
    Status,

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Version-control backend to serve with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// The git command line
    #[default]
    Git,
    /// In-process history, lost on exit
    Memory,
}

/// Arguments for the serve command
#[derive(Parser, Debug, Default)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory whose subdirectories are served as repositories
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Commit every PUT
    #[arg(long)]
    pub auto_commit: bool,

    /// Timeout for git and zip invocations, in seconds
    #[arg(long)]
    pub command_timeout: Option<u64>,

    /// Version-control backend
    #[arg(long, value_enum, default_value_t = BackendKind::Git)]
    pub backend: BackendKind,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve_defaults() {
        let cli = Cli::parse_from(["reposerve", "serve"]);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, None);
                assert!(!args.auto_commit);
                assert_eq!(args.backend, BackendKind::Git);
            }
            _ => panic!("expected Serve command"),
        }
    }

    #[test]
    fn cli_parses_serve_flags() {
        let cli = Cli::parse_from([
            "reposerve",
            "serve",
            "-p",
            "9005",
            "-d",
            "/srv/repos",
            "--auto-commit",
            "--backend",
            "memory",
        ]);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, Some(9005));
                assert_eq!(args.directory, Some(PathBuf::from("/srv/repos")));
                assert!(args.auto_commit);
                assert_eq!(args.backend, BackendKind::Memory);
            }
            _ => panic!("expected Serve command"),
        }
    }

    #[test]
    fn cli_parses_status() {
        let cli = Cli::parse_from(["reposerve", "status"]);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn cli_parses_config_init_force() {
        let cli = Cli::parse_from(["reposerve", "config", "init", "--force"]);
        match cli.command {
            Commands::Config(args) => {
                assert!(matches!(args.action, Some(ConfigAction::Init { force: true })));
            }
            _ => panic!("expected Config command"),
        }
    }

    #[test]
    fn cli_verbose_count() {
        let cli = Cli::parse_from(["reposerve", "-vv", "status"]);
        assert_eq!(cli.verbose, 2);
    }
}
