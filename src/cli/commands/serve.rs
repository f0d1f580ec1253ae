//! Serve command - run the HTTP server

use crate::cache::{Archiver, ZipArchiver};
use crate::cli::args::{BackendKind, ServeArgs};
use crate::config::Config;
use crate::error::{ReposerveError, ReposerveResult};
use crate::process::CommandRunner;
use crate::server::{self, AppState};
use crate::vcs::{Author, GitBackend, MemoryVcs, VersionControl};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> ReposerveResult<()> {
    let config = apply_overrides(config.clone(), &args);

    let root = &config.server.root_dir;
    if !root.is_dir() {
        return Err(ReposerveError::NotFound(root.clone()));
    }

    let runner = CommandRunner::new(Duration::from_secs(config.vcs.command_timeout_secs));
    let vcs = create_backend(args.backend, &config, runner.clone());
    let archiver: Arc<dyn Archiver> = Arc::new(ZipArchiver::new(config.vcs.zip_bin.clone(), runner));
    if config.server.auto_commit {
        info!("Auto-commit enabled ({} backend)", vcs.backend_name());
    }

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ReposerveError::io(format!("binding {}", addr), e))?;

    server::serve(listener, AppState::new(&config, vcs, archiver)).await
}

/// Command-line flags win over the configuration file
pub fn apply_overrides(mut config: Config, args: &ServeArgs) -> Config {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(directory) = &args.directory {
        config.server.root_dir = directory.clone();
    }
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if args.auto_commit {
        config.server.auto_commit = true;
    }
    if let Some(secs) = args.command_timeout {
        config.vcs.command_timeout_secs = secs;
    }
    config
}

fn create_backend(kind: BackendKind, config: &Config, runner: CommandRunner) -> Arc<dyn VersionControl> {
    match kind {
        BackendKind::Git => {
            let author = Author {
                name: Some(config.vcs.default_author_name.clone()).filter(|s| !s.is_empty()),
                email: Some(config.vcs.default_author_email.clone()).filter(|s| !s.is_empty()),
            };
            Arc::new(
                GitBackend::new(config.vcs.git_bin.clone(), runner, config.vcs.remote.clone())
                    .with_default_author(author),
            )
        }
        BackendKind::Memory => {
            warn!("Using the in-memory backend: history is lost on exit");
            Arc::new(MemoryVcs::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn flags_override_config() {
        let args = ServeArgs {
            port: Some(9005),
            directory: Some(PathBuf::from("/srv")),
            auto_commit: true,
            command_timeout: Some(5),
            ..Default::default()
        };
        let config = apply_overrides(Config::default(), &args);

        assert_eq!(config.server.port, 9005);
        assert_eq!(config.server.root_dir, PathBuf::from("/srv"));
        assert!(config.server.auto_commit);
        assert_eq!(config.vcs.command_timeout_secs, 5);
        assert_eq!(config.server.bind, "127.0.0.1");
    }

    #[test]
    fn absent_flags_keep_config() {
        let mut config = Config::default();
        config.server.auto_commit = true;
        let config = apply_overrides(config, &ServeArgs::default());
        assert!(config.server.auto_commit);
        assert_eq!(config.server.port, 8080);
    }
}
