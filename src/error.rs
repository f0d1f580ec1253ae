//! Error types for reposerve
//!
//! All modules use `ReposerveResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reposerve operations
pub type ReposerveResult<T> = Result<T, ReposerveError>;

/// All errors that can occur in reposerve
#[derive(Error, Debug)]
pub enum ReposerveError {
    // Request errors
    #[error("Writing conflict detected: {current_version}")]
    Conflict { current_version: String },

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("You are not allowed to access files outside the storage area: {0}")]
    PathEscape(String),

    #[error("Invalid path: {path}: {reason}")]
    PathInvalid { path: String, reason: String },

    #[error("Invalid {name}: {value}")]
    InvalidArgument { name: &'static str, value: String },

    #[error("Already exists: {0}")]
    AlreadyExists(PathBuf),

    // Backend errors
    #[error("Command failed: {command}\n{output}")]
    Backend { command: String, output: String },

    #[error("Failed to start command: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {secs}s: {command}")]
    CommandTimeout { command: String, secs: u64 },

    #[error("Archive creation failed: {0}")]
    Archive(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReposerveError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a backend error carrying the tool's diagnostic output
    pub fn backend(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Backend {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Whether the caller can fix the request and retry
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::NotFound(_)
                | Self::PathEscape(_)
                | Self::PathInvalid { .. }
                | Self::InvalidArgument { .. }
                | Self::AlreadyExists(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CommandFailed { command, .. } if command.starts_with("zip") => {
                Some("Install zip, or set vcs.zip_bin in the config file")
            }
            Self::CommandFailed { .. } => {
                Some("Is git installed and on PATH? See vcs.git_bin in the config file")
            }
            Self::CommandTimeout { .. } => Some("Raise vcs.command_timeout_secs or --command-timeout"),
            Self::ConfigInvalid { .. } => Some("Run: reposerve config init --force"),
            _ => None,
        }
    }
}
