//! Configuration schema for reposerve
//!
//! Configuration is stored at `~/.config/reposerve/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Version control and external tool settings
    pub vcs: VcsConfig,

    /// Derived artifact cache layout
    pub cache: CacheConfig,

    /// Temp blob and webhook relay settings
    pub relay: RelayConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,

    /// Listen port
    pub port: u16,

    /// Directory whose subdirectories are served as repositories
    pub root_dir: PathBuf,

    /// Commit every PUT to version control
    pub auto_commit: bool,

    /// Largest accepted request body in MB
    pub max_body_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            root_dir: PathBuf::from("."),
            auto_commit: false,
            max_body_mb: 64,
        }
    }
}

/// Version control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    /// git executable
    pub git_bin: String,

    /// zip executable used for bundle archives
    pub zip_bin: String,

    /// Upper bound for every external command, in seconds
    pub command_timeout_secs: u64,

    /// Remote used by sync and checkout
    pub remote: String,

    /// Author name for commits whose request carries none
    pub default_author_name: String,

    /// Author email for commits whose request carries none
    pub default_author_email: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            git_bin: "git".to_string(),
            zip_bin: "zip".to_string(),
            command_timeout_secs: 60,
            remote: "origin".to_string(),
            default_author_name: "reposerve".to_string(),
            default_author_email: "reposerve@localhost".to_string(),
        }
    }
}

/// Derived artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding per-file metadata entries
    pub options_dir: String,

    /// Directory holding transpiled copies
    pub transpile_dir: String,

    /// Boot-file manifest at the repository root
    pub bootlist: String,

    /// Bundle archive at the repository root
    pub bundle_name: String,

    /// Suffix of the source map stored next to a transpiled copy
    pub transpile_map_suffix: String,

    /// Extensions whose derived entries are invalidated on write
    pub derivable_extensions: Vec<String>,

    /// Extensions treated as text when receiving a body
    pub text_extensions: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            options_dir: ".options".to_string(),
            transpile_dir: ".transpiled".to_string(),
            bootlist: ".bootfilelist".to_string(),
            bundle_name: ".bundle.zip".to_string(),
            transpile_map_suffix: ".json.map".to_string(),
            derivable_extensions: vec!["js".to_string()],
            text_extensions: ["txt", "md", "js", "html", "svg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Temp blobs expire this many seconds after their last write
    pub tmp_ttl_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { tmp_ttl_secs: 300 }
    }
}
