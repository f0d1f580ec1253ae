//! Flat cache keys derived from relative paths
//!
//! Every derived artifact of a file is stored under the same key, so the
//! options cache, the transpile cache and the bundle builder agree on where
//! a file's entries live. Distinct paths served by one repository are assumed
//! not to collide after flattening.

use std::fmt;

/// Character substituted for path separators
pub const SEPARATOR_SUBSTITUTE: char = '_';

/// Flattened form of a relative path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Flatten `path` by replacing every separator
    pub fn from_path(path: &str) -> Self {
        Self(flatten(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace `/` and `\` with [`SEPARATOR_SUBSTITUTE`]
pub fn flatten(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '/' | '\\' => SEPARATOR_SUBSTITUTE,
            other => other,
        })
        .collect()
}
