//! Reposerve - versioned file server for git repositories
//!
//! Serves a directory of repositories over a small REST-like protocol and
//! keeps a cache of artifacts derived from the served files consistent
//! with their sources.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod fsutil;
pub mod process;
pub mod relay;
pub mod repository;
pub mod server;
pub mod sync;
pub mod vcs;
pub mod write;

pub use error::{ReposerveError, ReposerveResult};
