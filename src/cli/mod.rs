//! Command-line interface

pub mod args;
pub mod commands;

pub use args::{BackendKind, Cli, Commands, ConfigAction, ConfigArgs, ServeArgs};
