//! CLI module for ghgate.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, ConfigCommands, ShellType, WhitelistCommands};
