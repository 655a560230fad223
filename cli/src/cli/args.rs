//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// GitHub device-flow gatekeeper.
///
/// Signs you in with the OAuth device flow, checks your account against the
/// configured whitelist, and hands a short-lived in-memory token to a command.
#[derive(Parser, Debug)]
#[command(name = "ghgate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Use this config file instead of the default location.
    #[arg(long, global = true, env = "GHGATE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate and optionally run a command with the token.
    ///
    /// The token lives only in this process. It is exported to the command
    /// through the configured environment variable and erased when the
    /// command exits.
    Login {
        /// Skip opening the browser automatically.
        #[arg(long)]
        no_browser: bool,

        /// Request this scope instead of the configured ones (repeatable).
        #[arg(short, long = "scope", value_name = "SCOPE")]
        scopes: Vec<String>,

        /// Command to run once authenticated.
        #[arg(last = true, value_name = "COMMAND")]
        exec: Vec<String>,
    },

    /// Inspect the whitelist policy.
    Whitelist {
        #[command(subcommand)]
        command: WhitelistCommands,
    },

    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: ShellType,
    },
}

/// Whitelist subcommands.
#[derive(Subcommand, Debug)]
pub enum WhitelistCommands {
    /// Check whether accounts would be allowed.
    Check {
        /// Account logins to evaluate.
        #[arg(required = true)]
        identities: Vec<String>,
    },

    /// Print the active policy.
    Show,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the config file location.
    Path,

    /// Print the effective configuration (after environment overrides).
    Show,

    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Supported shell types for completions.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ShellType {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
