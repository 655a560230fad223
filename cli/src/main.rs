//! ghgate command-line entry point.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ghgate::cli::{self, Cli, Commands, ConfigCommands, WhitelistCommands};
use ghgate::config::{self, settings::env};
use ghgate::Result;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(env::LOG_LEVEL).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let args = Cli::parse();

    // Run the command
    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => config::config_file(),
    }
}

async fn run(args: Cli) -> Result<i32> {
    if let Commands::Completions { shell } = args.command {
        cli::commands::handle_completions(shell);
        return Ok(0);
    }

    let config_path = resolve_config_path(args.config)?;

    match args.command {
        Commands::Login {
            no_browser,
            scopes,
            exec,
        } => {
            let config = config::load_config_from(&config_path)?;
            cli::commands::handle_login(
                &config,
                cli::commands::LoginOptions {
                    no_browser,
                    scopes,
                    exec,
                },
            )
            .await
        }
        Commands::Whitelist { command } => {
            match command {
                WhitelistCommands::Check { identities } => {
                    cli::commands::handle_whitelist_check(&config_path, &identities)?;
                }
                WhitelistCommands::Show => cli::commands::handle_whitelist_show(&config_path)?,
            }
            Ok(0)
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Path => cli::commands::handle_config_path(&config_path),
                ConfigCommands::Show => {
                    let config = config::load_config_from(&config_path)?;
                    cli::commands::handle_config_show(&config)?;
                }
                ConfigCommands::Init { force } => {
                    cli::commands::handle_config_init(&config_path, force)?;
                }
            }
            Ok(0)
        }
        Commands::Completions { .. } => Ok(0),
    }
}
