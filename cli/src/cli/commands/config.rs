//! Config and completion command handlers.

use std::path::Path;

use crate::cli::ShellType;
use crate::config::{self, GateConfig};
use crate::error::{GateError, Result};

/// Handle `ghgate config path`.
pub fn handle_config_path(config_path: &Path) {
    let status = if config_path.exists() { "" } else { " (not created)" };
    println!("{}{status}", config_path.display());
}

/// Handle `ghgate config show`.
pub fn handle_config_show(config: &GateConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Handle `ghgate config init`.
pub fn handle_config_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(GateError::Config(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }

    config::save_config_to(&GateConfig::default(), config_path)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

/// Handles the `ghgate completions <shell>` command.
pub fn handle_completions(shell: ShellType) {
    use clap::CommandFactory;
    use clap_complete::{generate, Shell};

    let mut cmd = crate::cli::Cli::command();
    let shell = match shell {
        ShellType::Bash => Shell::Bash,
        ShellType::Zsh => Shell::Zsh,
        ShellType::Fish => Shell::Fish,
        ShellType::PowerShell => Shell::PowerShell,
    };

    generate(shell, &mut cmd, "ghgate", &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_writes_loadable_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ghgate").join("config.toml");

        handle_config_init(&path, false).unwrap();

        let loaded = config::read_config_file(&path).unwrap();
        assert_eq!(loaded, GateConfig::default());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "# keep me\n").unwrap();

        assert!(matches!(
            handle_config_init(&path, false),
            Err(GateError::Config(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# keep me\n");

        handle_config_init(&path, true).unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), "# keep me\n");
    }
}
