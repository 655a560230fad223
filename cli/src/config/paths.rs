//! Platform-specific path utilities for ghgate.

use std::path::PathBuf;

use crate::config::settings::env;
use crate::error::{GateError, Result};

/// Get the configuration directory for ghgate.
///
/// - Linux: `~/.config/ghgate`
/// - macOS: `~/Library/Application Support/ghgate`
/// - Windows: `%APPDATA%\ghgate`
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| GateError::Config("Cannot determine config directory".to_string()))?;
    Ok(base.join("ghgate"))
}

/// Get the main configuration file path.
///
/// `GHGATE_CONFIG` takes precedence over the platform default.
pub fn config_file() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(env::CONFIG_PATH) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(config_dir()?.join("config.toml"))
}
