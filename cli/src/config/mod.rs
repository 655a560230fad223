//! Configuration management for ghgate.

pub mod paths;
pub mod settings;

pub use paths::config_file;
pub use settings::{
    AuditConfig, AuthConfig, GateConfig, HttpConfig, LauncherConfig, SecuritySettings,
    WhitelistConfig, MIN_POLL_INTERVAL,
};

use std::path::Path;

use crate::error::{GateError, Result};

/// Load configuration from a specific path.
///
/// If the file doesn't exist, returns default configuration. The result is
/// validated after environment overrides are applied.
pub fn load_config_from(path: &Path) -> Result<GateConfig> {
    let config = read_config_file(path)?.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Parse a config file without applying environment overrides.
pub fn read_config_file(path: &Path) -> Result<GateConfig> {
    if !path.exists() {
        return Ok(GateConfig::default());
    }

    let contents = std::fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|e| GateError::ConfigRead(e.to_string()))
}

/// Save configuration to a specific path.
pub fn save_config_to(config: &GateConfig, path: &Path) -> Result<()> {
    config.validate()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let contents =
        toml::to_string_pretty(config).map_err(|e| GateError::ConfigWrite(e.to_string()))?;
    std::fs::write(path, contents)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::auth::whitelist::WhitelistMode;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = read_config_file(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn save_then_load_preserves_policy() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = GateConfig::default();
        config.whitelist.mode = WhitelistMode::BlockList;
        config.whitelist.blocked.insert("mallory".to_string());
        config.security.max_failed_attempts = 2;

        save_config_to(&config, &path).unwrap();
        let loaded = read_config_file(&path).unwrap();

        assert_eq!(loaded.whitelist, config.whitelist);
        assert_eq!(loaded.security.max_failed_attempts, 2);
    }

    #[test]
    fn invalid_toml_is_a_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[security\nmax_failed_attempts = ").unwrap();

        let result = read_config_file(&path);
        assert!(matches!(result, Err(GateError::ConfigRead(_))));
    }

    #[test]
    fn invalid_values_fail_validation_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[security]\npoll_timeout_secs = 0\n").unwrap();

        let result = load_config_from(&path);
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn save_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = GateConfig::default();
        config.audit.max_entries = 0;

        let result = save_config_to(&config, &temp_dir.path().join("config.toml"));
        assert!(result.is_err());
    }
}
