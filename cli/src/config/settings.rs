//! Application configuration settings.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::whitelist::WhitelistMode;
use crate::error::{GateError, Result};

/// Smallest poll interval the device flow will honor.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Main configuration for ghgate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Provider and OAuth client settings.
    pub auth: AuthConfig,
    /// Lockout, session, and polling thresholds.
    pub security: SecuritySettings,
    /// User allow/block policy.
    pub whitelist: WhitelistConfig,
    /// Audit log retention.
    pub audit: AuditConfig,
    /// HTTP client settings.
    pub http: HttpConfig,
    /// How the credential is handed to the launched tool.
    pub launcher: LauncherConfig,
}

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// OAuth App client id. Device flow needs no secret.
    pub client_id: Option<String>,
    /// Scopes requested when none are given explicitly.
    pub scopes: Vec<String>,
    /// Provider web host (device and token endpoints).
    #[serde(with = "url_serde")]
    pub web_url: Url,
    /// Provider API host (identity endpoint).
    #[serde(with = "url_serde")]
    pub api_url: Url,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            scopes: vec!["read:user".to_string(), "user:email".to_string()],
            web_url: Url::parse("https://github.com").expect("valid default URL"),
            api_url: Url::parse("https://api.github.com").expect("valid default URL"),
        }
    }
}

/// Thresholds for lockout, session expiry, and the poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Failed completions before new attempts are locked out.
    pub max_failed_attempts: u32,
    /// How long a lockout lasts after the last failure.
    pub lockout_duration_secs: u64,
    /// Maximum age of an authenticated session.
    pub session_timeout_secs: u64,
    /// Wall-clock budget for one poll loop.
    pub poll_timeout_secs: u64,
    /// Upper bound for the poll interval after `slow_down` responses.
    pub max_poll_interval_secs: u64,
    /// Added to the poll interval on each `slow_down`.
    pub slow_down_increment_secs: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_duration_secs: 15 * 60,
            session_timeout_secs: 8 * 60 * 60,
            poll_timeout_secs: 15 * 60,
            max_poll_interval_secs: 60,
            slow_down_increment_secs: 5,
        }
    }
}

impl SecuritySettings {
    #[must_use]
    pub const fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }

    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    #[must_use]
    pub const fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.max_poll_interval_secs)
    }

    #[must_use]
    pub const fn slow_down_increment(&self) -> Duration {
        Duration::from_secs(self.slow_down_increment_secs)
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_max_failed_attempts(mut self, attempts: u32) -> Self {
        self.max_failed_attempts = attempts;
        self
    }

    /// Sets the lockout duration (whole seconds).
    #[must_use]
    pub const fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration_secs = duration.as_secs();
        self
    }

    /// Sets the session timeout (whole seconds).
    #[must_use]
    pub const fn with_session_timeout(mut self, duration: Duration) -> Self {
        self.session_timeout_secs = duration.as_secs();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_failed_attempts == 0 {
            return Err(GateError::Config(
                "security.max_failed_attempts must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("security.lockout_duration_secs", self.lockout_duration_secs),
            ("security.session_timeout_secs", self.session_timeout_secs),
            ("security.poll_timeout_secs", self.poll_timeout_secs),
        ] {
            if value == 0 {
                return Err(GateError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.max_poll_interval() < MIN_POLL_INTERVAL {
            return Err(GateError::Config(format!(
                "security.max_poll_interval_secs must be at least {}",
                MIN_POLL_INTERVAL.as_secs()
            )));
        }
        Ok(())
    }
}

/// Whitelist policy as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistConfig {
    pub mode: WhitelistMode,
    pub allowed: BTreeSet<String>,
    pub blocked: BTreeSet<String>,
    pub case_sensitive: bool,
}

/// Audit log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Entries kept in memory; oldest are dropped first.
    pub max_entries: usize,
    /// Entries older than this are dropped on flush.
    pub retention_hours: u64,
    /// Background flush period.
    pub flush_interval_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            retention_hours: 24,
            flush_interval_ms: 500,
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// User-Agent header; the provider API rejects requests without one.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("ghgate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Launcher hand-off configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Environment variable the launched tool reads its token from.
    pub token_env_var: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            token_env_var: "GH_TOKEN".to_string(),
        }
    }
}

/// Custom serde module for URL serialization.
mod url_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use url::Url;

    pub fn serialize<S>(url: &Url, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(url.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Url, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Url::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Environment variables that can override configuration.
pub mod env {
    pub const CONFIG_PATH: &str = "GHGATE_CONFIG";
    pub const CLIENT_ID: &str = "GHGATE_CLIENT_ID";
    pub const WEB_URL: &str = "GHGATE_WEB_URL";
    pub const API_URL: &str = "GHGATE_API_URL";
    pub const LOG_LEVEL: &str = "GHGATE_LOG";
}

impl GateConfig {
    /// Apply environment variable overrides to the configuration.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(client_id) = std::env::var(env::CLIENT_ID) {
            if !client_id.trim().is_empty() {
                self.auth.client_id = Some(client_id.trim().to_string());
            }
        }

        if let Ok(url) = std::env::var(env::WEB_URL) {
            if let Ok(parsed) = Url::parse(&url) {
                self.auth.web_url = parsed;
            }
        }

        if let Ok(url) = std::env::var(env::API_URL) {
            if let Ok(parsed) = Url::parse(&url) {
                self.auth.api_url = parsed;
            }
        }

        self
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.security.validate()?;

        if self.audit.max_entries == 0 {
            return Err(GateError::Config(
                "audit.max_entries must be greater than 0".to_string(),
            ));
        }
        if self.audit.flush_interval_ms == 0 {
            return Err(GateError::Config(
                "audit.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(GateError::Config(
                "http.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.launcher.token_env_var.trim().is_empty() || self.launcher.token_env_var.contains('=') {
            return Err(GateError::Config(
                "launcher.token_env_var must be a non-empty variable name".to_string(),
            ));
        }
        for (name, url) in [("auth.web_url", &self.auth.web_url), ("auth.api_url", &self.auth.api_url)] {
            if url.cannot_be_a_base() {
                return Err(GateError::Config(format!("{name} must be an absolute base URL")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.security.max_poll_interval(), Duration::from_secs(60));
        assert_eq!(config.launcher.token_env_var, "GH_TOKEN");
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut config = GateConfig::default();
        config.security.max_failed_attempts = 0;
        assert!(matches!(config.validate(), Err(GateError::Config(_))));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut config = GateConfig::default();
        config.security.session_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("session_timeout_secs"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: GateConfig = toml::from_str(
            r#"
            [whitelist]
            mode = "allow_list"
            allowed = ["alice", "bob"]

            [security]
            max_failed_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.whitelist.mode, WhitelistMode::AllowList);
        assert_eq!(config.whitelist.allowed.len(), 2);
        assert_eq!(config.security.max_failed_attempts, 3);
        assert_eq!(config.security.lockout_duration_secs, 900);
        assert_eq!(config.auth.web_url.as_str(), "https://github.com/");
    }

    #[test]
    fn builder_setters_update_thresholds() {
        let settings = SecuritySettings::default()
            .with_max_failed_attempts(3)
            .with_lockout_duration(Duration::from_secs(30))
            .with_session_timeout(Duration::from_secs(60));

        assert_eq!(settings.max_failed_attempts, 3);
        assert_eq!(settings.lockout_duration(), Duration::from_secs(30));
        assert_eq!(settings.session_timeout(), Duration::from_secs(60));
    }
}
