//! Error types and result aliases for ghgate.
//!
//! This module provides the error taxonomy shared by every component:
//! - Transport and protocol failures raised by the device flow client
//! - Authentication outcomes that callers may want to surface (lockout, denial)
//! - Lifecycle and programming errors (disposed manager, malformed configuration)
//! - Automatic conversion from common error types

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::tokens::ProtocolErrorKind;

/// Main error type for ghgate operations.
///
/// Each variant includes a user-friendly message with actionable recovery steps.
/// Use [`requires_reauth`](Self::requires_reauth) and [`is_retriable`](Self::is_retriable)
/// to determine appropriate error handling strategies.
#[derive(Error, Debug)]
pub enum GateError {
    /// Transport failure while talking to the provider.
    #[error("Network error: {0}. Check your internet connection.")]
    Network(String),

    /// A single HTTP request exceeded the client timeout.
    #[error("Request timed out. The server may be slow or unreachable. Try again later.")]
    Timeout,

    /// Provider returned a non-success status code without a protocol error body.
    #[error("Provider request failed ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Structured device-flow error returned by the provider.
    #[error("Device authorization failed ({kind}): {description}")]
    Protocol {
        /// Error code reported by the provider.
        kind: ProtocolErrorKind,
        /// Human-readable description (may be empty).
        description: String,
    },

    /// The token was issued but the identity endpoint rejected it.
    #[error("The issued token could not be validated. Run 'ghgate login' to try again.")]
    InvalidToken,

    /// Authenticated identity is not permitted by the whitelist policy.
    #[error("You are not authorized to use this tool.")]
    NotAuthorized,

    /// Too many failed attempts; new attempts are rejected until `until`.
    #[error("Too many failed authentication attempts. Try again after {until}.")]
    LockedOut {
        /// When the lockout expires.
        until: DateTime<Utc>,
    },

    /// The poll loop exhausted its wall-clock budget.
    #[error("Timed out waiting for authorization after {}s. Run 'ghgate login' again and complete authorization sooner.", elapsed.as_secs())]
    PollTimeout {
        /// Time spent polling before giving up.
        elapsed: Duration,
    },

    /// The operation was cancelled by the caller.
    #[error("Authentication was cancelled.")]
    Cancelled,

    /// Residual secret material was found after a clear.
    #[error("Security leak detected: {0}")]
    SecurityLeakDetected(String),

    /// The authentication manager has been disposed.
    #[error("The authentication manager has been disposed and can no longer be used.")]
    Disposed,

    /// No live credential exists for the given handle.
    #[error("Credential not found or already cleared.")]
    CredentialNotFound,

    /// An operation requiring an authenticated session was attempted without one.
    #[error("Not authenticated. Run 'ghgate login' to authenticate.")]
    NotAuthenticated,

    /// Caller supplied an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// General configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}. Check file permissions and format.")]
    ConfigRead(String),

    /// Failed to write configuration file.
    #[error("Failed to write configuration file: {0}. Check directory permissions.")]
    ConfigWrite(String),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON or TOML serialization/deserialization failed.
    #[error("Data serialization error: {0}. This may indicate corrupted data.")]
    Serialization(String),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GateError {
    /// Checks if this error can be resolved by running a fresh login.
    #[must_use]
    pub const fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::InvalidToken
                | Self::PollTimeout { .. }
                | Self::Protocol {
                    kind: ProtocolErrorKind::Expired | ProtocolErrorKind::AccessDenied,
                    ..
                }
        )
    }

    /// Checks if this error is transient and the operation might succeed on retry.
    ///
    /// Pending and slow-down protocol signals never reach callers, so no
    /// protocol error is considered retriable here.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// Result type alias using [`GateError`].
pub type Result<T> = std::result::Result<T, GateError>;

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {err}"))
    }
}

impl From<toml::de::Error> for GateError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigRead(format!("TOML parse error: {err}"))
    }
}

impl From<toml::ser::Error> for GateError {
    fn from(err: toml::ser::Error) -> Self {
        Self::ConfigWrite(format!("TOML serialize error: {err}"))
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            // Strip the URL so query strings never end up in messages.
            Self::Network(err.without_url().to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for GateError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => Self::Network(e.to_string()),
        }
    }
}
