//! Token, device-authorization, and identity types for authentication.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use oauth2::devicecode::DeviceCodeErrorResponseType;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::GateError;

/// Device/user code pair returned by the device authorization endpoint.
///
/// Immutable once created and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    /// Opaque code used to poll the token endpoint.
    pub device_code: String,
    /// Code the user types at the verification page.
    pub user_code: String,
    /// Page where the user enters the code.
    pub verification_uri: String,
    /// Page with the code pre-filled (if the provider sent one).
    pub verification_uri_complete: Option<String>,
    /// When the device code stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Minimum delay between token polls.
    pub poll_interval: Duration,
}

impl DeviceAuthorization {
    /// Returns `true` once the device code has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time left before expiry, zero if already expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// The best URL to open in a browser.
    #[must_use]
    pub fn browser_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

impl fmt::Debug for DeviceAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAuthorization")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_at", &self.expires_at)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Device-flow error codes, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    /// `authorization_pending`: user has not finished yet.
    Pending,
    /// `slow_down`: poll less often.
    SlowDown,
    /// `expired_token`: device code expired.
    Expired,
    /// `access_denied`: user declined.
    AccessDenied,
    /// Anything else, including responses missing required fields.
    Malformed,
}

impl ProtocolErrorKind {
    /// Terminal kinds end the poll loop; the rest are retry signals.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::SlowDown)
    }
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "authorization_pending"),
            Self::SlowDown => write!(f, "slow_down"),
            Self::Expired => write!(f, "expired_token"),
            Self::AccessDenied => write!(f, "access_denied"),
            Self::Malformed => write!(f, "malformed"),
        }
    }
}

impl From<&DeviceCodeErrorResponseType> for ProtocolErrorKind {
    fn from(code: &DeviceCodeErrorResponseType) -> Self {
        match code {
            DeviceCodeErrorResponseType::AuthorizationPending => Self::Pending,
            DeviceCodeErrorResponseType::SlowDown => Self::SlowDown,
            DeviceCodeErrorResponseType::ExpiredToken => Self::Expired,
            DeviceCodeErrorResponseType::AccessDenied => Self::AccessDenied,
            DeviceCodeErrorResponseType::Basic(_) => Self::Malformed,
        }
    }
}

/// An access token held only in zeroize-on-drop memory.
///
/// Deliberately not `Clone`; `Debug` never prints the value.
pub struct SecretToken(Zeroizing<String>);

impl SecretToken {
    #[must_use]
    pub fn new(value: Zeroizing<String>) -> Self {
        Self(value)
    }

    /// Borrows the token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretToken {
    fn from(value: &str) -> Self {
        Self(Zeroizing::new(value.to_string()))
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// Successful token-endpoint response.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: SecretToken,
    pub token_type: String,
    pub scopes: Vec<String>,
}

/// Outcome of one token poll.
#[derive(Debug)]
pub enum TokenResult {
    Success(TokenGrant),
    ProtocolError {
        kind: ProtocolErrorKind,
        description: String,
    },
}

impl TokenResult {
    pub(crate) fn malformed(description: impl Into<String>) -> Self {
        Self::ProtocolError {
            kind: ProtocolErrorKind::Malformed,
            description: description.into(),
        }
    }
}

/// The authenticated account, as reported by the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Account name; this is what the whitelist evaluates.
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.login)
    }
}

/// Why an authentication attempt did not produce a stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Terminal device-flow error (`expired_token`, `access_denied`, malformed).
    Protocol {
        error: ProtocolErrorKind,
        description: String,
    },
    /// The token did not pass the identity check.
    InvalidToken,
    /// The identity is not permitted by the whitelist.
    NotAuthorized,
    /// Transport failure; the same device code may be retried.
    Network { message: String },
    /// The poll loop ran out of time.
    Timeout,
    /// The caller cancelled the attempt.
    Cancelled,
    /// A newer attempt or a sign-out replaced this one.
    Superseded,
    /// The device code does not belong to the pending attempt.
    NoPendingAuthorization,
    /// Missing or invalid configuration (e.g. no client id).
    Configuration { message: String },
    /// The credential store rejected the token.
    Storage { message: String },
}

impl FailureReason {
    /// Terminal failures end the pending attempt.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Protocol { error, .. } => error.is_terminal(),
            Self::Network { .. } => false,
            _ => true,
        }
    }

    /// Whether this failure increments the lockout counter.
    #[must_use]
    pub const fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::InvalidToken | Self::Network { .. } | Self::Timeout
        )
    }

    /// Classifies an error raised while polling or validating.
    #[must_use]
    pub fn from_error(err: &GateError) -> Self {
        match err {
            GateError::Protocol { kind, description } => Self::Protocol {
                error: *kind,
                description: description.clone(),
            },
            GateError::InvalidToken => Self::InvalidToken,
            GateError::NotAuthorized => Self::NotAuthorized,
            GateError::PollTimeout { .. } => Self::Timeout,
            GateError::Cancelled => Self::Cancelled,
            GateError::Config(message) => Self::Configuration {
                message: message.clone(),
            },
            other => Self::Network {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol { error, description } if description.is_empty() => {
                write!(f, "authorization failed: {error}")
            }
            Self::Protocol { error, description } => {
                write!(f, "authorization failed: {error} ({description})")
            }
            Self::InvalidToken => write!(f, "token validation failed"),
            Self::NotAuthorized => write!(f, "not authorized"),
            Self::Network { message } => write!(f, "network error: {message}"),
            Self::Timeout => write!(f, "timed out waiting for authorization"),
            Self::Cancelled => write!(f, "authentication cancelled"),
            Self::Superseded => write!(f, "superseded by a newer attempt"),
            Self::NoPendingAuthorization => write!(f, "no matching pending authorization"),
            Self::Configuration { message } => write!(f, "configuration error: {message}"),
            Self::Storage { message } => write!(f, "credential storage failed: {message}"),
        }
    }
}

/// Result of [`Authenticator::complete_authentication`](crate::auth::Authenticator).
#[derive(Debug)]
pub struct AuthResult {
    pub success: bool,
    pub identity: Option<Identity>,
    pub scopes: Vec<String>,
    /// Present only on success; handed to the credential store and then dropped.
    pub token: Option<SecretToken>,
    pub error: Option<FailureReason>,
}

impl AuthResult {
    #[must_use]
    pub fn succeeded(identity: Identity, grant: TokenGrant) -> Self {
        Self {
            success: true,
            identity: Some(identity),
            scopes: grant.scopes,
            token: Some(grant.access_token),
            error: None,
        }
    }

    #[must_use]
    pub const fn failed(reason: FailureReason) -> Self {
        Self {
            success: false,
            identity: None,
            scopes: Vec::new(),
            token: None,
            error: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_token_debug_is_redacted() {
        let token = SecretToken::from("ghp_supersecretvalue");
        let out = format!("{token:?}");
        assert!(!out.contains("supersecret"));
        assert_eq!(token.expose(), "ghp_supersecretvalue");
    }

    #[test]
    fn device_authorization_debug_hides_device_code() {
        let auth = DeviceAuthorization {
            device_code: "3584d83530557fdd1f46af8289938c8ef79f9dc5".to_string(),
            user_code: "WDJB-MJHT".to_string(),
            verification_uri: "https://github.com/login/device".to_string(),
            verification_uri_complete: None,
            expires_at: Utc::now() + chrono::Duration::minutes(15),
            poll_interval: Duration::from_secs(5),
        };
        let out = format!("{auth:?}");
        assert!(!out.contains("3584d835"));
        assert!(out.contains("WDJB-MJHT"));
        assert!(!auth.is_expired());
        assert_eq!(auth.browser_url(), "https://github.com/login/device");
    }

    #[test]
    fn provider_error_codes_map_to_kinds() {
        let cases = [
            ("authorization_pending", ProtocolErrorKind::Pending),
            ("slow_down", ProtocolErrorKind::SlowDown),
            ("expired_token", ProtocolErrorKind::Expired),
            ("access_denied", ProtocolErrorKind::AccessDenied),
            ("unsupported_grant_type", ProtocolErrorKind::Malformed),
            ("incorrect_device_code", ProtocolErrorKind::Malformed),
        ];
        for (wire, expected) in cases {
            let code: DeviceCodeErrorResponseType =
                serde_json::from_value(serde_json::Value::String(wire.to_string())).unwrap();
            assert_eq!(ProtocolErrorKind::from(&code), expected, "{wire}");
        }
    }

    #[test]
    fn only_pending_and_slow_down_are_retry_signals() {
        assert!(!ProtocolErrorKind::Pending.is_terminal());
        assert!(!ProtocolErrorKind::SlowDown.is_terminal());
        assert!(ProtocolErrorKind::Expired.is_terminal());
        assert!(ProtocolErrorKind::AccessDenied.is_terminal());
        assert!(ProtocolErrorKind::Malformed.is_terminal());
    }

    #[test]
    fn failure_classification() {
        let denied = FailureReason::from_error(&GateError::Protocol {
            kind: ProtocolErrorKind::AccessDenied,
            description: String::new(),
        });
        assert!(denied.is_terminal());
        assert!(denied.counts_as_failure());

        let network = FailureReason::from_error(&GateError::Network("reset".to_string()));
        assert!(!network.is_terminal());
        assert!(network.counts_as_failure());

        let cancelled = FailureReason::from_error(&GateError::Cancelled);
        assert!(cancelled.is_terminal());
        assert!(!cancelled.counts_as_failure());

        assert!(!FailureReason::NotAuthorized.counts_as_failure());
        assert_eq!(FailureReason::NotAuthorized.to_string(), "not authorized");
    }
}
