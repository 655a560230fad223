//! Authentication module for ghgate.
//!
//! Device-flow sign-in against GitHub (or GitHub Enterprise Server), whitelist
//! authorization of the resulting identity, and in-memory credential custody.

pub mod credentials;
pub mod device_flow;
pub mod lockout;
pub mod manager;
pub mod provider;
pub mod service;
pub mod tokens;
pub mod whitelist;

pub use credentials::{CleanupTrigger, CredentialHandle, SecureCredentialStore, ValidationResult};
pub use device_flow::DeviceFlowClient;
pub use manager::{AuthOutcome, AuthenticationManager, AuthenticationState};
pub use provider::ProviderEndpoints;
pub use service::{AuthService, Authenticator};
pub use tokens::{DeviceAuthorization, FailureReason, Identity};
pub use whitelist::{UserWhitelist, WhitelistMode, WhitelistPolicy};
