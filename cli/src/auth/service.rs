//! Device-flow orchestration behind the [`Authenticator`] seam.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use oauth2::{ClientId, Scope};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::auth::device_flow::DeviceFlowClient;
use crate::auth::tokens::{AuthResult, DeviceAuthorization, FailureReason, Identity};
use crate::error::{GateError, Result};
use crate::events::Subscribers;

/// The authentication backend used by the manager.
///
/// Implementations run the device flow and validate the issued token. They
/// never store the token; it is returned in [`AuthResult::token`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Requests a new device authorization. `None` uses the configured scopes.
    async fn start_authentication(&self, scopes: Option<Vec<String>>) -> Result<DeviceAuthorization>;

    /// Polls for the token and validates it against the identity endpoint.
    async fn complete_authentication(
        &self,
        device_code: &str,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> AuthResult;

    /// Forgets the cached identity.
    fn sign_out(&self);

    fn is_authenticated(&self) -> bool;

    fn current_identity(&self) -> Option<Identity>;
}

/// Status notification emitted on sign-in and sign-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub authenticated: bool,
    pub login: Option<String>,
}

#[derive(Debug, Default)]
struct ServiceState {
    identity: Option<Identity>,
    scopes: Vec<String>,
}

/// [`Authenticator`] backed by the GitHub device flow.
pub struct AuthService {
    client: DeviceFlowClient,
    client_id: Option<ClientId>,
    default_scopes: Vec<Scope>,
    state: RwLock<ServiceState>,
    status: Subscribers<ServiceStatus>,
}

impl AuthService {
    /// Creates a service. A blank `client_id` is treated as missing and
    /// reported when authentication starts.
    #[must_use]
    pub fn new(client: DeviceFlowClient, client_id: Option<&str>, default_scopes: &[String]) -> Self {
        let client_id = client_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| ClientId::new(id.to_string()));

        Self {
            client,
            client_id,
            default_scopes: default_scopes.iter().cloned().map(Scope::new).collect(),
            state: RwLock::new(ServiceState::default()),
            status: Subscribers::new(),
        }
    }

    /// Subscribers notified on sign-in and sign-out.
    pub const fn status_changes(&self) -> &Subscribers<ServiceStatus> {
        &self.status
    }

    /// Scopes granted to the current session.
    pub fn granted_scopes(&self) -> Vec<String> {
        self.state.read().scopes.clone()
    }

    fn require_client_id(&self) -> Result<&ClientId> {
        self.client_id.as_ref().ok_or_else(|| {
            GateError::Config(
                "no OAuth client id configured; set auth.client_id or GHGATE_CLIENT_ID".to_string(),
            )
        })
    }
}

#[async_trait]
impl Authenticator for AuthService {
    async fn start_authentication(&self, scopes: Option<Vec<String>>) -> Result<DeviceAuthorization> {
        let client_id = self.require_client_id()?;
        let scopes: Vec<Scope> = match scopes {
            Some(requested) if !requested.is_empty() => {
                requested.into_iter().map(Scope::new).collect()
            }
            _ => self.default_scopes.clone(),
        };

        let authorization = self.client.request_device_code(client_id, &scopes).await?;
        tracing::debug!(
            user_code = %authorization.user_code,
            interval_secs = authorization.poll_interval.as_secs(),
            "device authorization issued"
        );
        Ok(authorization)
    }

    async fn complete_authentication(
        &self,
        device_code: &str,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> AuthResult {
        let client_id = match self.require_client_id() {
            Ok(id) => id,
            Err(err) => return AuthResult::failed(FailureReason::from_error(&err)),
        };

        let grant = match self
            .client
            .poll_for_token(client_id, device_code, interval, timeout, &cancel)
            .await
        {
            Ok(grant) => grant,
            Err(err) => return AuthResult::failed(FailureReason::from_error(&err)),
        };

        let identity = tokio::select! {
            () = cancel.cancelled() => return AuthResult::failed(FailureReason::Cancelled),
            identity = self.client.fetch_identity(&grant.access_token) => identity,
        };
        let identity = match identity {
            Ok(identity) => identity,
            Err(err) if err.is_retriable() => {
                return AuthResult::failed(FailureReason::from_error(&err));
            }
            Err(_) => return AuthResult::failed(FailureReason::InvalidToken),
        };

        {
            let mut state = self.state.write();
            state.identity = Some(identity.clone());
            state.scopes.clone_from(&grant.scopes);
        }
        self.status.emit(&ServiceStatus {
            authenticated: true,
            login: Some(identity.login.clone()),
        });

        AuthResult::succeeded(identity, grant)
    }

    fn sign_out(&self) {
        *self.state.write() = ServiceState::default();
        self.status.emit(&ServiceStatus {
            authenticated: false,
            login: None,
        });
    }

    fn is_authenticated(&self) -> bool {
        self.state.read().identity.is_some()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.state.read().identity.clone()
    }
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("client", &self.client)
            .field("has_client_id", &self.client_id.is_some())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
