//! Authentication lifecycle coordination.
//!
//! The [`AuthenticationManager`] owns the state machine, lockout counter and
//! current credential handle. It delegates the device flow to an
//! [`Authenticator`], authorization to the [`UserWhitelist`], storage to the
//! [`SecureCredentialStore`], and records everything with the
//! [`SecurityAuditor`].
//!
//! State transitions are serialized by an async mutex; the inner state sits
//! behind a short-lived synchronous lock. Events are collected while the lock
//! is held and emitted after it is released, so subscribers may call back
//! into read-only accessors.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::audit::SecurityAuditor;
use crate::auth::credentials::{
    CleanupTrigger, CredentialHandle, SecureCredentialStore, TriggerId, ValidationResult,
};
use crate::auth::device_flow::DeviceFlowClient;
use crate::auth::lockout::{FailureTracker, LockoutPolicy};
use crate::auth::provider::ProviderEndpoints;
use crate::auth::service::{AuthService, Authenticator};
use crate::auth::tokens::{AuthResult, DeviceAuthorization, FailureReason, Identity};
use crate::auth::whitelist::UserWhitelist;
use crate::client::build_http_client;
use crate::config::{GateConfig, SecuritySettings};
use crate::error::{GateError, Result};
use crate::events::{AuthEvent, SubscriptionId, Subscribers};

/// Lifecycle state of the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationState {
    #[default]
    NotAuthenticated,
    AwaitingUserAuthorization,
    Authenticated,
    /// The identity was rejected by the whitelist.
    Forbidden,
    SessionExpired,
    SignedOut,
}

impl AuthenticationState {
    /// Whether the manager may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use AuthenticationState::{
            Authenticated, AwaitingUserAuthorization, Forbidden, NotAuthenticated, SessionExpired,
            SignedOut,
        };
        matches!(
            (self, next),
            (_, SignedOut | AwaitingUserAuthorization)
                | (
                    AwaitingUserAuthorization,
                    Authenticated | Forbidden | NotAuthenticated
                )
                | (Authenticated, SessionExpired)
                | (Forbidden | SessionExpired | SignedOut, NotAuthenticated)
        )
    }
}

impl fmt::Display for AuthenticationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::AwaitingUserAuthorization => write!(f, "awaiting user authorization"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::SessionExpired => write!(f, "session expired"),
            Self::SignedOut => write!(f, "signed out"),
        }
    }
}

/// Result of [`AuthenticationManager::complete_authentication`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    /// State after the attempt was committed.
    pub state: AuthenticationState,
    pub identity: Option<Identity>,
    pub failure: Option<FailureReason>,
}

struct PendingAttempt {
    device_code: Zeroizing<String>,
    generation: u64,
    cancel: CancellationToken,
    poll_interval: Duration,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct ManagerState {
    state: AuthenticationState,
    failures: FailureTracker,
    current_handle: Option<CredentialHandle>,
    identity: Option<Identity>,
    last_authentication_time: Option<DateTime<Utc>>,
    pending: Option<PendingAttempt>,
    generation: u64,
    session_trigger: Option<TriggerId>,
}

impl ManagerState {
    fn transition(&mut self, next: AuthenticationState, events: &mut Vec<AuthEvent>) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "unexpected state transition");
        }
        let old_state = std::mem::replace(&mut self.state, next);
        events.push(AuthEvent::StateChanged {
            old_state,
            new_state: next,
        });
    }

    fn take_session(&mut self) -> (Option<CredentialHandle>, Option<TriggerId>) {
        self.identity = None;
        self.last_authentication_time = None;
        (self.current_handle.take(), self.session_trigger.take())
    }
}

#[derive(Default)]
struct Forwarders {
    security: Option<SubscriptionId>,
    critical: Option<SubscriptionId>,
    cleanup: Option<SubscriptionId>,
}

/// Coordinates authentication, authorization and credential lifetime.
pub struct AuthenticationManager {
    authenticator: Arc<dyn Authenticator>,
    whitelist: Arc<UserWhitelist>,
    store: SecureCredentialStore,
    auditor: Arc<SecurityAuditor>,
    settings: SecuritySettings,
    lockout: LockoutPolicy,
    transitions: tokio::sync::Mutex<()>,
    inner: Mutex<ManagerState>,
    events: Arc<Subscribers<AuthEvent>>,
    forwarders: Mutex<Forwarders>,
    exit_triggers: Vec<TriggerId>,
    disposed: AtomicBool,
}

impl AuthenticationManager {
    /// Wires a manager from its collaborators and registers process-exit cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit cleanup triggers cannot be registered.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        whitelist: Arc<UserWhitelist>,
        store: SecureCredentialStore,
        auditor: Arc<SecurityAuditor>,
        settings: SecuritySettings,
    ) -> Result<Self> {
        let exit_triggers = vec![
            store.register_cleanup_trigger(CleanupTrigger::OnProcessExit)?,
            store.register_cleanup_trigger(CleanupTrigger::OnAbnormalExit)?,
        ];

        let events: Arc<Subscribers<AuthEvent>> = Arc::new(Subscribers::new());
        let forwarders = Forwarders {
            security: Some(auditor.security_events().subscribe({
                let events = Arc::clone(&events);
                move |event| events.emit(&AuthEvent::Security(event.clone()))
            })),
            critical: Some(auditor.critical_events().subscribe({
                let events = Arc::clone(&events);
                move |event| events.emit(&AuthEvent::CriticalSecurity(event.clone()))
            })),
            cleanup: Some(store.cleanup_events().subscribe({
                let events = Arc::clone(&events);
                move |event| events.emit(&AuthEvent::CleanupCompleted(event.clone()))
            })),
        };

        Ok(Self {
            authenticator,
            whitelist,
            store,
            auditor,
            lockout: LockoutPolicy::from(&settings),
            settings,
            transitions: tokio::sync::Mutex::new(()),
            inner: Mutex::new(ManagerState::default()),
            events,
            forwarders: Mutex::new(forwarders),
            exit_triggers,
            disposed: AtomicBool::new(false),
        })
    }

    /// Builds the full production stack from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or provider endpoints cannot be built.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let http = build_http_client(&config.http)?;
        let endpoints = ProviderEndpoints::from_config(&config.auth)?;
        let client = DeviceFlowClient::new(http, endpoints).with_settings(&config.security);
        let service = AuthService::new(
            client,
            config.auth.client_id.as_deref(),
            &config.auth.scopes,
        );

        let auditor = Arc::new(SecurityAuditor::new(&config.audit));
        let store = SecureCredentialStore::new(Arc::clone(&auditor));
        let whitelist = Arc::new(UserWhitelist::from_config(&config.whitelist));

        Self::new(
            Arc::new(service),
            whitelist,
            store,
            auditor,
            config.security.clone(),
        )
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(GateError::Disposed)
        } else {
            Ok(())
        }
    }

    fn emit_all(&self, events: Vec<AuthEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    /// Starts a device authorization using the configured scopes.
    ///
    /// # Errors
    ///
    /// See [`start_authentication_with_scopes`](Self::start_authentication_with_scopes).
    pub async fn start_authentication(&self) -> Result<DeviceAuthorization> {
        self.start_authentication_with_scopes(None).await
    }

    /// Starts a device authorization.
    ///
    /// Any pending attempt is superseded. Starting while authenticated clears
    /// the current credential first.
    ///
    /// # Errors
    ///
    /// - [`GateError::LockedOut`] while the failure threshold is in effect
    /// - [`GateError::Disposed`] after [`dispose`](Self::dispose)
    /// - Configuration and transport errors from the authenticator
    pub async fn start_authentication_with_scopes(
        &self,
        scopes: Option<Vec<String>>,
    ) -> Result<DeviceAuthorization> {
        self.ensure_active()?;
        let _serial = self.transitions.lock().await;

        if let Some(until) = self.lockout_expiration_time() {
            self.auditor.warning(
                "auth.start",
                &format!("authentication attempt rejected; locked out until {until}"),
            );
            return Err(GateError::LockedOut { until });
        }

        let authorization = match self.authenticator.start_authentication(scopes).await {
            Ok(authorization) => authorization,
            Err(err) => {
                self.auditor
                    .exception("auth.start", &err, matches!(err, GateError::Config(_)));
                return Err(err);
            }
        };
        self.ensure_active()?;

        let mut events = Vec::new();
        let (previous_handle, previous_trigger) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            if let Some(superseded) = inner.pending.take() {
                superseded.cancel.cancel();
            }
            let previous = if inner.state == AuthenticationState::Authenticated {
                inner.take_session()
            } else {
                (None, None)
            };
            inner.pending = Some(PendingAttempt {
                device_code: Zeroizing::new(authorization.device_code.clone()),
                generation: inner.generation,
                cancel: CancellationToken::new(),
                poll_interval: authorization.poll_interval,
                expires_at: authorization.expires_at,
            });
            inner.transition(AuthenticationState::AwaitingUserAuthorization, &mut events);
            previous
        };

        if let Some(handle) = previous_handle {
            self.store.clear(handle);
            self.authenticator.sign_out();
        }
        if let Some(trigger) = previous_trigger {
            self.store.unregister_cleanup_trigger(trigger);
        }

        self.auditor.info(
            "auth.start",
            &format!(
                "device authorization started; user code {} at {}",
                authorization.user_code, authorization.verification_uri
            ),
        );
        self.emit_all(events);
        Ok(authorization)
    }

    /// Polls for the token of the pending attempt and commits the outcome.
    ///
    /// Expected failures (denial, timeout, whitelist rejection, cancellation)
    /// are reported in the returned [`AuthOutcome`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Disposed`] if the manager was disposed.
    pub async fn complete_authentication(&self, device_code: &str) -> Result<AuthOutcome> {
        self.ensure_active()?;

        let attempt = {
            let inner = self.inner.lock();
            inner
                .pending
                .as_ref()
                .filter(|pending| pending.device_code.as_str() == device_code)
                .map(|pending| {
                    (
                        pending.generation,
                        pending.cancel.clone(),
                        pending.poll_interval,
                        pending.expires_at,
                    )
                })
        };
        let Some((generation, cancel, interval, expires_at)) = attempt else {
            return Ok(self.failure_outcome(FailureReason::NoPendingAuthorization));
        };

        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let budget = self.settings.poll_timeout().min(remaining);

        let result = self
            .authenticator
            .complete_authentication(device_code, interval, budget, cancel)
            .await;

        let _serial = self.transitions.lock().await;
        self.ensure_active()?;
        Ok(self.commit(generation, result))
    }

    fn failure_outcome(&self, reason: FailureReason) -> AuthOutcome {
        AuthOutcome {
            success: false,
            state: self.state(),
            identity: None,
            failure: Some(reason),
        }
    }

    fn commit(&self, generation: u64, result: AuthResult) -> AuthOutcome {
        let current = {
            let inner = self.inner.lock();
            inner.pending.is_some() && inner.generation == generation
        };
        if !current {
            self.auditor
                .info("auth.complete", "completion discarded; attempt was superseded");
            return self.failure_outcome(FailureReason::Superseded);
        }

        if !result.success {
            let reason = result.error.unwrap_or(FailureReason::InvalidToken);
            return self.record_failure(reason);
        }

        let (Some(identity), Some(token)) = (result.identity, result.token) else {
            return self.record_failure(FailureReason::InvalidToken);
        };

        let allowed = match self.whitelist.is_allowed(&identity.login) {
            Ok(allowed) => allowed,
            Err(err) => {
                self.auditor.exception("auth.whitelist", &err, false);
                false
            }
        };
        if !allowed {
            drop(token);
            return self.deny(&identity);
        }

        let handle = match self.store.store(token.expose().as_bytes()) {
            Ok(handle) => handle,
            Err(err) => {
                self.auditor.exception("credential.store", &err, true);
                return self.record_failure(FailureReason::Storage {
                    message: err.to_string(),
                });
            }
        };
        drop(token);

        let session_trigger = match self
            .store
            .register_cleanup_trigger(CleanupTrigger::OnTimeout(self.settings.session_timeout()))
        {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(error = %err, "session cleanup timer not started");
                None
            }
        };

        let mut events = Vec::new();
        let (previous_handle, previous_trigger) = {
            let mut inner = self.inner.lock();
            let previous = inner.take_session();
            inner.current_handle = Some(handle);
            inner.session_trigger = session_trigger;
            inner.identity = Some(identity.clone());
            inner.last_authentication_time = Some(Utc::now());
            inner.failures.reset();
            inner.pending = None;
            inner.transition(AuthenticationState::Authenticated, &mut events);
            previous
        };

        if let Some(previous) = previous_handle {
            self.store.clear(previous);
        }
        if let Some(trigger) = previous_trigger {
            self.store.unregister_cleanup_trigger(trigger);
        }

        self.auditor.info(
            "auth.complete",
            &format!(
                "user {} authenticated with scopes [{}]",
                identity.login,
                result.scopes.join(", ")
            ),
        );
        self.emit_all(events);

        AuthOutcome {
            success: true,
            state: AuthenticationState::Authenticated,
            identity: Some(identity),
            failure: None,
        }
    }

    fn deny(&self, identity: &Identity) -> AuthOutcome {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.pending = None;
            inner.transition(AuthenticationState::Forbidden, &mut events);
        }
        self.authenticator.sign_out();

        self.auditor.warning(
            "auth.whitelist",
            &format!("user {} is not authorized by the whitelist policy", identity.login),
        );
        self.emit_all(events);

        AuthOutcome {
            success: false,
            state: AuthenticationState::Forbidden,
            identity: None,
            failure: Some(FailureReason::NotAuthorized),
        }
    }

    fn record_failure(&self, reason: FailureReason) -> AuthOutcome {
        let mut events = Vec::new();
        let state = {
            let mut inner = self.inner.lock();
            if reason.counts_as_failure() {
                let attempt_number = inner.failures.record_failure(Utc::now());
                events.push(AuthEvent::AuthenticationFailed {
                    reason: reason.clone(),
                    attempt_number,
                });
            }
            if reason.is_terminal() {
                inner.pending = None;
                inner.transition(AuthenticationState::NotAuthenticated, &mut events);
            }
            inner.state
        };

        if matches!(reason, FailureReason::Cancelled) {
            self.auditor.info("auth.complete", "authentication cancelled");
        } else {
            self.auditor.log(
                crate::audit::AuditLevel::Warning,
                "auth.complete",
                false,
                &format!("authentication failed: {reason}"),
                Some(&format!("failed_attempts={}", self.failed_attempts())),
            );
        }
        self.emit_all(events);

        AuthOutcome {
            success: false,
            state,
            identity: None,
            failure: Some(reason),
        }
    }

    /// Cancels the pending attempt. Returns `false` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Disposed`] after disposal.
    pub fn cancel_authentication(&self) -> Result<bool> {
        self.ensure_active()?;
        let inner = self.inner.lock();
        Ok(match &inner.pending {
            Some(pending) => {
                pending.cancel.cancel();
                true
            }
            None => false,
        })
    }

    /// Checks that the session is authenticated, unexpired and still backed
    /// by a live credential. An expired session transitions to `SessionExpired`
    /// and its credential is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Disposed`] after disposal.
    pub async fn validate_authentication(&self) -> Result<bool> {
        self.ensure_active()?;
        let _serial = self.transitions.lock().await;

        let session_timeout = chrono::Duration::from_std(self.settings.session_timeout())
            .unwrap_or(chrono::Duration::MAX);

        let mut events = Vec::new();
        let (handle, trigger) = {
            let mut inner = self.inner.lock();
            if inner.state != AuthenticationState::Authenticated {
                return Ok(false);
            }
            let age_ok = inner
                .last_authentication_time
                .is_some_and(|at| Utc::now().signed_duration_since(at) <= session_timeout);
            let live = inner
                .current_handle
                .is_some_and(|handle| self.store.contains(handle));
            if age_ok && live {
                return Ok(true);
            }
            let session = inner.take_session();
            inner.transition(AuthenticationState::SessionExpired, &mut events);
            session
        };

        if let Some(handle) = handle {
            self.store.clear(handle);
        }
        if let Some(trigger) = trigger {
            self.store.unregister_cleanup_trigger(trigger);
        }
        self.authenticator.sign_out();
        self.auditor.info("auth.validate", "session expired");
        self.emit_all(events);
        Ok(false)
    }

    /// Signs out: cancels any pending attempt and clears every credential.
    /// Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Disposed`] after disposal.
    pub async fn sign_out(&self) -> Result<()> {
        self.ensure_active()?;
        let _serial = self.transitions.lock().await;

        let mut events = Vec::new();
        let (_, trigger) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            if let Some(pending) = inner.pending.take() {
                pending.cancel.cancel();
            }
            let session = inner.take_session();
            inner.transition(AuthenticationState::SignedOut, &mut events);
            session
        };

        self.authenticator.sign_out();
        let cleared = self.store.clear_all();
        if let Some(trigger) = trigger {
            self.store.unregister_cleanup_trigger(trigger);
        }

        self.auditor
            .info("auth.sign_out", &format!("signed out; {cleared} credential(s) cleared"));
        self.emit_all(events);
        Ok(())
    }

    /// Runs `f` with the current token after validating the session.
    ///
    /// The token copy is erased when `f` returns.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotAuthenticated`] without a valid session.
    pub async fn with_credential<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&str) -> R,
    {
        if !self.validate_authentication().await? {
            return Err(GateError::NotAuthenticated);
        }
        let handle = self
            .inner
            .lock()
            .current_handle
            .ok_or(GateError::NotAuthenticated)?;

        self.store.with_secret(handle, |bytes| {
            std::str::from_utf8(bytes)
                .map(f)
                .map_err(|_| GateError::InvalidToken)
        })?
    }

    /// Exports the current token into the process environment for a child
    /// process. The variable is removed when the credential is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NotAuthenticated`] without a valid session.
    pub async fn export_credential(&self, variable: &str) -> Result<()> {
        if !self.validate_authentication().await? {
            return Err(GateError::NotAuthenticated);
        }
        let handle = self
            .inner
            .lock()
            .current_handle
            .ok_or(GateError::NotAuthenticated)?;
        self.store.inject_env(handle, variable)
    }

    /// Scans for residual secret material.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Disposed`] after disposal.
    pub fn validate_no_leak(&self) -> Result<ValidationResult> {
        self.ensure_active()?;
        Ok(self.store.validate_no_leak())
    }

    pub fn is_locked_out(&self) -> bool {
        self.inner
            .lock()
            .failures
            .is_locked_out(Utc::now(), &self.lockout)
    }

    /// When the current lockout ends, or `None` if not locked out.
    pub fn lockout_expiration_time(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        self.inner
            .lock()
            .failures
            .lockout_expiration(&self.lockout)
            .filter(|until| now < *until)
    }

    pub fn state(&self) -> AuthenticationState {
        self.inner.lock().state
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.lock().identity.clone()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.inner.lock().failures.failed_attempts()
    }

    pub fn last_authentication_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_authentication_time
    }

    pub const fn store(&self) -> &SecureCredentialStore {
        &self.store
    }

    pub const fn auditor(&self) -> &Arc<SecurityAuditor> {
        &self.auditor
    }

    pub const fn whitelist(&self) -> &Arc<UserWhitelist> {
        &self.whitelist
    }

    /// Registers an event callback.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Disposed`] after [`dispose`](Self::dispose).
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        self.ensure_active()?;
        let id = self.events.subscribe(callback);
        // Lost a race with dispose; its clear may already have run.
        if self.disposed.load(Ordering::SeqCst) {
            self.events.unsubscribe(id);
            return Err(GateError::Disposed);
        }
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.len()
    }

    /// Releases everything: cancels pending work, clears credentials and
    /// drops subscriptions. Later operations fail with [`GateError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let trigger = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            if let Some(pending) = inner.pending.take() {
                pending.cancel.cancel();
            }
            inner.take_session().1
        };

        let forwarders = std::mem::take(&mut *self.forwarders.lock());
        if let Some(id) = forwarders.security {
            self.auditor.security_events().unsubscribe(id);
        }
        if let Some(id) = forwarders.critical {
            self.auditor.critical_events().unsubscribe(id);
        }
        if let Some(id) = forwarders.cleanup {
            self.store.cleanup_events().unsubscribe(id);
        }
        self.events.clear();

        self.authenticator.sign_out();
        let cleared = self.store.clear_all();
        for id in trigger.into_iter().chain(self.exit_triggers.iter().copied()) {
            self.store.unregister_cleanup_trigger(id);
        }

        self.auditor
            .info("auth.dispose", &format!("manager disposed; {cleared} credential(s) cleared"));
        self.auditor.flush();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for AuthenticationManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for AuthenticationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationManager")
            .field("state", &self.state())
            .field("failed_attempts", &self.failed_attempts())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
