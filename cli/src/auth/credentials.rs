//! In-memory secure credential storage.
//!
//! Secrets are held as byte buffers addressed by opaque handles and are never
//! written to disk. Clearing overwrites the buffer through an [`Eraser`] and
//! verifies the result; recently cleared handles remain listed (metadata only)
//! so that [`SecureCredentialStore::validate_no_leak`] can check for residue.
//!
//! Locking rules:
//! - The credential table lock is never held while calling the auditor,
//!   subscribers, or the process environment.
//! - A clear transitions a handle to cleared under the table lock, so two
//!   racing clears of the same handle scrub it exactly once.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::audit::SecurityAuditor;
use crate::error::{GateError, Result};
use crate::events::{CleanupCompleted, Subscribers};

/// Opaque reference to a stored secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CredentialHandle(Uuid);

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Metadata for one stored secret. Never contains the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecureCredential {
    pub handle: CredentialHandle,
    pub byte_length: usize,
    pub created_at: DateTime<Utc>,
    pub cleared: bool,
    pub cleared_at: Option<DateTime<Utc>>,
}

/// Which cleanup condition fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ProcessExit,
    AbnormalExit,
    Timeout,
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessExit => write!(f, "process_exit"),
            Self::AbnormalExit => write!(f, "abnormal_exit"),
            Self::Timeout => write!(f, "timeout"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A condition under which every live secret is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTrigger {
    /// Normal process termination.
    OnProcessExit,
    /// Panic or interrupt.
    OnAbnormalExit,
    /// Fires once after the given duration.
    OnTimeout(Duration),
    /// Fires on [`SecureCredentialStore::fire_manual`].
    OnManual,
}

impl CleanupTrigger {
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::OnProcessExit => TriggerKind::ProcessExit,
            Self::OnAbnormalExit => TriggerKind::AbnormalExit,
            Self::OnTimeout(_) => TriggerKind::Timeout,
            Self::OnManual => TriggerKind::Manual,
        }
    }
}

/// Identifier for a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(u64);

/// What produced a [`CleanupCompleted`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "trigger", rename_all = "snake_case")]
pub enum CleanupOperation {
    Clear,
    ClearAll,
    Trigger(TriggerKind),
}

/// Overwrites a secret buffer in place.
///
/// Implementations must leave every byte zero or report failure.
pub trait Eraser: Send + Sync {
    /// # Errors
    ///
    /// Returns a description of what could not be erased.
    fn erase(&self, buffer: &mut [u8]) -> std::result::Result<(), String>;
}

/// Volatile-write zeroization followed by a read-back check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroizeEraser;

impl Eraser for ZeroizeEraser {
    fn erase(&self, buffer: &mut [u8]) -> std::result::Result<(), String> {
        buffer.zeroize();
        let survivors = buffer.iter().filter(|b| **b != 0).count();
        if survivors == 0 {
            Ok(())
        } else {
            Err(format!("{survivors} bytes survived zeroization"))
        }
    }
}

/// Where residual secret material was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "surface", rename_all = "snake_case")]
pub enum LeakSurface {
    /// The store's own buffer for a cleared handle.
    InternalBuffer,
    /// A process environment variable.
    Environment { variable: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakFinding {
    pub handle: Option<CredentialHandle>,
    pub surface: LeakSurface,
    pub detail: String,
}

/// Result of [`SecureCredentialStore::validate_no_leak`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_clean: bool,
    pub findings: Vec<LeakFinding>,
    pub cleared_handles_checked: usize,
}

type Fingerprint = [u8; 32];

/// Cleared entries kept for listing and leak validation; older ones are pruned.
const MAX_CLEARED_RETAINED: usize = 32;

thread_local! {
    // Trigger firings on the current call stack.
    static FIRING_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct FiringGuard;

impl FiringGuard {
    fn enter() -> Self {
        FIRING_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }

    fn nested() -> bool {
        FIRING_DEPTH.with(|depth| depth.get() > 1)
    }
}

impl Drop for FiringGuard {
    fn drop(&mut self) {
        FIRING_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

struct Entry {
    meta: SecureCredential,
    secret: Option<Vec<u8>>,
    fingerprint: Fingerprint,
    scrub_failed: bool,
    // Last-known environment variables this secret was exported to.
    env_exports: Vec<String>,
}

struct Scrubbed {
    handle: CredentialHandle,
    fingerprint: Fingerprint,
    outcome: std::result::Result<(), String>,
    env_exports: Vec<String>,
}

struct Registration {
    trigger: CleanupTrigger,
    timer: Option<CancellationToken>,
}

struct StoreInner {
    table: Mutex<HashMap<CredentialHandle, Entry>>,
    triggers: Mutex<BTreeMap<TriggerId, Registration>>,
    next_trigger: AtomicU64,
    eraser: Box<dyn Eraser>,
    auditor: Arc<SecurityAuditor>,
    cleanup_events: Subscribers<CleanupCompleted>,
    salt: [u8; 16],
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        for entry in self.table.get_mut().values_mut() {
            if let Some(secret) = entry.secret.as_mut() {
                secret.zeroize();
            }
        }
        for registration in self.triggers.get_mut().values() {
            if let Some(timer) = &registration.timer {
                timer.cancel();
            }
        }
    }
}

// Drops the oldest verified-erased entries beyond the retention cap. Entries
// whose erasure failed are kept so leak validation keeps reporting them.
fn prune_cleared(table: &mut HashMap<CredentialHandle, Entry>) {
    let mut erased: Vec<(DateTime<Utc>, CredentialHandle)> = table
        .values()
        .filter(|entry| entry.meta.cleared && !entry.scrub_failed && entry.secret.is_none())
        .map(|entry| (entry.meta.cleared_at.unwrap_or(entry.meta.created_at), entry.meta.handle))
        .collect();
    if erased.len() <= MAX_CLEARED_RETAINED {
        return;
    }
    erased.sort_unstable();
    let excess = erased.len() - MAX_CLEARED_RETAINED;
    for (_, handle) in erased.into_iter().take(excess) {
        table.remove(&handle);
    }
}

/// Process-local secret store with verified erasure and cleanup triggers.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct SecureCredentialStore {
    inner: Arc<StoreInner>,
}

impl SecureCredentialStore {
    /// Creates a store using [`ZeroizeEraser`].
    #[must_use]
    pub fn new(auditor: Arc<SecurityAuditor>) -> Self {
        Self::with_eraser(auditor, Box::new(ZeroizeEraser))
    }

    #[must_use]
    pub fn with_eraser(auditor: Arc<SecurityAuditor>, eraser: Box<dyn Eraser>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                table: Mutex::new(HashMap::new()),
                triggers: Mutex::new(BTreeMap::new()),
                next_trigger: AtomicU64::new(1),
                eraser,
                auditor,
                cleanup_events: Subscribers::new(),
                salt: *Uuid::new_v4().as_bytes(),
            }),
        }
    }

    fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        Sha256::new()
            .chain_update(self.inner.salt)
            .chain_update(bytes)
            .finalize()
            .into()
    }

    /// Copies `secret` into a fresh buffer and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidArgument`] for an empty secret.
    pub fn store(&self, secret: &[u8]) -> Result<CredentialHandle> {
        if secret.is_empty() {
            return Err(GateError::InvalidArgument(
                "secret must not be empty".to_string(),
            ));
        }

        let handle = CredentialHandle(Uuid::new_v4());
        let entry = Entry {
            meta: SecureCredential {
                handle,
                byte_length: secret.len(),
                created_at: Utc::now(),
                cleared: false,
                cleared_at: None,
            },
            secret: Some(secret.to_vec()),
            fingerprint: self.fingerprint(secret),
            scrub_failed: false,
            env_exports: Vec::new(),
        };
        {
            let mut table = self.inner.table.lock();
            table.insert(handle, entry);
            prune_cleared(&mut table);
        }

        self.inner.auditor.log(
            crate::audit::AuditLevel::Info,
            "credential.store",
            true,
            "credential stored",
            Some(&format!("handle={handle} bytes={}", secret.len())),
        );
        Ok(handle)
    }

    /// Returns a zeroize-on-drop copy of the secret.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::CredentialNotFound`] if the handle is unknown or cleared.
    pub fn retrieve(&self, handle: CredentialHandle) -> Result<Zeroizing<Vec<u8>>> {
        let table = self.inner.table.lock();
        table
            .get(&handle)
            .and_then(|entry| entry.secret.as_ref())
            .map(|secret| Zeroizing::new(secret.clone()))
            .ok_or(GateError::CredentialNotFound)
    }

    /// Runs `f` with the secret bytes. The copy is erased when `f` returns.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::CredentialNotFound`] if the handle is unknown or cleared.
    pub fn with_secret<R>(&self, handle: CredentialHandle, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let secret = self.retrieve(handle)?;
        Ok(f(&secret))
    }

    /// Whether `handle` refers to a live secret.
    pub fn contains(&self, handle: CredentialHandle) -> bool {
        self.inner
            .table
            .lock()
            .get(&handle)
            .is_some_and(|entry| !entry.meta.cleared)
    }

    /// Metadata for every live handle and the most recently cleared ones.
    pub fn list(&self) -> Vec<SecureCredential> {
        let mut all: Vec<SecureCredential> = self
            .inner
            .table
            .lock()
            .values()
            .map(|entry| entry.meta.clone())
            .collect();
        all.sort_by_key(|meta| meta.created_at);
        all
    }

    /// Number of live secrets.
    pub fn live_count(&self) -> usize {
        self.inner
            .table
            .lock()
            .values()
            .filter(|entry| !entry.meta.cleared)
            .count()
    }

    /// Exports the secret into the process environment under `variable`.
    ///
    /// The variable is removed again when the handle is cleared, unless its
    /// value has changed since.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid variable name, an unknown handle, or a
    /// secret that is not valid UTF-8.
    pub fn inject_env(&self, handle: CredentialHandle, variable: &str) -> Result<()> {
        if variable.is_empty() || variable.contains(['=', '\0']) {
            return Err(GateError::InvalidArgument(format!(
                "invalid environment variable name: {variable:?}"
            )));
        }

        let secret = self.retrieve(handle)?;
        let value = std::str::from_utf8(&secret).map_err(|_| {
            GateError::InvalidArgument("credential is not valid UTF-8".to_string())
        })?;
        std::env::set_var(variable, value);

        let recorded = {
            let mut table = self.inner.table.lock();
            match table.get_mut(&handle) {
                Some(entry) if !entry.meta.cleared => {
                    if !entry.env_exports.iter().any(|v| v == variable) {
                        entry.env_exports.push(variable.to_string());
                    }
                    true
                }
                _ => false,
            }
        };

        if !recorded {
            // Cleared while exporting; undo.
            std::env::remove_var(variable);
            return Err(GateError::CredentialNotFound);
        }

        self.inner.auditor.info(
            "credential.inject_env",
            &format!("credential {handle} exported to ${variable}"),
        );
        Ok(())
    }

    /// Erases one secret. Returns `true` only if this call verifiably erased it.
    pub fn clear(&self, handle: CredentialHandle) -> bool {
        let scrubbed = {
            let mut table = self.inner.table.lock();
            match table.get_mut(&handle) {
                Some(entry) if !entry.meta.cleared => Some(self.scrub(entry)),
                _ => None,
            }
        };

        let Some(scrubbed) = scrubbed else {
            return false;
        };
        let success = scrubbed.outcome.is_ok();
        self.finish_scrub(scrubbed);
        self.emit_cleanup(CleanupOperation::Clear, success, 1);
        success
    }

    /// Erases every live secret. Returns the number of handles cleared.
    pub fn clear_all(&self) -> usize {
        self.clear_all_as(CleanupOperation::ClearAll)
    }

    fn clear_all_as(&self, operation: CleanupOperation) -> usize {
        let scrubbed: Vec<Scrubbed> = {
            let mut table = self.inner.table.lock();
            table
                .values_mut()
                .filter(|entry| !entry.meta.cleared)
                .map(|entry| self.scrub(entry))
                .collect()
        };

        let count = scrubbed.len();
        let success = scrubbed.iter().all(|s| s.outcome.is_ok());
        for item in scrubbed {
            self.finish_scrub(item);
        }
        self.emit_cleanup(operation, success, count);
        count
    }

    // Runs under the table lock: erase, mark cleared, hand back follow-up work.
    fn scrub(&self, entry: &mut Entry) -> Scrubbed {
        let outcome = match entry.secret.take() {
            Some(mut secret) => {
                let outcome = self.inner.eraser.erase(&mut secret);
                if outcome.is_err() {
                    secret.zeroize();
                }
                outcome
            }
            None => Ok(()),
        };

        entry.meta.cleared = true;
        entry.meta.cleared_at = Some(Utc::now());
        entry.scrub_failed = outcome.is_err();

        Scrubbed {
            handle: entry.meta.handle,
            fingerprint: entry.fingerprint,
            outcome,
            env_exports: std::mem::take(&mut entry.env_exports),
        }
    }

    // Runs after the table lock is released.
    fn finish_scrub(&self, scrubbed: Scrubbed) {
        for variable in &scrubbed.env_exports {
            let still_ours = std::env::var_os(variable)
                .is_some_and(|value| self.fingerprint(value.as_encoded_bytes()) == scrubbed.fingerprint);
            if still_ours {
                std::env::remove_var(variable);
            }
        }

        match scrubbed.outcome {
            Ok(()) => {
                self.inner.auditor.log(
                    crate::audit::AuditLevel::Info,
                    "credential.clear",
                    true,
                    "credential cleared",
                    Some(&format!("handle={}", scrubbed.handle)),
                );
            }
            Err(reason) => {
                self.inner.auditor.critical(
                    "credential.clear",
                    "credential buffer could not be verifiably erased",
                    Some(&format!("handle={} reason={reason}", scrubbed.handle)),
                );
            }
        }
    }

    fn emit_cleanup(&self, operation: CleanupOperation, success: bool, items_cleared: usize) {
        // Nested firings from inside a cleanup callback stay silent to avoid loops.
        if FiringGuard::nested() {
            return;
        }
        self.inner.cleanup_events.emit(&CleanupCompleted {
            operation_type: operation,
            success,
            items_cleared,
        });
    }

    /// Subscribers notified after every clear.
    pub fn cleanup_events(&self) -> &Subscribers<CleanupCompleted> {
        &self.inner.cleanup_events
    }

    /// Registers a cleanup trigger.
    ///
    /// `OnTimeout` starts a timer on the current Tokio runtime; the timer holds
    /// only a weak reference to the store.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if an `OnTimeout` trigger is registered
    /// outside a Tokio runtime.
    pub fn register_cleanup_trigger(&self, trigger: CleanupTrigger) -> Result<TriggerId> {
        let id = TriggerId(self.inner.next_trigger.fetch_add(1, Ordering::Relaxed));

        match trigger {
            CleanupTrigger::OnTimeout(after) => {
                let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                    GateError::Config("timeout cleanup triggers require a Tokio runtime".to_string())
                })?;
                let timer = CancellationToken::new();
                self.inner.triggers.lock().insert(
                    id,
                    Registration {
                        trigger,
                        timer: Some(timer.clone()),
                    },
                );

                let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
                runtime.spawn(async move {
                    tokio::select! {
                        () = timer.cancelled() => {}
                        () = tokio::time::sleep(after) => {
                            if let Some(inner) = weak.upgrade() {
                                Self { inner }.fire_timeout(id);
                            }
                        }
                    }
                });
            }
            _ => {
                self.inner
                    .triggers
                    .lock()
                    .insert(id, Registration { trigger, timer: None });
            }
        }

        tracing::debug!(trigger = %trigger.kind(), id = id.0, "cleanup trigger registered");
        Ok(id)
    }

    /// Removes a trigger and stops its timer. Returns `false` if unknown.
    pub fn unregister_cleanup_trigger(&self, id: TriggerId) -> bool {
        let removed = self.inner.triggers.lock().remove(&id);
        match removed {
            Some(registration) => {
                if let Some(timer) = registration.timer {
                    timer.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Fires `OnProcessExit`. Returns the number cleared, or `None` if no such
    /// trigger is registered.
    pub fn notify_process_exit(&self) -> Option<usize> {
        self.fire(TriggerKind::ProcessExit)
    }

    /// Fires `OnAbnormalExit`.
    pub fn notify_abnormal_exit(&self) -> Option<usize> {
        self.fire(TriggerKind::AbnormalExit)
    }

    /// Fires `OnManual`.
    pub fn fire_manual(&self) -> Option<usize> {
        self.fire(TriggerKind::Manual)
    }

    fn fire(&self, kind: TriggerKind) -> Option<usize> {
        let registered = self
            .inner
            .triggers
            .lock()
            .values()
            .any(|registration| registration.trigger.kind() == kind);
        if !registered {
            return None;
        }
        Some(self.run_trigger(kind))
    }

    fn fire_timeout(&self, id: TriggerId) {
        // One-shot: only the first firing finds the registration.
        if self.inner.triggers.lock().remove(&id).is_some() {
            self.run_trigger(TriggerKind::Timeout);
        }
    }

    fn run_trigger(&self, kind: TriggerKind) -> usize {
        let cleared = {
            let _guard = FiringGuard::enter();
            self.clear_all_as(CleanupOperation::Trigger(kind))
        };

        self.inner.auditor.info(
            "credential.cleanup_trigger",
            &format!("{kind} trigger cleared {cleared} credential(s)"),
        );
        cleared
    }

    /// Checks cleared handles and the process environment for residual secrets.
    ///
    /// Findings are recorded as critical audit entries.
    pub fn validate_no_leak(&self) -> ValidationResult {
        let mut findings = Vec::new();
        let mut cleared: HashMap<Fingerprint, CredentialHandle> = HashMap::new();

        {
            let table = self.inner.table.lock();
            for entry in table.values().filter(|entry| entry.meta.cleared) {
                let handle = entry.meta.handle;
                if entry.secret.is_some() {
                    findings.push(LeakFinding {
                        handle: Some(handle),
                        surface: LeakSurface::InternalBuffer,
                        detail: "buffer retained after clear".to_string(),
                    });
                }
                if entry.scrub_failed {
                    findings.push(LeakFinding {
                        handle: Some(handle),
                        surface: LeakSurface::InternalBuffer,
                        detail: "erasure could not be verified".to_string(),
                    });
                }
                cleared.insert(entry.fingerprint, handle);
            }
        }

        let mut reported: HashSet<String> = HashSet::new();
        for (name, value) in std::env::vars_os() {
            let fingerprint = self.fingerprint(value.as_encoded_bytes());
            if let Some(handle) = cleared.get(&fingerprint) {
                let variable = name.to_string_lossy().into_owned();
                if reported.insert(variable.clone()) {
                    findings.push(LeakFinding {
                        handle: Some(*handle),
                        detail: format!("${variable} still holds a cleared credential"),
                        surface: LeakSurface::Environment { variable },
                    });
                }
            }
        }

        let result = ValidationResult {
            is_clean: findings.is_empty(),
            cleared_handles_checked: cleared.len(),
            findings,
        };

        if result.is_clean {
            self.inner.auditor.info(
                "credential.validate_no_leak",
                &format!("{} cleared credential(s) verified clean", result.cleared_handles_checked),
            );
        } else {
            let summary = result
                .findings
                .iter()
                .map(|f| f.detail.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            self.inner.auditor.critical(
                "credential.validate_no_leak",
                "residual secret material detected",
                Some(&summary),
            );
        }
        result
    }
}

impl fmt::Debug for SecureCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCredentialStore")
            .field("live", &self.live_count())
            .field("triggers", &self.inner.triggers.lock().len())
            .finish_non_exhaustive()
    }
}
