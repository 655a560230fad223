//! Event payloads and explicit subscriber lists.
//!
//! Every component that notifies collaborators owns a [`Subscribers`] list.
//! Callbacks run synchronously on the notifying thread, in registration order,
//! after the notifier has released its own locks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::audit::AuditLogEntry;
use crate::auth::credentials::CleanupOperation;
use crate::auth::manager::AuthenticationState;
use crate::auth::tokens::FailureReason;

/// Identifier returned by [`Subscribers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of callbacks for one event type.
pub struct Subscribers<E> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Subscribers<E> {
    /// Creates an empty subscriber list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a callback and returns its id.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Arc::new(callback)));
        id
    }

    /// Removes a callback. Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Drops every registered callback.
    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Returns `true` when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every callback with `event`.
    ///
    /// The list is snapshotted first so callbacks may subscribe or unsubscribe.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in snapshot {
            callback(event);
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

/// Non-critical security notification.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    /// Audit operation that produced the event.
    pub event_type: String,
    /// Redacted message.
    pub message: String,
}

/// Critical security notification (failed cleanup, leak, security exception).
#[derive(Debug, Clone, Serialize)]
pub struct CriticalSecurityEvent {
    /// Redacted message.
    pub message: String,
    /// The audit entry that triggered the escalation.
    pub related_log: AuditLogEntry,
}

/// Emitted by the credential store after each clear operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupCompleted {
    /// What kind of clear ran.
    pub operation_type: CleanupOperation,
    /// Whether every targeted buffer was verifiably erased.
    pub success: bool,
    /// Number of handles transitioned to cleared.
    pub items_cleared: usize,
}

/// Everything an [`AuthenticationManager`](crate::auth::AuthenticationManager)
/// subscriber can observe.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// The manager moved between states.
    StateChanged {
        old_state: AuthenticationState,
        new_state: AuthenticationState,
    },
    /// A completion attempt failed and was counted.
    AuthenticationFailed {
        reason: FailureReason,
        attempt_number: u32,
    },
    /// Forwarded from the auditor.
    Security(SecurityEvent),
    /// Forwarded from the auditor.
    CriticalSecurity(CriticalSecurityEvent),
    /// Forwarded from the credential store.
    CleanupCompleted(CleanupCompleted),
}
