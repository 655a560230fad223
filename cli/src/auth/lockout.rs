//! Failed-attempt tracking and lockout evaluation.

use chrono::{DateTime, Utc};

use crate::config::SecuritySettings;

/// Lockout thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lockout_duration: chrono::Duration,
}

impl From<&SecuritySettings> for LockoutPolicy {
    fn from(settings: &SecuritySettings) -> Self {
        Self {
            max_failed_attempts: settings.max_failed_attempts,
            lockout_duration: chrono::Duration::from_std(settings.lockout_duration())
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

/// Consecutive failure counter. Reset only by a successful authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureTracker {
    failed_attempts: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

impl FailureTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            failed_attempts: 0,
            last_failure_at: None,
        }
    }

    /// Counts one failure at `at` and returns the new attempt number.
    pub fn record_failure(&mut self, at: DateTime<Utc>) -> u32 {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_failure_at = Some(at);
        self.failed_attempts
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub const fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    #[must_use]
    pub const fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    /// When the lockout ends, if the threshold has been reached.
    ///
    /// The returned instant may already be in the past.
    #[must_use]
    pub fn lockout_expiration(&self, policy: &LockoutPolicy) -> Option<DateTime<Utc>> {
        if self.failed_attempts < policy.max_failed_attempts {
            return None;
        }
        self.last_failure_at.map(|last| {
            last.checked_add_signed(policy.lockout_duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Locked out iff the threshold is reached and `now` is before the expiration.
    #[must_use]
    pub fn is_locked_out(&self, now: DateTime<Utc>, policy: &LockoutPolicy) -> bool {
        self.lockout_expiration(policy).is_some_and(|until| now < until)
    }
}
