//! Allow/block-list authorization of authenticated identities.
//!
//! The policy is an immutable snapshot behind an `RwLock<Arc<_>>`; readers
//! clone the `Arc` and evaluate without holding the lock, and
//! [`UserWhitelist::reload`] swaps the snapshot in one step.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{self, WhitelistConfig};
use crate::error::{GateError, Result};
use crate::events::Subscribers;

/// How the allow list is applied. The block list always applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistMode {
    /// Everyone not blocked is allowed.
    #[default]
    Disabled,
    /// Only identities on the allow list (and not blocked) are allowed.
    AllowList,
    /// Everyone except blocked identities is allowed.
    BlockList,
}

impl fmt::Display for WhitelistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::AllowList => write!(f, "allow_list"),
            Self::BlockList => write!(f, "block_list"),
        }
    }
}

/// Immutable, normalized policy snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistPolicy {
    mode: WhitelistMode,
    allowed: BTreeSet<String>,
    blocked: BTreeSet<String>,
    case_sensitive: bool,
}

impl WhitelistPolicy {
    /// Builds a policy. Entries are trimmed, blank entries dropped, and
    /// case-folded unless `case_sensitive` is set.
    pub fn new<A, B, S>(mode: WhitelistMode, allowed: A, blocked: B, case_sensitive: bool) -> Self
    where
        A: IntoIterator<Item = S>,
        B: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalize_all = |items: Vec<S>| -> BTreeSet<String> {
            items
                .iter()
                .map(|s| s.as_ref().trim())
                .filter(|s| !s.is_empty())
                .map(|s| normalize(s, case_sensitive).into_owned())
                .collect()
        };

        Self {
            mode,
            allowed: normalize_all(allowed.into_iter().collect()),
            blocked: normalize_all(blocked.into_iter().collect()),
            case_sensitive,
        }
    }

    #[must_use]
    pub fn from_config(config: &WhitelistConfig) -> Self {
        Self::new(
            config.mode,
            &config.allowed,
            &config.blocked,
            config.case_sensitive,
        )
    }

    #[must_use]
    pub const fn mode(&self) -> WhitelistMode {
        self.mode
    }

    #[must_use]
    pub const fn allowed(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    #[must_use]
    pub const fn blocked(&self) -> &BTreeSet<String> {
        &self.blocked
    }

    #[must_use]
    pub const fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Evaluates a non-blank, trimmed identity. Block list wins.
    fn evaluate(&self, identity: &str) -> bool {
        let key = normalize(identity, self.case_sensitive);
        if self.blocked.contains(key.as_ref()) {
            return false;
        }
        match self.mode {
            WhitelistMode::Disabled | WhitelistMode::BlockList => true,
            WhitelistMode::AllowList => self.allowed.contains(key.as_ref()),
        }
    }
}

fn normalize(identity: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive {
        Cow::Borrowed(identity)
    } else {
        Cow::Owned(identity.to_lowercase())
    }
}

/// Emitted after [`UserWhitelist::reload`] installs a different policy.
#[derive(Debug, Clone)]
pub struct PolicyChanged {
    pub previous: Arc<WhitelistPolicy>,
    pub current: Arc<WhitelistPolicy>,
}

/// Thread-safe whitelist with atomic policy reload.
pub struct UserWhitelist {
    policy: RwLock<Arc<WhitelistPolicy>>,
    source: Option<PathBuf>,
    changes: Subscribers<PolicyChanged>,
}

impl UserWhitelist {
    #[must_use]
    pub fn new(policy: WhitelistPolicy) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            source: None,
            changes: Subscribers::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &WhitelistConfig) -> Self {
        Self::new(WhitelistPolicy::from_config(config))
    }

    /// Loads the policy from a config file and remembers the path for
    /// [`reload_from_source`](Self::reload_from_source).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn with_source(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = config::read_config_file(&path)?;
        let mut whitelist = Self::from_config(&config.whitelist);
        whitelist.source = Some(path);
        Ok(whitelist)
    }

    /// The current policy snapshot.
    pub fn snapshot(&self) -> Arc<WhitelistPolicy> {
        Arc::clone(&self.policy.read())
    }

    /// Checks one identity against the current policy.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidArgument`] for a blank identity.
    pub fn is_allowed(&self, identity: &str) -> Result<bool> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(GateError::InvalidArgument(
                "identity must not be blank".to_string(),
            ));
        }
        Ok(self.snapshot().evaluate(identity))
    }

    /// Evaluates many identities against one snapshot. Blank entries are skipped.
    pub fn validate_many<I, S>(&self, identities: I) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policy = self.snapshot();
        identities
            .into_iter()
            .filter_map(|identity| {
                let trimmed = identity.as_ref().trim();
                (!trimmed.is_empty()).then(|| (trimmed.to_string(), policy.evaluate(trimmed)))
            })
            .collect()
    }

    /// Installs `policy`. Returns `true` and notifies subscribers if it differs
    /// from the current snapshot.
    pub fn reload(&self, policy: WhitelistPolicy) -> bool {
        let change = {
            let mut guard = self.policy.write();
            if **guard == policy {
                None
            } else {
                let current = Arc::new(policy);
                let previous = std::mem::replace(&mut *guard, Arc::clone(&current));
                Some(PolicyChanged { previous, current })
            }
        };

        match change {
            Some(change) => {
                tracing::info!(
                    mode = %change.current.mode(),
                    allowed = change.current.allowed().len(),
                    blocked = change.current.blocked().len(),
                    "whitelist policy reloaded"
                );
                self.changes.emit(&change);
                true
            }
            None => false,
        }
    }

    /// Re-reads the `[whitelist]` section of a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed. The current
    /// policy is left untouched in that case.
    pub fn reload_from(&self, path: &Path) -> Result<bool> {
        let config = config::read_config_file(path)?;
        Ok(self.reload(WhitelistPolicy::from_config(&config.whitelist)))
    }

    /// Re-reads the file this whitelist was created from.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] if the whitelist has no backing file.
    pub fn reload_from_source(&self) -> Result<bool> {
        let path = self
            .source
            .as_deref()
            .ok_or_else(|| GateError::Config("whitelist has no backing file".to_string()))?;
        self.reload_from(path)
    }

    /// Subscribers notified after a policy change.
    pub const fn changes(&self) -> &Subscribers<PolicyChanged> {
        &self.changes
    }
}

impl Default for UserWhitelist {
    fn default() -> Self {
        Self::new(WhitelistPolicy::default())
    }
}

impl fmt::Debug for UserWhitelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserWhitelist")
            .field("policy", &self.snapshot())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn allow_list(allowed: &[&str], blocked: &[&str]) -> UserWhitelist {
        UserWhitelist::new(WhitelistPolicy::new(
            WhitelistMode::AllowList,
            allowed.iter().copied(),
            blocked.iter().copied(),
            false,
        ))
    }

    #[test]
    fn disabled_mode_allows_everyone_not_blocked() {
        let whitelist = UserWhitelist::new(WhitelistPolicy::new(
            WhitelistMode::Disabled,
            Vec::<&str>::new(),
            vec!["mallory"],
            false,
        ));
        assert!(whitelist.is_allowed("alice").unwrap());
        assert!(!whitelist.is_allowed("mallory").unwrap());
    }

    #[test]
    fn allow_list_requires_membership() {
        let whitelist = allow_list(&["alice"], &[]);
        assert!(whitelist.is_allowed("alice").unwrap());
        assert!(!whitelist.is_allowed("bob").unwrap());
    }

    #[test]
    fn block_list_overrides_allow_list() {
        let whitelist = allow_list(&["alice", "bob"], &["bob"]);
        assert!(whitelist.is_allowed("alice").unwrap());
        assert!(!whitelist.is_allowed("bob").unwrap());
    }

    #[test]
    fn block_list_mode_only_rejects_blocked() {
        let whitelist = UserWhitelist::new(WhitelistPolicy::new(
            WhitelistMode::BlockList,
            vec!["ignored"],
            vec!["bob"],
            false,
        ));
        assert!(whitelist.is_allowed("carol").unwrap());
        assert!(!whitelist.is_allowed("bob").unwrap());
    }

    #[test]
    fn matching_is_case_insensitive_by_default() {
        let whitelist = allow_list(&["Alice"], &["BOB"]);
        assert!(whitelist.is_allowed("ALICE").unwrap());
        assert!(!whitelist.is_allowed("bob").unwrap());
    }

    #[test]
    fn case_sensitive_policies_compare_exactly() {
        let whitelist = UserWhitelist::new(WhitelistPolicy::new(
            WhitelistMode::AllowList,
            vec!["Alice"],
            Vec::<&str>::new(),
            true,
        ));
        assert!(whitelist.is_allowed("Alice").unwrap());
        assert!(!whitelist.is_allowed("alice").unwrap());
    }

    #[test]
    fn blank_identity_is_rejected() {
        let whitelist = UserWhitelist::default();
        assert!(matches!(
            whitelist.is_allowed("   "),
            Err(GateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn validate_many_skips_blank_entries() {
        let whitelist = allow_list(&["alice"], &[]);
        let results = whitelist.validate_many(["alice", "", "bob", "  "]);

        assert_eq!(results.len(), 2);
        assert_eq!(results.get("alice"), Some(&true));
        assert_eq!(results.get("bob"), Some(&false));
    }

    #[test]
    fn reload_notifies_only_on_change() {
        let whitelist = allow_list(&["alice"], &[]);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        whitelist.changes().subscribe(move |change: &PolicyChanged| {
            assert_ne!(change.previous, change.current);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let same = WhitelistPolicy::new(
            WhitelistMode::AllowList,
            vec!["ALICE"],
            Vec::<&str>::new(),
            false,
        );
        assert!(!whitelist.reload(same));

        let wider = WhitelistPolicy::new(
            WhitelistMode::AllowList,
            vec!["alice", "bob"],
            Vec::<&str>::new(),
            false,
        );
        assert!(whitelist.reload(wider));
        assert!(whitelist.is_allowed("bob").unwrap());
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reload_from_source_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[whitelist]\nmode = \"allow_list\"\nallowed = [\"alice\"]\n",
        )
        .unwrap();

        let whitelist = UserWhitelist::with_source(&path).unwrap();
        assert!(!whitelist.is_allowed("bob").unwrap());

        std::fs::write(
            &path,
            "[whitelist]\nmode = \"allow_list\"\nallowed = [\"alice\", \"bob\"]\n",
        )
        .unwrap();
        assert!(whitelist.reload_from_source().unwrap());
        assert!(whitelist.is_allowed("bob").unwrap());
    }

    #[test]
    fn broken_file_keeps_current_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[whitelist\n").unwrap();

        let whitelist = allow_list(&["alice"], &[]);
        assert!(whitelist.reload_from(&path).is_err());
        assert!(whitelist.is_allowed("alice").unwrap());
    }

    #[test]
    fn reload_without_source_is_an_error() {
        assert!(matches!(
            UserWhitelist::default().reload_from_source(),
            Err(GateError::Config(_))
        ));
    }
}
