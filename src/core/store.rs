//! Identity record store interface.
//!
//! The running flag doubles as the per-identity lock, so backends must implement
//! [`IdentityStore::conditional_set_running`] as a single atomic operation against the
//! persisted record, never as a read followed by a write.

use serde::{Deserialize, Serialize};

use crate::core::outcome::OutcomeKind;
use crate::core::policy::{IdentityHistory, OutcomeEvent};
use crate::core::GovernorError;
use crate::util::serde::IdentityId;

/// Persisted per-identity state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Identity key.
    pub id: IdentityId,
    /// Reference to stored credentials, resolved by the driver.
    pub credentials_ref: Option<String>,
    /// End of the active cooldown; absent means eligible.
    pub cooldown_until: Option<u128>,
    /// Outcome of the most recent run.
    pub last_outcome: Option<OutcomeKind>,
    /// True only while a run executes for this identity.
    pub is_running: bool,
    /// When the running flag was set.
    pub running_since_ms: Option<u128>,
    /// Recent outcomes, oldest first.
    pub history: Vec<OutcomeEvent>,
}

impl IdentityRecord {
    /// A fresh, immediately eligible record.
    #[must_use]
    pub const fn new(id: IdentityId) -> Self {
        Self {
            id,
            credentials_ref: None,
            cooldown_until: None,
            last_outcome: None,
            is_running: false,
            running_since_ms: None,
            history: Vec::new(),
        }
    }

    /// View consumed by the cooldown policy.
    #[must_use]
    pub fn history(&self) -> IdentityHistory<'_> {
        IdentityHistory {
            cooldown_until: self.cooldown_until,
            recent: &self.history,
        }
    }

    /// Whether a cooldown is still active at `now_ms`.
    #[must_use]
    pub fn is_cooling_down(&self, now_ms: u128) -> bool {
        self.cooldown_until.is_some_and(|until| now_ms < until)
    }

    /// Whether the running flag is held by the run admitted at `running_since_ms`.
    #[must_use]
    pub fn is_held_since(&self, running_since_ms: u128) -> bool {
        self.is_running && self.running_since_ms == Some(running_since_ms)
    }

    /// Whether an admission at `now_ms` could succeed.
    #[must_use]
    pub fn is_eligible(&self, now_ms: u128) -> bool {
        !self.is_running && !self.is_cooling_down(now_ms)
    }

    /// Apply an outcome write in place, trimming history to `write.history_limit`.
    pub fn apply(&mut self, write: &OutcomeWrite) {
        self.cooldown_until = write.cooldown_until;
        self.last_outcome = Some(write.outcome);
        self.is_running = false;
        self.running_since_ms = None;
        self.history.push(OutcomeEvent {
            kind: write.outcome,
            at_ms: write.at_ms,
        });
        let excess = self.history.len().saturating_sub(write.history_limit);
        if excess > 0 {
            self.history = self.history.split_off(excess);
        }
    }
}

/// Final write of a run: cooldown, outcome, history append, running flag cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeWrite {
    /// New cooldown end.
    pub cooldown_until: Option<u128>,
    /// Outcome to record.
    pub outcome: OutcomeKind,
    /// Recording time (ms since epoch).
    pub at_ms: u128,
    /// Outcome events retained after the append.
    pub history_limit: usize,
}

/// Abstraction for identity record backends.
pub trait IdentityStore: Send + Sync {
    /// Fetch a record.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the backend is unavailable.
    fn get(&self, id: &IdentityId) -> Result<Option<IdentityRecord>, GovernorError>;

    /// Create a record, or update the credentials reference of an existing one.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the backend is unavailable.
    fn register(&self, id: &IdentityId, credentials_ref: Option<&str>) -> Result<(), GovernorError>;

    /// Atomically set the running flag when it is clear and no cooldown is active at
    /// `now_ms`. A missing record is created already running. Returns whether the flag
    /// was set by this call.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the backend is unavailable.
    fn conditional_set_running(&self, id: &IdentityId, now_ms: u128) -> Result<bool, GovernorError>;

    /// Persist the outcome of a run and clear the running flag in one write, fenced by
    /// the run's admission: nothing changes unless the record is still running since
    /// `running_since_ms`. Returns false when the lock was released or re-taken in the
    /// meantime.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the write cannot be confirmed.
    fn set_cooldown_and_clear_running(
        &self,
        id: &IdentityId,
        running_since_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError>;

    /// Remove any cooldown. Returns false when the identity is unknown.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the backend is unavailable.
    fn clear_cooldown(&self, id: &IdentityId) -> Result<bool, GovernorError>;

    /// Records whose running flag was set before `started_before_ms`.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the backend is unavailable.
    fn stale_running(&self, started_before_ms: u128) -> Result<Vec<IdentityRecord>, GovernorError>;

    /// Apply `write` only if the record is still running since before `started_before_ms`.
    /// Returns whether the write happened.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the backend is unavailable.
    fn release_stale(
        &self,
        id: &IdentityId,
        started_before_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError>;
}
