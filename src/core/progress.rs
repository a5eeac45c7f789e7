//! Progress events and the publisher boundary.
//!
//! Publishing is fire-and-forget: implementations swallow delivery failures so a
//! broken real-time channel can never fail or block a run.

use serde::{Deserialize, Serialize};

use crate::core::outcome::OutcomeKind;
use crate::util::serde::{IdentityId, RunId};

/// Run-state transition forwarded to the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Admission succeeded.
    Admitted,
    /// The supervisor started the run.
    Started {
        /// Run identifier.
        run_id: RunId,
    },
    /// Free-form step reported by the apply loop.
    Step {
        /// Run identifier.
        run_id: RunId,
        /// Step description.
        step: String,
    },
    /// The run reached a terminal state and its outcome was persisted.
    Finished {
        /// Run identifier.
        run_id: RunId,
        /// Classified outcome.
        outcome: OutcomeKind,
        /// Next eligibility, if a cooldown applies.
        cooldown_until: Option<u128>,
    },
    /// The outcome means an operator has to look at the identity.
    ManualAttentionRequired {
        /// Run identifier.
        run_id: RunId,
        /// Offending outcome.
        outcome: OutcomeKind,
    },
    /// The run ended after its lock was released by stale-lock recovery; its outcome
    /// was discarded.
    Superseded {
        /// Run identifier.
        run_id: RunId,
        /// Outcome that was not recorded.
        outcome: OutcomeKind,
    },
    /// The outcome could not be persisted; the identity stays locked.
    PersistenceFailed {
        /// Run identifier.
        run_id: RunId,
        /// Store error text.
        reason: String,
    },
}

/// A published event with its routing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Identity the event belongs to.
    pub identity_id: IdentityId,
    /// The event.
    pub event: RunEvent,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Abstraction for progress delivery backends.
pub trait ProgressPublisher: Send + Sync {
    /// Deliver an event. Must not block and must not panic on delivery failure.
    fn publish(&self, identity: &IdentityId, event: RunEvent);
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl ProgressPublisher for NoopPublisher {
    fn publish(&self, _identity: &IdentityId, _event: RunEvent) {}
}
