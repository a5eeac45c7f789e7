//! Run records and their lifecycle state machine.
//!
//! Pending -> Running -> Succeeded | Failed | Cancelled. Terminal states are final.

use serde::{Deserialize, Serialize};

use crate::core::outcome::OutcomeKind;
use crate::core::GovernorError;
use crate::util::serde::{IdentityId, RunId};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Admitted, not yet executing.
    Pending,
    /// Executing the apply loop.
    Running,
    /// Finished with a success outcome.
    Succeeded,
    /// Finished with any penalizing outcome.
    Failed,
    /// Stopped by an external request.
    Cancelled,
}

impl RunState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Terminal state reached by a run that ended with `outcome`.
    #[must_use]
    pub const fn terminal_for(outcome: OutcomeKind) -> Self {
        match outcome {
            OutcomeKind::Success => Self::Succeeded,
            OutcomeKind::Cancelled => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

/// Validate that a state transition is allowed.
///
/// # Errors
/// Returns [`GovernorError::InvalidTransition`] for any edge outside the lifecycle.
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), GovernorError> {
    let valid = matches!(
        (from, to),
        (RunState::Pending, RunState::Running)
            | (RunState::Pending | RunState::Running, RunState::Cancelled)
            | (RunState::Running, RunState::Succeeded | RunState::Failed)
    );
    if valid {
        Ok(())
    } else {
        Err(GovernorError::InvalidTransition { from, to })
    }
}

/// One execution attempt for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub id: RunId,
    /// Identity the run acts for.
    pub identity_id: IdentityId,
    /// Current lifecycle state.
    pub state: RunState,
    /// Admission time (ms since epoch).
    pub started_at_ms: u128,
    /// Terminal time; absent while in progress.
    pub ended_at_ms: Option<u128>,
    /// Classified outcome; absent until terminal.
    pub outcome: Option<OutcomeKind>,
}

impl Run {
    /// Create a pending run.
    #[must_use]
    pub fn new(identity_id: IdentityId, started_at_ms: u128) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            identity_id,
            state: RunState::Pending,
            started_at_ms,
            ended_at_ms: None,
            outcome: None,
        }
    }

    /// Move to `Running`.
    ///
    /// # Errors
    /// Fails unless the run is `Pending`.
    pub fn start(&mut self) -> Result<(), GovernorError> {
        validate_transition(self.state, RunState::Running)?;
        self.state = RunState::Running;
        Ok(())
    }

    /// Reach the terminal state matching `outcome`. Happens exactly once.
    ///
    /// # Errors
    /// Fails if the run is already terminal or the edge is not allowed.
    pub fn finish(&mut self, outcome: OutcomeKind, at_ms: u128) -> Result<RunState, GovernorError> {
        let to = RunState::terminal_for(outcome);
        validate_transition(self.state, to)?;
        self.state = to;
        self.outcome = Some(outcome);
        self.ended_at_ms = Some(at_ms);
        Ok(to)
    }
}
