//! Error types for governor operations.

use thiserror::Error;

use crate::core::run::RunState;
use crate::util::serde::IdentityId;

/// Errors produced by governor components.
///
/// Admission rejections are not errors; they are returned as
/// [`AdmissionDecision`](crate::core::AdmissionDecision) values.
#[derive(Debug, Error)]
pub enum GovernorError {
    /// The identity record store could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// A run attempted a transition the lifecycle forbids.
    #[error("invalid run transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the run was in.
        from: RunState,
        /// State that was requested.
        to: RunState,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A manual operation targeted an identity with no stored record.
    #[error("unknown identity: {0}")]
    UnknownIdentity(IdentityId),
    /// The dispatcher queue is at capacity.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// A scheduled run's deadline passed before it could be queued.
    #[error("deadline expired")]
    DeadlineExpired,
}

impl GovernorError {
    /// Whether the caller may retry the operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
