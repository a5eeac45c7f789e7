//! Session admission controller.
//!
//! Decides whether a new run may start for an identity and takes the per-identity
//! lock (the persisted running flag) when it does.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::outcome::OutcomeKind;
use crate::core::store::IdentityStore;
use crate::core::GovernorError;
use crate::util::serde::IdentityId;

/// Result of an admission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// The running flag is now held by the caller.
    Admitted,
    /// The identity is cooling down.
    RejectedCooldown {
        /// When the identity becomes eligible (ms since epoch).
        until: u128,
        /// Outcome that caused the cooldown.
        last_outcome: Option<OutcomeKind>,
    },
    /// Another run holds the identity.
    RejectedAlreadyRunning,
}

impl AdmissionDecision {
    /// Whether the run was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Gatekeeper in front of the run supervisor.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn IdentityStore>,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
}

impl AdmissionController {
    /// Create a controller over a record store.
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store, audit: None }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<Mutex<Box<dyn AuditSink>>>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Admit or reject a run for `id` at `now_ms`.
    ///
    /// The read only picks the rejection reason; the decision itself is the store's
    /// conditional update, so two concurrent callers can never both be admitted.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn admit(&self, id: &IdentityId, now_ms: u128) -> Result<AdmissionDecision, GovernorError> {
        if let Some(record) = self.store.get(id)? {
            if let Some(rejection) = Self::rejection_for(&record, now_ms) {
                self.record(id, &rejection, now_ms);
                return Ok(rejection);
            }
        }

        let decision = if self.store.conditional_set_running(id, now_ms)? {
            AdmissionDecision::Admitted
        } else {
            // Lost a race; report whatever state won it.
            self.store
                .get(id)?
                .and_then(|record| Self::rejection_for(&record, now_ms))
                .unwrap_or(AdmissionDecision::RejectedAlreadyRunning)
        };
        self.record(id, &decision, now_ms);
        Ok(decision)
    }

    fn rejection_for(
        record: &crate::core::store::IdentityRecord,
        now_ms: u128,
    ) -> Option<AdmissionDecision> {
        match record.cooldown_until {
            Some(until) if now_ms < until => Some(AdmissionDecision::RejectedCooldown {
                until,
                last_outcome: record.last_outcome,
            }),
            _ if record.is_running => Some(AdmissionDecision::RejectedAlreadyRunning),
            _ => None,
        }
    }

    fn record(&self, id: &IdentityId, decision: &AdmissionDecision, now_ms: u128) {
        let action = match decision {
            AdmissionDecision::Admitted => {
                tracing::info!(identity = %id, "run admitted");
                "admit"
            }
            AdmissionDecision::RejectedCooldown { until, last_outcome } => {
                tracing::info!(
                    identity = %id,
                    until,
                    last_outcome = ?last_outcome,
                    "admission rejected: cooldown active"
                );
                "reject_cooldown"
            }
            AdmissionDecision::RejectedAlreadyRunning => {
                tracing::info!(identity = %id, "admission rejected: run in progress");
                "reject_running"
            }
        };
        if let Some(audit) = &self.audit {
            audit.lock().record(build_audit_event(id.clone(), None, action, now_ms, None));
        }
    }
}
