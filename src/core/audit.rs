//! Audit sink implementations.
//!
//! Records admission decisions and run lifecycle transitions per identity.

use std::collections::VecDeque;

use crate::util::serde::{IdentityId, RunId};

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Identity the event concerns.
    pub identity_id: IdentityId,
    /// Related run, when one exists.
    pub run_id: Option<RunId>,
    /// Action taken (admit, reject_cooldown, reject_running, start, complete, cancel,
    /// timeout, release_stale, clear_cooldown, persist_failed, stale_write).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Events for one identity, oldest first.
    #[must_use]
    pub fn events_for(&self, identity: &IdentityId) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| &e.identity_id == identity)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that forwards events to `tracing` at debug level.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::debug!(
            identity = %event.identity_id,
            run_id = ?event.run_id,
            action = %event.action,
            detail = ?event.detail,
            "audit"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    identity_id: IdentityId,
    run_id: Option<RunId>,
    action: impl Into<String>,
    created_at_ms: u128,
    detail: Option<String>,
) -> AuditEvent {
    let action = action.into();
    let event_id = match run_id {
        Some(run) => format!("{identity_id}-{run}-{action}-{created_at_ms}"),
        None => format!("{identity_id}-{action}-{created_at_ms}"),
    };
    AuditEvent {
        event_id,
        identity_id,
        run_id,
        action,
        created_at_ms,
        detail,
    }
}
