//! Outcome classification, cooldown policy, admission and run supervision.

pub mod admission;
pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod policy;
pub mod progress;
pub mod run;
pub mod store;
pub mod supervisor;

pub use admission::{AdmissionController, AdmissionDecision};
pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use dispatcher::{DispatchSummary, RunDispatcher, RunQueue, ScheduledRun, Spawn};
pub use error::{AppResult, GovernorError};
pub use outcome::{classify, AutomationFault, OutcomeKind, RawSignal};
pub use policy::{CooldownDecision, CooldownPolicy, IdentityHistory, OutcomeEvent};
pub use progress::{NoopPublisher, ProgressMessage, ProgressPublisher, RunEvent};
pub use run::{validate_transition, Run, RunState};
pub use store::{IdentityRecord, IdentityStore, OutcomeWrite};
pub use supervisor::{AutomationDriver, Cancelled, RunContext, RunReport, RunSupervisor};
