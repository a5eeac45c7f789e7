//! Caller-facing facade: request, cancel and inspect runs per identity.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{DispatcherConfig, SupervisorConfig};
use crate::core::{
    build_audit_event, AdmissionController, AdmissionDecision, AuditSink, AutomationDriver,
    CooldownPolicy, GovernorError, IdentityRecord, IdentityStore, OutcomeKind, ProgressPublisher,
    RunDispatcher, RunEvent, RunQueue, RunReport, RunSupervisor, Spawn,
};
use crate::util::clock::now_ms;
use crate::util::serde::IdentityId;

/// Callback invoked after every run started by [`Governor::request_run`].
pub type CompletionHook = Arc<dyn Fn(&IdentityId, &Result<RunReport, GovernorError>) + Send + Sync>;

/// Eligibility snapshot for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStatus {
    /// Identity the status describes.
    pub identity_id: IdentityId,
    /// Earliest time a run could be admitted, ignoring a run in progress.
    pub eligible_at_ms: u128,
    /// Whether a run holds the identity.
    pub is_running: bool,
    /// Outcome of the last finished run.
    pub last_outcome: Option<OutcomeKind>,
    /// Stored cooldown end, if any.
    pub cooldown_until: Option<u128>,
    /// Cooling down after a challenge or block; an operator has to clear it.
    pub requires_manual_clearance: bool,
}

impl IdentityStatus {
    fn from_record(record: &IdentityRecord, now_ms: u128) -> Self {
        let cooling = record.is_cooling_down(now_ms);
        Self {
            identity_id: record.id.clone(),
            eligible_at_ms: record.cooldown_until.filter(|_| cooling).unwrap_or(now_ms),
            is_running: record.is_running,
            last_outcome: record.last_outcome,
            cooldown_until: record.cooldown_until,
            requires_manual_clearance: cooling
                && record.last_outcome.is_some_and(OutcomeKind::is_policy_violation),
        }
    }
}

/// Admission, supervision and status queries behind one handle.
pub struct Governor<D: AutomationDriver, S> {
    store: Arc<dyn IdentityStore>,
    admission: AdmissionController,
    supervisor: RunSupervisor<D>,
    spawner: S,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
    on_complete: Option<CompletionHook>,
}

impl<D, S> Governor<D, S>
where
    D: AutomationDriver,
    S: Spawn + Clone + Send + 'static,
{
    /// Create a governor from components.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        driver: D,
        policy: CooldownPolicy,
        publisher: Arc<dyn ProgressPublisher>,
        spawner: S,
        config: SupervisorConfig,
    ) -> Self {
        let supervisor = RunSupervisor::new(Arc::clone(&store), driver, policy, publisher, config);
        Self {
            admission: AdmissionController::new(Arc::clone(&store)),
            store,
            supervisor,
            spawner,
            audit: None,
            on_complete: None,
        }
    }

    /// Attach an audit sink shared by admission and supervision.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        let audit = Arc::new(Mutex::new(audit));
        self.admission = self.admission.with_audit(Arc::clone(&audit));
        self.supervisor = self.supervisor.with_audit(Arc::clone(&audit));
        self.audit = Some(audit);
        self
    }

    /// Attach a callback run after each spawned run ends.
    #[must_use]
    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }

    /// Admission controller.
    #[must_use]
    pub const fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Run supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &RunSupervisor<D> {
        &self.supervisor
    }

    /// Create or update an identity record.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn register(&self, id: &IdentityId, credentials_ref: Option<&str>) -> Result<(), GovernorError> {
        self.store.register(id, credentials_ref)?;
        tracing::info!(identity = %id, "identity registered");
        Ok(())
    }

    /// Request a run now. An admitted run is spawned and this returns immediately.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn request_run(&self, id: &IdentityId) -> Result<AdmissionDecision, GovernorError> {
        self.request_run_at(id, now_ms())
    }

    /// Request a run with an explicit admission time.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn request_run_at(&self, id: &IdentityId, now_ms: u128) -> Result<AdmissionDecision, GovernorError> {
        let decision = self.admission.admit(id, now_ms)?;
        if !decision.is_admitted() {
            return Ok(decision);
        }

        self.supervisor.publisher().publish(id, RunEvent::Admitted);
        let token = self.supervisor.register_cancellation(id, now_ms);
        let supervisor = self.supervisor.clone();
        let hook = self.on_complete.clone();
        let id = id.clone();
        self.spawner.spawn(async move {
            let result = supervisor.execute_with_token(&id, token, now_ms).await;
            if let Err(e) = &result {
                tracing::error!(identity = %id, error = %e, "run failed");
            }
            if let Some(hook) = hook {
                hook(&id, &result);
            }
        });
        Ok(decision)
    }

    /// Request cancellation of the identity's active run.
    pub fn cancel_run(&self, id: &IdentityId) -> bool {
        self.supervisor.cancel(id)
    }

    /// Eligibility snapshot at the current time.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn get_status(&self, id: &IdentityId) -> Result<IdentityStatus, GovernorError> {
        self.get_status_at(id, now_ms())
    }

    /// Eligibility snapshot at `now_ms`. Unknown identities are eligible immediately.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn get_status_at(&self, id: &IdentityId, now_ms: u128) -> Result<IdentityStatus, GovernorError> {
        let record = self
            .store
            .get(id)?
            .unwrap_or_else(|| IdentityRecord::new(id.clone()));
        Ok(IdentityStatus::from_record(&record, now_ms))
    }

    /// Remove the identity's cooldown after manual review.
    ///
    /// # Errors
    /// [`GovernorError::UnknownIdentity`] if no record exists,
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn clear_cooldown(&self, id: &IdentityId) -> Result<(), GovernorError> {
        if !self.store.clear_cooldown(id)? {
            return Err(GovernorError::UnknownIdentity(id.clone()));
        }
        tracing::info!(identity = %id, "cooldown cleared");
        if let Some(audit) = &self.audit {
            audit
                .lock()
                .record(build_audit_event(id.clone(), None, "clear_cooldown", now_ms(), None));
        }
        Ok(())
    }

    /// Release running flags held past the stale threshold.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn reap_stale(&self) -> Result<Vec<IdentityId>, GovernorError> {
        self.supervisor.reap_stale(now_ms())
    }

    /// Build a dispatcher sharing this governor's admission and supervision.
    #[must_use]
    pub fn dispatcher<Q: RunQueue + 'static>(&self, queue: Q, config: DispatcherConfig) -> RunDispatcher<D, Q, S> {
        RunDispatcher::new(
            self.admission.clone(),
            self.supervisor.clone(),
            queue,
            self.spawner.clone(),
            config,
        )
    }
}
