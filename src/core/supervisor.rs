//! Automation run supervisor.
//!
//! Drives one admitted run from `Pending` to a terminal state and guarantees the
//! per-identity running flag is released on every exit path: normal completion,
//! driver faults, panics, cancellation and the wall-clock timeout.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::outcome::{classify, AutomationFault, OutcomeKind, RawSignal};
use crate::core::policy::{CooldownDecision, CooldownPolicy};
use crate::core::progress::{ProgressPublisher, RunEvent};
use crate::core::run::Run;
use crate::core::store::{IdentityRecord, IdentityStore, OutcomeWrite};
use crate::core::GovernorError;
use crate::util::clock::now_ms;
use crate::util::serde::{IdentityId, RunId};

/// Browser-automation boundary.
///
/// `Session` must release its browser context when dropped: a run that panics or is
/// aborted by the timeout drops the session without calling [`close`](Self::close).
#[async_trait]
pub trait AutomationDriver: Send + Sync + 'static {
    /// Handle to an open browser context.
    type Session: Send + 'static;

    /// Open a logged-in session for the identity.
    async fn open_session(&self, identity: &IdentityRecord) -> Result<Self::Session, AutomationFault>;

    /// Run the apply loop until it finishes, hits a checkpoint cancellation or fails.
    async fn run_apply_loop(
        &self,
        session: &mut Self::Session,
        ctx: &RunContext,
    ) -> Result<RawSignal, AutomationFault>;

    /// Close the session gracefully.
    async fn close(&self, session: Self::Session);
}

/// Returned by [`RunContext::checkpoint`] once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run cancelled")]
pub struct Cancelled;

impl From<Cancelled> for RawSignal {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Per-run handle given to the apply loop.
#[derive(Clone)]
pub struct RunContext {
    run_id: RunId,
    identity_id: IdentityId,
    token: CancellationToken,
    publisher: Arc<dyn ProgressPublisher>,
    applies: Arc<AtomicU32>,
    max_applies: u32,
}

impl RunContext {
    /// Build a context for a run.
    #[must_use]
    pub fn new(
        run_id: RunId,
        identity_id: IdentityId,
        token: CancellationToken,
        publisher: Arc<dyn ProgressPublisher>,
        max_applies: u32,
    ) -> Self {
        Self {
            run_id,
            identity_id,
            token,
            publisher,
            applies: Arc::new(AtomicU32::new(0)),
            max_applies,
        }
    }

    /// Run identifier.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Identity the run belongs to.
    #[must_use]
    pub const fn identity_id(&self) -> &IdentityId {
        &self.identity_id
    }

    /// Count an apply attempt. Returns false once the per-run budget is exhausted.
    pub fn record_apply_attempt(&self) -> bool {
        let attempt = self.applies.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        attempt <= self.max_applies
    }

    /// Apply attempts counted so far.
    #[must_use]
    pub fn applied(&self) -> u32 {
        self.applies.load(Ordering::Acquire).min(self.max_applies)
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Safe point for cooperative cancellation.
    ///
    /// # Errors
    /// [`Cancelled`] once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested; for use in `select!` around long waits.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Publish a progress step.
    pub fn report(&self, step: impl Into<String>) {
        self.publisher.publish(
            &self.identity_id,
            RunEvent::Step {
                run_id: self.run_id,
                step: step.into(),
            },
        );
    }
}

/// Result of a supervised run whose outcome was persisted.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final run record.
    pub run: Run,
    /// Cooldown applied.
    pub decision: CooldownDecision,
    /// Signal the outcome was classified from.
    pub raw: RawSignal,
    /// Apply attempts counted by the run.
    pub applied: u32,
    /// False when the lock had already been released by stale-lock recovery and the
    /// outcome was discarded.
    pub recorded: bool,
}

impl RunReport {
    /// Classified outcome.
    #[must_use]
    pub const fn outcome(&self) -> OutcomeKind {
        self.decision.outcome
    }
}

/// How the supervised work ended.
enum Termination {
    Finished(RawSignal),
    TimedOut,
    Aborted,
}

/// Supervises admitted runs.
pub struct RunSupervisor<D: AutomationDriver> {
    store: Arc<dyn IdentityStore>,
    driver: Arc<D>,
    policy: Arc<CooldownPolicy>,
    publisher: Arc<dyn ProgressPublisher>,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
    /// Cancellation token per identity, tagged with the admission it belongs to.
    cancellations: Arc<Mutex<HashMap<IdentityId, (u128, CancellationToken)>>>,
    config: SupervisorConfig,
}

impl<D: AutomationDriver> Clone for RunSupervisor<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            driver: Arc::clone(&self.driver),
            policy: Arc::clone(&self.policy),
            publisher: Arc::clone(&self.publisher),
            audit: self.audit.clone(),
            cancellations: Arc::clone(&self.cancellations),
            config: self.config.clone(),
        }
    }
}

impl<D: AutomationDriver> RunSupervisor<D> {
    /// Create a supervisor from components.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        driver: D,
        policy: CooldownPolicy,
        publisher: Arc<dyn ProgressPublisher>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            driver: Arc::new(driver),
            policy: Arc::new(policy),
            publisher,
            audit: None,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<Mutex<Box<dyn AuditSink>>>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Progress publisher used for run events.
    #[must_use]
    pub fn publisher(&self) -> &Arc<dyn ProgressPublisher> {
        &self.publisher
    }

    /// Cooldown policy in use.
    #[must_use]
    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    /// Create and register the cancellation token for the run admitted at `admitted_at_ms`.
    pub fn register_cancellation(&self, id: &IdentityId, admitted_at_ms: u128) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .insert(id.clone(), (admitted_at_ms, token.clone()));
        token
    }

    fn unregister_cancellation(&self, id: &IdentityId, admitted_at_ms: u128) {
        let mut cancellations = self.cancellations.lock();
        if cancellations.get(id).is_some_and(|(at, _)| *at == admitted_at_ms) {
            cancellations.remove(id);
        }
    }

    /// Request cancellation of the identity's active run. Returns false if none is known.
    pub fn cancel(&self, id: &IdentityId) -> bool {
        let Some((_, token)) = self.cancellations.lock().get(id).cloned() else {
            return false;
        };
        token.cancel();
        tracing::info!(identity = %id, "cancellation requested");
        true
    }

    /// Execute a run for an identity admitted at `admitted_at_ms`.
    ///
    /// The outcome write is fenced by that admission: if stale-lock recovery released
    /// the lock in the meantime, the outcome is discarded and the report says so.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the outcome could not be written; the
    /// running flag is then left set and only [`reap_stale`](Self::reap_stale) clears it.
    pub async fn execute(&self, id: &IdentityId, admitted_at_ms: u128) -> Result<RunReport, GovernorError> {
        let token = self.register_cancellation(id, admitted_at_ms);
        self.execute_with_token(id, token, admitted_at_ms).await
    }

    /// Execute a run using a token registered earlier with
    /// [`register_cancellation`](Self::register_cancellation).
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn execute_with_token(
        &self,
        id: &IdentityId,
        token: CancellationToken,
        admitted_at_ms: u128,
    ) -> Result<RunReport, GovernorError> {
        let mut run = Run::new(id.clone(), now_ms());
        run.start()?;
        self.record_audit(id, Some(run.id), "start", run.started_at_ms, None);
        self.publisher.publish(id, RunEvent::Started { run_id: run.id });
        tracing::info!(identity = %id, run_id = %run.id, "run started");

        let (record, raw, timed_out, ctx) = match self.store.get(id) {
            Ok(record) => {
                let record = record.unwrap_or_else(|| IdentityRecord::new(id.clone()));
                let (raw, timed_out, ctx) = self.supervise(&record, run.id, &token).await;
                (Some(record), raw, timed_out, Some(ctx))
            }
            Err(e) => {
                tracing::warn!(identity = %id, error = %e, "identity read failed; ending run before the driver starts");
                (None, RawSignal::fault("persistence", e.to_string()), false, None)
            }
        };

        let outcome = Self::resolve_outcome(&raw, token.is_cancelled());
        let ended_at_ms = now_ms();
        // The next run may register its token as soon as the flag is cleared.
        self.unregister_cancellation(id, admitted_at_ms);
        let (decision, recorded) = match self
            .persist(id, admitted_at_ms, record.as_ref(), outcome, ended_at_ms)
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::error!(
                    identity = %id,
                    run_id = %run.id,
                    outcome = %outcome,
                    error = %e,
                    "outcome not persisted; identity stays locked"
                );
                self.record_audit(id, Some(run.id), "persist_failed", ended_at_ms, Some(e.to_string()));
                self.publisher.publish(
                    id,
                    RunEvent::PersistenceFailed {
                        run_id: run.id,
                        reason: e.to_string(),
                    },
                );
                return Err(e);
            }
        };

        let state = run.finish(outcome, ended_at_ms)?;
        let applied = ctx.map_or(0, |ctx| ctx.applied());
        if !recorded {
            tracing::warn!(
                identity = %id,
                run_id = %run.id,
                outcome = %outcome,
                admitted_at_ms,
                "lock no longer held by this run; outcome discarded"
            );
            self.record_audit(id, Some(run.id), "stale_write", ended_at_ms, Some(outcome.as_str().to_owned()));
            self.publisher.publish(id, RunEvent::Superseded { run_id: run.id, outcome });
            return Ok(RunReport {
                run,
                decision,
                raw,
                applied,
                recorded,
            });
        }

        let action = match outcome {
            OutcomeKind::Cancelled => "cancel",
            _ if timed_out => "timeout",
            _ => "complete",
        };
        self.record_audit(id, Some(run.id), action, ended_at_ms, Some(outcome.as_str().to_owned()));
        self.publisher.publish(
            id,
            RunEvent::Finished {
                run_id: run.id,
                outcome,
                cooldown_until: decision.cooldown_until,
            },
        );
        if decision.requires_manual_clearance {
            tracing::error!(
                identity = %id,
                run_id = %run.id,
                outcome = %outcome,
                cooldown_until = ?decision.cooldown_until,
                "identity requires manual attention"
            );
            self.publisher.publish(
                id,
                RunEvent::ManualAttentionRequired {
                    run_id: run.id,
                    outcome,
                },
            );
        } else {
            tracing::info!(
                identity = %id,
                run_id = %run.id,
                state = ?state,
                outcome = %outcome,
                repeats = decision.repeats,
                cooldown_until = ?decision.cooldown_until,
                "run finished"
            );
        }

        Ok(RunReport {
            run,
            decision,
            raw,
            applied,
            recorded,
        })
    }

    /// Run the driver in its own task, bounded by the timeout and the cancel grace.
    async fn supervise(
        &self,
        record: &IdentityRecord,
        run_id: RunId,
        token: &CancellationToken,
    ) -> (RawSignal, bool, RunContext) {
        let ctx = RunContext::new(
            run_id,
            record.id.clone(),
            token.clone(),
            Arc::clone(&self.publisher),
            self.config.max_applies_per_run,
        );
        let driver = Arc::clone(&self.driver);
        let work_ctx = ctx.clone();
        let work_record = record.clone();
        let mut work = tokio::spawn(async move {
            let mut session = match driver.open_session(&work_record).await {
                Ok(session) => session,
                Err(fault) => return RawSignal::from(fault),
            };
            let signal = driver
                .run_apply_loop(&mut session, &work_ctx)
                .await
                .unwrap_or_else(RawSignal::from);
            driver.close(session).await;
            signal
        });

        let grace = self.config.cancel_grace();
        let termination = tokio::select! {
            biased;
            joined = &mut work => match joined {
                Ok(signal) => Termination::Finished(signal),
                Err(e) if e.is_panic() => {
                    Termination::Finished(RawSignal::fault("panic", panic_message(&*e.into_panic())))
                }
                Err(e) => Termination::Finished(RawSignal::fault("join", e.to_string())),
            },
            () = tokio::time::sleep(self.config.max_run()) => Termination::TimedOut,
            () = cancelled_after(token, grace) => Termination::Aborted,
        };

        match termination {
            Termination::Finished(signal) => (signal, false, ctx),
            Termination::TimedOut => {
                work.abort();
                tracing::warn!(identity = %record.id, run_id = %run_id, "run exceeded its time budget");
                (RawSignal::Timeout, true, ctx)
            }
            Termination::Aborted => {
                work.abort();
                tracing::warn!(
                    identity = %record.id,
                    run_id = %run_id,
                    grace_ms = grace.as_millis(),
                    "run ignored cancellation; aborted"
                );
                (RawSignal::Cancelled, false, ctx)
            }
        }
    }

    /// Classify the signal. A requested cancellation turns benign outcomes into
    /// `Cancelled` but never hides a penalizing signal the run observed.
    fn resolve_outcome(raw: &RawSignal, cancel_requested: bool) -> OutcomeKind {
        let kind = classify(raw);
        match kind {
            OutcomeKind::Success | OutcomeKind::SoftFailure
                if cancel_requested && !matches!(raw, RawSignal::Timeout) =>
            {
                OutcomeKind::Cancelled
            }
            other => other,
        }
    }

    async fn persist(
        &self,
        id: &IdentityId,
        admitted_at_ms: u128,
        known: Option<&IdentityRecord>,
        outcome: OutcomeKind,
        at_ms: u128,
    ) -> Result<(CooldownDecision, bool), GovernorError> {
        let mut attempt = 0;
        loop {
            match self.try_persist(id, admitted_at_ms, known, outcome, at_ms) {
                Ok(persisted) => return Ok(persisted),
                Err(e) if e.is_retryable() && attempt < self.config.persist_retries => {
                    attempt += 1;
                    tracing::warn!(identity = %id, attempt, error = %e, "outcome write failed; retrying");
                    let backoff = self
                        .config
                        .persist_retry_backoff_ms
                        .saturating_mul(u64::from(attempt));
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One fenced write attempt. When the record could not be read at the start of the
    /// run it is read again here, so escalation still sees the identity's history.
    fn try_persist(
        &self,
        id: &IdentityId,
        admitted_at_ms: u128,
        known: Option<&IdentityRecord>,
        outcome: OutcomeKind,
        at_ms: u128,
    ) -> Result<(CooldownDecision, bool), GovernorError> {
        let reread;
        let record = match known {
            Some(record) => record,
            None => {
                reread = self
                    .store
                    .get(id)?
                    .unwrap_or_else(|| IdentityRecord::new(id.clone()));
                &reread
            }
        };
        let decision = self.policy.decide(outcome, &record.history(), at_ms);
        let write = OutcomeWrite {
            cooldown_until: decision.cooldown_until,
            outcome,
            at_ms,
            history_limit: self.policy.config().history_limit,
        };
        let recorded = self.store.set_cooldown_and_clear_running(id, admitted_at_ms, &write)?;
        Ok((decision, recorded))
    }

    /// Release running flags older than the stale threshold, recording them as soft failures.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the store is unavailable.
    pub fn reap_stale(&self, now_ms: u128) -> Result<Vec<IdentityId>, GovernorError> {
        let cutoff = now_ms.saturating_sub(self.config.stale_after().as_millis());
        let mut released = Vec::new();
        for record in self.store.stale_running(cutoff)? {
            let decision = self.policy.decide(OutcomeKind::SoftFailure, &record.history(), now_ms);
            let write = OutcomeWrite {
                cooldown_until: decision.cooldown_until,
                outcome: OutcomeKind::SoftFailure,
                at_ms: now_ms,
                history_limit: self.policy.config().history_limit,
            };
            if !self.store.release_stale(&record.id, cutoff, &write)? {
                continue;
            }
            tracing::warn!(
                identity = %record.id,
                running_since = ?record.running_since_ms,
                cooldown_until = ?decision.cooldown_until,
                "released stale running flag"
            );
            if let Some(since) = record.running_since_ms {
                self.unregister_cancellation(&record.id, since);
            }
            self.record_audit(&record.id, None, "release_stale", now_ms, None);
            released.push(record.id);
        }
        Ok(released)
    }

    fn record_audit(
        &self,
        id: &IdentityId,
        run_id: Option<RunId>,
        action: &str,
        at_ms: u128,
        detail: Option<String>,
    ) {
        if let Some(audit) = &self.audit {
            audit
                .lock()
                .record(build_audit_event(id.clone(), run_id, action, at_ms, detail));
        }
    }
}

async fn cancelled_after(token: &CancellationToken, grace: Duration) {
    token.cancelled().await;
    tokio::time::sleep(grace).await;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_overrides_benign_outcomes_only() {
        type S = RunSupervisor<NullDriver>;
        let done = RawSignal::Completed { applied: 1 };
        assert_eq!(S::resolve_outcome(&done, true), OutcomeKind::Cancelled);
        assert_eq!(S::resolve_outcome(&done, false), OutcomeKind::Success);
        let limited = RawSignal::HttpStatus { code: 429 };
        assert_eq!(S::resolve_outcome(&limited, true), OutcomeKind::RateLimited);
        assert_eq!(S::resolve_outcome(&RawSignal::Timeout, true), OutcomeKind::SoftFailure);
    }

    #[test]
    fn apply_budget_is_enforced() {
        let ctx = RunContext::new(
            RunId::new_v4(),
            IdentityId::from("a"),
            CancellationToken::new(),
            Arc::new(crate::core::progress::NoopPublisher),
            2,
        );
        assert!(ctx.record_apply_attempt());
        assert!(ctx.record_apply_attempt());
        assert!(!ctx.record_apply_attempt());
        assert_eq!(ctx.applied(), 2);
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = RunContext::new(
            RunId::new_v4(),
            IdentityId::from("a"),
            token.clone(),
            Arc::new(crate::core::progress::NoopPublisher),
            5,
        );
        assert!(ctx.checkpoint().is_ok());
        token.cancel();
        assert_eq!(ctx.checkpoint(), Err(Cancelled));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*boxed), "panic");
    }

    struct NullDriver;

    #[async_trait]
    impl AutomationDriver for NullDriver {
        type Session = ();

        async fn open_session(&self, _identity: &IdentityRecord) -> Result<(), AutomationFault> {
            Ok(())
        }

        async fn run_apply_loop(&self, _session: &mut (), _ctx: &RunContext) -> Result<RawSignal, AutomationFault> {
            Ok(RawSignal::Completed { applied: 0 })
        }

        async fn close(&self, _session: ()) {}
    }
}
