//! Background run dispatcher.
//!
//! Drains a queue of scheduled runs, enforcing a global concurrency limit with
//! lock-free capacity reservation. Each ready entry goes through admission; rejected
//! entries are re-queued for when they can next succeed.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::core::admission::{AdmissionController, AdmissionDecision};
use crate::core::progress::RunEvent;
use crate::core::supervisor::{AutomationDriver, RunSupervisor};
use crate::core::GovernorError;
use crate::util::clock::now_ms;
use crate::util::serde::{IdentityId, Priority};

/// A queued request to run an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRun {
    /// Identity to run.
    pub identity_id: IdentityId,
    /// Queue ordering.
    pub priority: Priority,
    /// Earliest start (ms since epoch).
    pub not_before_ms: u128,
    /// Drop the entry if it has not started by then.
    pub deadline_ms: Option<u128>,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
    /// Admission attempts so far.
    pub attempts: u32,
}

impl ScheduledRun {
    /// An entry ready immediately.
    #[must_use]
    pub const fn new(identity_id: IdentityId, priority: Priority, now_ms: u128) -> Self {
        Self {
            identity_id,
            priority,
            not_before_ms: now_ms,
            deadline_ms: None,
            created_at_ms: now_ms,
            attempts: 0,
        }
    }

    /// Set an absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline_ms: u128) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Whether the entry may start at `now_ms`.
    #[must_use]
    pub const fn is_ready(&self, now_ms: u128) -> bool {
        self.not_before_ms <= now_ms
    }

    /// Whether the deadline has passed at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u128) -> bool {
        self.deadline_ms.is_some_and(|deadline| deadline <= now_ms)
    }
}

/// Abstraction for run queue backends.
pub trait RunQueue: Send {
    /// Enqueue a run if space permits.
    ///
    /// # Errors
    /// [`GovernorError::QueueFull`] at capacity.
    fn enqueue(&mut self, run: ScheduledRun) -> Result<(), GovernorError>;
    /// Remove and return the highest-priority entry that is ready at `now_ms`.
    fn dequeue_ready(&mut self, now_ms: u128) -> Option<ScheduledRun>;
    /// Remove expired entries and return the count.
    fn prune_expired(&mut self, now_ms: u128) -> usize;
    /// Earliest `not_before_ms` among queued entries.
    fn next_ready_at(&self) -> Option<u128>;
    /// Maximum depth allowed for this queue.
    fn max_depth(&self) -> usize;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Abstraction for spawning run execution on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// What a single dispatcher pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Runs admitted and spawned.
    pub started: usize,
    /// Entries re-queued after a rejection.
    pub deferred: usize,
    /// Entries dropped for an expired deadline.
    pub pruned: usize,
}

/// Dispatches queued runs under a global concurrency limit.
pub struct RunDispatcher<D: AutomationDriver, Q, S> {
    admission: AdmissionController,
    supervisor: RunSupervisor<D>,
    queue: Arc<Mutex<Q>>,
    spawner: S,
    /// Runs currently executing.
    active_runs: Arc<AtomicU32>,
    /// Signalled on submit and when a run finishes.
    wake: Arc<Notify>,
    config: DispatcherConfig,
}

impl<D: AutomationDriver, Q, S: Clone> Clone for RunDispatcher<D, Q, S> {
    fn clone(&self) -> Self {
        Self {
            admission: self.admission.clone(),
            supervisor: self.supervisor.clone(),
            queue: Arc::clone(&self.queue),
            spawner: self.spawner.clone(),
            active_runs: Arc::clone(&self.active_runs),
            wake: Arc::clone(&self.wake),
            config: self.config.clone(),
        }
    }
}

impl<D, Q, S> RunDispatcher<D, Q, S>
where
    D: AutomationDriver,
    Q: RunQueue + 'static,
    S: Spawn + Clone + Send + 'static,
{
    /// Create a dispatcher from components.
    #[must_use]
    pub fn new(
        admission: AdmissionController,
        supervisor: RunSupervisor<D>,
        queue: Q,
        spawner: S,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            admission,
            supervisor,
            queue: Arc::new(Mutex::new(queue)),
            spawner,
            active_runs: Arc::new(AtomicU32::new(0)),
            wake: Arc::new(Notify::new()),
            config,
        }
    }

    /// Runs currently executing.
    #[must_use]
    pub fn active_runs(&self) -> u32 {
        self.active_runs.load(Ordering::Acquire)
    }

    /// Entries waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue a run.
    ///
    /// # Errors
    /// [`GovernorError::DeadlineExpired`] if the deadline already passed,
    /// [`GovernorError::QueueFull`] at capacity.
    pub fn submit(&self, run: ScheduledRun, now_ms: u128) -> Result<(), GovernorError> {
        if run.is_expired(now_ms) {
            tracing::warn!(identity = %run.identity_id, "scheduled run expired before enqueue");
            return Err(GovernorError::DeadlineExpired);
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.config.max_queue_depth {
                tracing::warn!(
                    identity = %run.identity_id,
                    depth = queue.len(),
                    "scheduled run rejected: queue full"
                );
                return Err(GovernorError::QueueFull("max queue depth reached".into()));
            }
            queue.enqueue(run)?;
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Try to reserve a run slot atomically using a CAS loop.
    fn try_reserve_slot(&self) -> bool {
        let mut current = self.active_runs.load(Ordering::Acquire);
        loop {
            if current >= self.config.max_concurrent_runs {
                return false;
            }
            match self.active_runs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release_slot(&self) {
        self.active_runs.fetch_sub(1, Ordering::Release);
    }

    /// Start every ready entry that fits under the concurrency limit.
    ///
    /// Each queued entry is considered at most once per pass: rejected entries are
    /// put back only after the pass ends.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when admission cannot reach the store; the
    /// entry is re-queued and the pass stops.
    pub fn tick(&self, now_ms: u128) -> Result<DispatchSummary, GovernorError> {
        let mut summary = DispatchSummary {
            pruned: self.queue.lock().prune_expired(now_ms),
            ..DispatchSummary::default()
        };
        if summary.pruned > 0 {
            tracing::info!(pruned = summary.pruned, "dropped expired scheduled runs");
        }

        let busy_retry = u128::from(self.config.busy_retry_ms.max(1));
        let mut deferred = Vec::new();
        let mut outcome = Ok(());
        while self.try_reserve_slot() {
            let Some(mut entry) = self.queue.lock().dequeue_ready(now_ms) else {
                self.release_slot();
                break;
            };
            entry.attempts = entry.attempts.saturating_add(1);
            let decision = match self.admission.admit(&entry.identity_id, now_ms) {
                Ok(decision) => decision,
                Err(e) => {
                    self.release_slot();
                    entry.not_before_ms = now_ms + busy_retry;
                    deferred.push(entry);
                    outcome = Err(e);
                    break;
                }
            };
            match decision {
                AdmissionDecision::Admitted => {
                    summary.started += 1;
                    self.spawn_run(entry.identity_id, now_ms);
                }
                AdmissionDecision::RejectedCooldown { until, .. } => {
                    self.release_slot();
                    entry.not_before_ms = until;
                    deferred.push(entry);
                    summary.deferred += 1;
                }
                AdmissionDecision::RejectedAlreadyRunning => {
                    self.release_slot();
                    entry.not_before_ms = now_ms + busy_retry;
                    deferred.push(entry);
                    summary.deferred += 1;
                }
            }
        }
        for entry in deferred {
            self.requeue(entry);
        }
        outcome.map(|()| summary)
    }

    fn requeue(&self, entry: ScheduledRun) {
        let identity = entry.identity_id.clone();
        let not_before_ms = entry.not_before_ms;
        match self.queue.lock().enqueue(entry) {
            Ok(()) => tracing::debug!(identity = %identity, not_before_ms, "scheduled run deferred"),
            Err(e) => tracing::warn!(identity = %identity, error = %e, "scheduled run dropped"),
        }
    }

    fn spawn_run(&self, identity: IdentityId, admitted_at_ms: u128) {
        let supervisor = self.supervisor.clone();
        let active_runs = Arc::clone(&self.active_runs);
        let wake = Arc::clone(&self.wake);
        supervisor.publisher().publish(&identity, RunEvent::Admitted);
        let token = supervisor.register_cancellation(&identity, admitted_at_ms);

        self.spawner.spawn(async move {
            if let Err(e) = supervisor.execute_with_token(&identity, token, admitted_at_ms).await {
                tracing::error!(identity = %identity, error = %e, "dispatched run failed");
            }
            active_runs.fetch_sub(1, Ordering::Release);
            wake.notify_one();
        });
    }

    /// Dispatch until `shutdown` is cancelled.
    ///
    /// Each pass waits for a submit, a finished run, the next ready entry or the
    /// poll interval, whichever comes first.
    pub async fn run_until(&self, shutdown: CancellationToken) {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        tracing::info!(
            max_concurrent_runs = self.config.max_concurrent_runs,
            "dispatcher started"
        );
        loop {
            let now = now_ms();
            if let Err(e) = self.tick(now) {
                tracing::warn!(error = %e, "dispatch pass failed");
            }
            // Entries already ready but blocked on capacity wait for a finished run.
            let next_ready = self.queue.lock().next_ready_at().filter(|at| *at > now);
            let wait = next_ready.map_or(poll, |at| {
                let until_ready = u64::try_from(at.saturating_sub(now)).unwrap_or(u64::MAX);
                Duration::from_millis(until_ready).min(poll)
            });
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
        tracing::info!("dispatcher stopped");
    }
}
