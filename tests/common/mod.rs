//! Shared fixtures for integration tests: a scripted automation driver and a store
//! wrapper that can be told to fail reads or outcome writes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apply_governor::config::{CooldownPolicyConfig, SupervisorConfig};
use apply_governor::core::{
    AutomationDriver, AutomationFault, GovernorError, IdentityRecord, IdentityStore, OutcomeWrite,
    RawSignal, RunContext,
};
use apply_governor::infra::InMemoryIdentityStore;
use apply_governor::util::serde::IdentityId;
use async_trait::async_trait;

// ============================================================================
// SCRIPTED DRIVER
// ============================================================================

/// What the driver does on each run.
#[derive(Clone, Debug)]
pub enum Script {
    /// Return the signal after a short pause.
    Signal(RawSignal),
    /// Fail while opening the session.
    OpenFault(AutomationFault),
    /// Panic while opening the session.
    PanicOnOpen,
    /// Finish the loop with the signal, then panic while closing the session.
    PanicOnClose(RawSignal),
    /// Fail inside the apply loop.
    LoopFault(AutomationFault),
    /// Panic inside the apply loop.
    Panic,
    /// Sleep forever, ignoring cancellation.
    Hang,
    /// Poll the cancellation checkpoint until cancelled.
    WaitForCancel,
    /// Hold the session for a while, then return the signal.
    Sleep(Duration, RawSignal),
    /// Count apply attempts until the budget runs out.
    ApplyUntilCap,
}

/// Counters shared between a test and the driver it handed to the supervisor.
#[derive(Default)]
pub struct DriverStats {
    pub opened: AtomicU32,
    pub closed: AtomicU32,
    pub live_sessions: AtomicI32,
    pub max_live_sessions: AtomicI32,
}

impl DriverStats {
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> i32 {
        self.live_sessions.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> i32 {
        self.max_live_sessions.load(Ordering::SeqCst)
    }
}

/// Browser session stand-in; dropping it releases the "browser context".
pub struct FakeSession {
    stats: Arc<DriverStats>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.stats.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedDriver {
    script: Script,
    stats: Arc<DriverStats>,
}

impl ScriptedDriver {
    pub fn new(script: Script) -> (Self, Arc<DriverStats>) {
        let stats = Arc::new(DriverStats::default());
        (
            Self {
                script,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }
}

#[async_trait]
impl AutomationDriver for ScriptedDriver {
    type Session = FakeSession;

    async fn open_session(&self, _identity: &IdentityRecord) -> Result<FakeSession, AutomationFault> {
        match &self.script {
            Script::OpenFault(fault) => return Err(fault.clone()),
            Script::PanicOnOpen => panic!("browser failed to launch"),
            _ => {}
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live_sessions.fetch_max(live, Ordering::SeqCst);
        Ok(FakeSession {
            stats: Arc::clone(&self.stats),
        })
    }

    async fn run_apply_loop(
        &self,
        _session: &mut FakeSession,
        ctx: &RunContext,
    ) -> Result<RawSignal, AutomationFault> {
        ctx.report("searching");
        match &self.script {
            Script::Signal(signal) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(signal.clone())
            }
            Script::OpenFault(_) | Script::PanicOnOpen => unreachable!("session never opened"),
            Script::PanicOnClose(signal) => Ok(signal.clone()),
            Script::LoopFault(fault) => Err(fault.clone()),
            Script::Panic => panic!("driver exploded mid-run"),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(RawSignal::Completed { applied: 0 })
            }
            Script::WaitForCancel => loop {
                if let Err(cancelled) = ctx.checkpoint() {
                    return Ok(cancelled.into());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            Script::Sleep(duration, signal) => {
                tokio::time::sleep(*duration).await;
                Ok(signal.clone())
            }
            Script::ApplyUntilCap => {
                let mut applied = 0;
                while ctx.record_apply_attempt() {
                    applied += 1;
                    ctx.report(format!("applied {applied}"));
                }
                Ok(RawSignal::ApplyCapReached { applied })
            }
        }
    }

    async fn close(&self, session: FakeSession) {
        if matches!(self.script, Script::PanicOnClose(_)) {
            panic!("browser crashed on quit");
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        drop(session);
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// In-memory store whose reads and outcome writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryIdentityStore,
    fail_outcome_writes: AtomicBool,
    failed_writes: AtomicU32,
    reads_to_fail: AtomicU32,
    failed_reads: AtomicU32,
}

impl FlakyStore {
    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.reads_to_fail.store(count, Ordering::SeqCst);
    }

    pub fn failed_reads(&self) -> u32 {
        self.failed_reads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_outcome_writes.store(failing, Ordering::SeqCst);
    }

    pub fn failed_writes(&self) -> u32 {
        self.failed_writes.load(Ordering::SeqCst)
    }
}

impl IdentityStore for FlakyStore {
    fn get(&self, id: &IdentityId) -> Result<Option<IdentityRecord>, GovernorError> {
        let failing = self
            .reads_to_fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.failed_reads.fetch_add(1, Ordering::SeqCst);
            return Err(GovernorError::Persistence("disk I/O error".into()));
        }
        self.inner.get(id)
    }

    fn register(&self, id: &IdentityId, credentials_ref: Option<&str>) -> Result<(), GovernorError> {
        self.inner.register(id, credentials_ref)
    }

    fn conditional_set_running(&self, id: &IdentityId, now_ms: u128) -> Result<bool, GovernorError> {
        self.inner.conditional_set_running(id, now_ms)
    }

    fn set_cooldown_and_clear_running(
        &self,
        id: &IdentityId,
        running_since_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError> {
        if self.fail_outcome_writes.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(GovernorError::Persistence("database is locked".into()));
        }
        self.inner.set_cooldown_and_clear_running(id, running_since_ms, write)
    }

    fn clear_cooldown(&self, id: &IdentityId) -> Result<bool, GovernorError> {
        self.inner.clear_cooldown(id)
    }

    fn stale_running(&self, started_before_ms: u128) -> Result<Vec<IdentityRecord>, GovernorError> {
        self.inner.stale_running(started_before_ms)
    }

    fn release_stale(
        &self,
        id: &IdentityId,
        started_before_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError> {
        self.inner.release_stale(id, started_before_ms, write)
    }
}

// ============================================================================
// CONFIG HELPERS
// ============================================================================

/// Supervisor settings with short waits for tests.
pub fn fast_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        max_run_secs: 1,
        cancel_grace_ms: 50,
        persist_retries: 2,
        persist_retry_backoff_ms: 1,
        stale_lock_grace_secs: 1,
        max_applies_per_run: 5,
    }
}

/// Default policy with a ceiling low enough to hit in two steps.
pub fn capped_policy_config() -> CooldownPolicyConfig {
    CooldownPolicyConfig {
        soft_failure_secs: 600,
        rate_limited_secs: 3_600,
        challenge_detected_secs: 3_600,
        hard_block_secs: 3_600,
        backoff_multiplier: 2.0,
        max_cooldown_secs: 5_400,
        lookback_secs: 86_400,
        reset_on_success: true,
        history_limit: 32,
    }
}
