//! Governor configuration structures.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::outcome::OutcomeKind;
use crate::core::AppResult;

/// Record store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// Process-local store for development/testing.
    #[default]
    InMemory,
    /// SQLite file shared by every worker process on the host.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

/// Cooldown durations and escalation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownPolicyConfig {
    /// Base cooldown after a soft failure (seconds).
    pub soft_failure_secs: u64,
    /// Base cooldown after a rate-limit signal (seconds).
    pub rate_limited_secs: u64,
    /// Base cooldown after a verification challenge (seconds).
    pub challenge_detected_secs: u64,
    /// Base cooldown after an account restriction (seconds).
    pub hard_block_secs: u64,
    /// Factor applied per earlier occurrence inside the lookback window.
    pub backoff_multiplier: f64,
    /// Ceiling for any single cooldown (seconds).
    pub max_cooldown_secs: u64,
    /// Rolling window in which repeats escalate (seconds).
    pub lookback_secs: u64,
    /// Only count repeats after the most recent success.
    pub reset_on_success: bool,
    /// Outcome events retained per identity.
    pub history_limit: usize,
}

impl Default for CooldownPolicyConfig {
    fn default() -> Self {
        Self {
            soft_failure_secs: 600,
            rate_limited_secs: 3_600,
            challenge_detected_secs: 43_200,
            hard_block_secs: 604_800,
            backoff_multiplier: 2.0,
            max_cooldown_secs: 604_800,
            lookback_secs: 86_400,
            reset_on_success: true,
            history_limit: 32,
        }
    }
}

impl CooldownPolicyConfig {
    /// Base cooldown for an outcome kind.
    #[must_use]
    pub const fn base_for(&self, kind: OutcomeKind) -> Duration {
        let secs = match kind {
            OutcomeKind::Success | OutcomeKind::Cancelled => 0,
            OutcomeKind::SoftFailure => self.soft_failure_secs,
            OutcomeKind::RateLimited => self.rate_limited_secs,
            OutcomeKind::ChallengeDetected => self.challenge_detected_secs,
            OutcomeKind::HardBlock => self.hard_block_secs,
        };
        Duration::from_secs(secs)
    }

    /// Ceiling as a duration.
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs)
    }

    /// Validate policy values.
    ///
    /// # Errors
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        for kind in OutcomeKind::ALL.into_iter().filter(|k| k.is_penalizing()) {
            let base = self.base_for(kind);
            if base.is_zero() {
                return Err(format!("{kind} cooldown must be greater than 0"));
            }
            if base > self.ceiling() {
                return Err(format!("{kind} cooldown exceeds max_cooldown_secs"));
            }
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be a finite value >= 1.0".into());
        }
        if self.lookback_secs == 0 {
            return Err("lookback_secs must be greater than 0".into());
        }
        if self.history_limit == 0 {
            return Err("history_limit must be greater than 0".into());
        }
        Ok(())
    }
}

/// Run supervision limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Hard wall-clock budget for one run (seconds).
    pub max_run_secs: u64,
    /// Time a cancelled run gets to reach a checkpoint before it is aborted (ms).
    pub cancel_grace_ms: u64,
    /// Extra attempts for the final outcome write.
    pub persist_retries: u32,
    /// Delay between outcome write attempts (ms).
    pub persist_retry_backoff_ms: u64,
    /// Slack past `max_run_secs` before a running flag counts as stale (seconds).
    pub stale_lock_grace_secs: u64,
    /// Apply attempts allowed in one run.
    pub max_applies_per_run: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_run_secs: 900,
            cancel_grace_ms: 5_000,
            persist_retries: 3,
            persist_retry_backoff_ms: 200,
            stale_lock_grace_secs: 300,
            max_applies_per_run: 5,
        }
    }
}

impl SupervisorConfig {
    /// Run budget as a duration.
    #[must_use]
    pub const fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }

    /// Cancellation grace as a duration.
    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Age after which a running flag may be reclaimed.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.max_run_secs.saturating_add(self.stale_lock_grace_secs))
    }

    /// Validate supervisor values.
    ///
    /// # Errors
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_run_secs == 0 {
            return Err("max_run_secs must be greater than 0".into());
        }
        if self.max_applies_per_run == 0 {
            return Err("max_applies_per_run must be greater than 0".into());
        }
        Ok(())
    }
}

/// Background queue dispatching limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Runs allowed at once across all identities.
    pub max_concurrent_runs: u32,
    /// Queued entries before submissions are rejected.
    pub max_queue_depth: usize,
    /// Delay before retrying an identity that was already running (ms).
    pub busy_retry_ms: u64,
    /// Idle wait between queue scans (ms).
    pub poll_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 3,
            max_queue_depth: 1_000,
            busy_retry_ms: 30_000,
            poll_interval_ms: 5_000,
        }
    }
}

impl DispatcherConfig {
    /// Validate dispatcher values.
    ///
    /// # Errors
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_runs == 0 {
            return Err("max_concurrent_runs must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.busy_retry_ms == 0 {
            return Err("busy_retry_ms must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Cooldown policy.
    pub policy: CooldownPolicyConfig,
    /// Run supervision.
    pub supervisor: SupervisorConfig,
    /// Queue dispatching.
    pub dispatcher: DispatcherConfig,
    /// Record store backend.
    pub store: StoreBackendConfig,
}

impl GovernorConfig {
    /// Validate every section.
    ///
    /// # Errors
    /// Returns the first failing section and field.
    pub fn validate(&self) -> Result<(), String> {
        self.policy.validate().map_err(|e| format!("policy invalid: {e}"))?;
        self.supervisor
            .validate()
            .map_err(|e| format!("supervisor invalid: {e}"))?;
        self.dispatcher
            .validate()
            .map_err(|e| format!("dispatcher invalid: {e}"))?;
        if let StoreBackendConfig::Sqlite { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err("store invalid: sqlite path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    /// Returns parse or validation errors as text.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment, reading `.env` first when present.
    ///
    /// `GOVERNOR_CONFIG` may point at a JSON file used as the base; individual
    /// `GOVERNOR_*` variables override it.
    ///
    /// # Errors
    /// Fails when a variable does not parse or the result does not validate.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var("GOVERNOR_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading GOVERNOR_CONFIG at {path}"))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
            }
            Err(_) => Self::default(),
        };

        let policy = &mut cfg.policy;
        override_from_env("GOVERNOR_SOFT_FAILURE_COOLDOWN_SECS", &mut policy.soft_failure_secs)?;
        override_from_env("GOVERNOR_RATE_LIMITED_COOLDOWN_SECS", &mut policy.rate_limited_secs)?;
        override_from_env("GOVERNOR_CHALLENGE_COOLDOWN_SECS", &mut policy.challenge_detected_secs)?;
        override_from_env("GOVERNOR_HARD_BLOCK_COOLDOWN_SECS", &mut policy.hard_block_secs)?;
        override_from_env("GOVERNOR_BACKOFF_MULTIPLIER", &mut policy.backoff_multiplier)?;
        override_from_env("GOVERNOR_MAX_COOLDOWN_SECS", &mut policy.max_cooldown_secs)?;
        override_from_env("GOVERNOR_LOOKBACK_SECS", &mut policy.lookback_secs)?;

        let supervisor = &mut cfg.supervisor;
        override_from_env("GOVERNOR_MAX_RUN_SECS", &mut supervisor.max_run_secs)?;
        override_from_env("GOVERNOR_CANCEL_GRACE_MS", &mut supervisor.cancel_grace_ms)?;
        override_from_env("GOVERNOR_MAX_APPLIES_PER_RUN", &mut supervisor.max_applies_per_run)?;

        let dispatcher = &mut cfg.dispatcher;
        override_from_env("GOVERNOR_MAX_CONCURRENT_RUNS", &mut dispatcher.max_concurrent_runs)?;
        override_from_env("GOVERNOR_POLL_INTERVAL_MS", &mut dispatcher.poll_interval_ms)?;

        if let Ok(path) = std::env::var("GOVERNOR_SQLITE_PATH") {
            cfg.store = StoreBackendConfig::Sqlite { path: path.into() };
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn override_from_env<T>(key: &str, slot: &mut T) -> AppResult<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("{key}={raw} is not valid"))?;
    }
    Ok(())
}
