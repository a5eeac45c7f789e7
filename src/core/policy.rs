//! Cooldown policy engine.
//!
//! A pure function of `(outcome, history, now)`. Wall-clock time is always passed in,
//! so escalation is deterministic under test.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CooldownPolicyConfig;
use crate::core::outcome::OutcomeKind;
use crate::core::GovernorError;
use crate::util::clock::add_duration;

/// One recorded outcome in an identity's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    /// Outcome of the run.
    pub kind: OutcomeKind,
    /// When the outcome was recorded (ms since epoch).
    pub at_ms: u128,
}

/// The part of an identity record the policy engine reads.
#[derive(Debug, Clone, Copy)]
pub struct IdentityHistory<'a> {
    /// Cooldown currently stored for the identity.
    pub cooldown_until: Option<u128>,
    /// Recent outcomes, oldest first.
    pub recent: &'a [OutcomeEvent],
}

impl IdentityHistory<'static> {
    /// History of an identity that has never run.
    pub const EMPTY: Self = Self {
        cooldown_until: None,
        recent: &[],
    };
}

/// Result of applying the policy to one outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownDecision {
    /// Outcome to persist as `last_outcome`.
    pub outcome: OutcomeKind,
    /// Cooldown computed for this occurrence (zero when none applies).
    pub cooldown: Duration,
    /// Resulting eligibility timestamp; `None` means immediately eligible.
    pub cooldown_until: Option<u128>,
    /// Earlier occurrences of the same kind inside the lookback window.
    pub repeats: u32,
    /// The identity needs an operator before it should run again.
    pub requires_manual_clearance: bool,
}

/// Maps outcomes to cooldowns with escalation on repeats.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    config: CooldownPolicyConfig,
}

impl CooldownPolicy {
    /// Build a policy from validated configuration.
    ///
    /// # Errors
    /// Returns [`GovernorError::InvalidConfig`] when the configuration is inconsistent.
    pub fn new(config: CooldownPolicyConfig) -> Result<Self, GovernorError> {
        config.validate().map_err(GovernorError::InvalidConfig)?;
        Ok(Self { config })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CooldownPolicyConfig {
        &self.config
    }

    /// Decide the cooldown for `kind` given the identity's history at `now_ms`.
    #[must_use]
    pub fn decide(&self, kind: OutcomeKind, history: &IdentityHistory<'_>, now_ms: u128) -> CooldownDecision {
        let repeats = if kind.is_penalizing() {
            self.repeats_in_window(kind, history, now_ms)
        } else {
            0
        };
        let cooldown = self.duration_for(kind, repeats);
        let proposed = (!cooldown.is_zero()).then(|| add_duration(now_ms, cooldown));
        // Cooldowns never shrink: an active stored cooldown wins if it ends later.
        let active = history.cooldown_until.filter(|until| *until > now_ms);
        let cooldown_until = match (active, proposed) {
            (Some(a), Some(p)) => Some(a.max(p)),
            (a, p) => a.or(p),
        };

        CooldownDecision {
            outcome: kind,
            cooldown,
            cooldown_until,
            repeats,
            requires_manual_clearance: kind.is_policy_violation(),
        }
    }

    /// Count earlier occurrences of `kind` within the lookback window.
    #[must_use]
    pub fn repeats_in_window(&self, kind: OutcomeKind, history: &IdentityHistory<'_>, now_ms: u128) -> u32 {
        let lookback_ms = u128::from(self.config.lookback_secs) * 1_000;
        let start = if self.config.reset_on_success {
            history
                .recent
                .iter()
                .rposition(|e| e.kind == OutcomeKind::Success)
                .map_or(0, |idx| idx + 1)
        } else {
            0
        };
        let count = history.recent[start..]
            .iter()
            .filter(|e| e.kind == kind && now_ms.saturating_sub(e.at_ms) < lookback_ms)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Cooldown for the `repeats + 1`-th occurrence of `kind`, capped at the ceiling.
    #[must_use]
    pub fn duration_for(&self, kind: OutcomeKind, repeats: u32) -> Duration {
        let base = self.config.base_for(kind);
        if base.is_zero() {
            return Duration::ZERO;
        }
        let ceiling = self.config.ceiling();
        let exponent = i32::try_from(repeats).unwrap_or(i32::MAX);
        let scaled = base.as_secs_f64() * self.config.backoff_multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= ceiling.as_secs_f64() {
            ceiling
        } else {
            Duration::from_secs_f64(scaled).max(base)
        }
    }
}
