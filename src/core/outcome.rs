//! Outcome kinds and the classifier that maps raw automation results onto them.
//!
//! Classification is total: every [`RawSignal`] maps to exactly one [`OutcomeKind`],
//! and anything unrecognized falls back to [`OutcomeKind::SoftFailure`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of run outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The apply loop finished normally.
    Success,
    /// Recoverable failure such as a transient UI timeout.
    SoftFailure,
    /// The platform signaled throttling.
    RateLimited,
    /// A verification or CAPTCHA-like gate appeared.
    ChallengeDetected,
    /// Account-level restriction signal.
    HardBlock,
    /// The run was cancelled externally.
    Cancelled,
}

impl OutcomeKind {
    /// All kinds, in severity order.
    pub const ALL: [Self; 6] = [
        Self::Success,
        Self::Cancelled,
        Self::SoftFailure,
        Self::RateLimited,
        Self::ChallengeDetected,
        Self::HardBlock,
    ];

    /// Stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SoftFailure => "soft_failure",
            Self::RateLimited => "rate_limited",
            Self::ChallengeDetected => "challenge_detected",
            Self::HardBlock => "hard_block",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// Outcomes that imply the identity needs manual attention.
    #[must_use]
    pub const fn is_policy_violation(self) -> bool {
        matches!(self, Self::ChallengeDetected | Self::HardBlock)
    }

    /// Outcomes that feed cooldown escalation.
    #[must_use]
    pub const fn is_penalizing(self) -> bool {
        !matches!(self, Self::Success | Self::Cancelled)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the browser-automation driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationFault {
    /// Short error class, e.g. `TimeoutException`.
    pub error_type: String,
    /// Human-readable detail.
    pub message: String,
}

impl AutomationFault {
    /// Build a fault from its parts.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for AutomationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

/// Raw result of one automation run, opaque until classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RawSignal {
    /// The apply loop ran to completion.
    Completed {
        /// Applications submitted during the run.
        applied: u32,
    },
    /// The per-run apply budget was exhausted.
    ApplyCapReached {
        /// Applications submitted during the run.
        applied: u32,
    },
    /// An HTTP status observed by the driver.
    HttpStatus {
        /// Status code.
        code: u16,
    },
    /// Text scraped from a blocking page or banner.
    PageText {
        /// Page text.
        text: String,
    },
    /// The driver or the network failed.
    Fault {
        /// Fault detail.
        fault: AutomationFault,
    },
    /// The run exceeded its wall-clock budget.
    Timeout,
    /// The run stopped at a checkpoint after a cancellation request.
    Cancelled,
}

impl RawSignal {
    /// Build a fault signal.
    pub fn fault(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault {
            fault: AutomationFault::new(error_type, message),
        }
    }
}

impl From<AutomationFault> for RawSignal {
    fn from(fault: AutomationFault) -> Self {
        Self::Fault { fault }
    }
}

const RATE_LIMIT_INDICATORS: &[&str] = &[
    "429",
    "rate limit",
    "rate_limit",
    "too many requests",
    "too_many_requests",
    "retry later",
    "temporarily blocked",
    "throttl",
];

const RESTRICTION_INDICATORS: &[&str] = &[
    "account restricted",
    "account_restricted",
    "restricted",
    "suspended",
];

const CHALLENGE_INDICATORS: &[&str] = &[
    "checkpoint",
    "captcha",
    "security check",
    "security_challenge",
    "verification",
    "verify your",
    "unusual activity",
    "unusual sign-in",
    "confirm identity",
    "challenge",
    "suspicious activity",
];

/// Map a raw signal onto exactly one outcome kind.
#[must_use]
pub fn classify(signal: &RawSignal) -> OutcomeKind {
    match signal {
        RawSignal::Completed { .. } | RawSignal::ApplyCapReached { .. } => OutcomeKind::Success,
        RawSignal::Cancelled => OutcomeKind::Cancelled,
        RawSignal::Timeout => OutcomeKind::SoftFailure,
        RawSignal::HttpStatus { code: 429 } => OutcomeKind::RateLimited,
        RawSignal::HttpStatus { .. } => OutcomeKind::SoftFailure,
        RawSignal::PageText { text } => classify_text(text),
        RawSignal::Fault { fault } => {
            let by_message = classify_text(&fault.message);
            if by_message == OutcomeKind::SoftFailure {
                classify_text(&fault.error_type)
            } else {
                by_message
            }
        }
    }
}

/// Rate limiting is checked first, then account restriction, then challenges.
fn classify_text(text: &str) -> OutcomeKind {
    let lower = text.to_lowercase();
    let hit = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    if hit(RATE_LIMIT_INDICATORS) {
        OutcomeKind::RateLimited
    } else if hit(RESTRICTION_INDICATORS) {
        OutcomeKind::HardBlock
    } else if hit(CHALLENGE_INDICATORS) {
        OutcomeKind::ChallengeDetected
    } else {
        OutcomeKind::SoftFailure
    }
}
