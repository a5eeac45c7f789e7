//! Wall-clock helpers. Every timestamp in the crate is milliseconds since the Unix epoch.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

/// Add a duration to a millisecond timestamp, saturating on overflow.
#[must_use]
pub const fn add_duration(at_ms: u128, duration: Duration) -> u128 {
    at_ms.saturating_add(duration.as_millis())
}
