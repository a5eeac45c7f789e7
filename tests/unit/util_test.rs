//! Tests for utility functions

use std::time::Duration;

use apply_governor::util::{add_duration, now_ms, IdentityId, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_identity_id_serializes_transparently() {
    let id = IdentityId::from("acct-1");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"acct-1\"");
    let back: IdentityId = serde_json::from_str("\"acct-1\"").unwrap();
    assert_eq!(back, id);
    assert_eq!(id.to_string(), "acct-1");
}

#[test]
fn test_clock_helpers() {
    let now = now_ms();
    assert!(now > 1_600_000_000_000);
    assert_eq!(add_duration(1_000, Duration::from_secs(2)), 3_000);
    assert_eq!(add_duration(u128::MAX, Duration::from_secs(1)), u128::MAX);
}

#[test]
fn test_priority_wire_format() {
    assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
}
