//! Tests for error types

use apply_governor::core::{GovernorError, RunState};
use apply_governor::util::serde::IdentityId;

#[test]
fn test_persistence_error() {
    let err = GovernorError::Persistence("database is locked".to_string());
    assert_eq!(format!("{err}"), "persistence error: database is locked");
    assert!(err.is_retryable());
}

#[test]
fn test_invalid_transition_error() {
    let err = GovernorError::InvalidTransition {
        from: RunState::Succeeded,
        to: RunState::Running,
    };
    assert_eq!(format!("{err}"), "invalid run transition: Succeeded -> Running");
    assert!(!err.is_retryable());
}

#[test]
fn test_unknown_identity_error() {
    let err = GovernorError::UnknownIdentity(IdentityId::from("acct-9"));
    assert_eq!(format!("{err}"), "unknown identity: acct-9");
}

#[test]
fn test_queue_errors() {
    assert_eq!(
        format!("{}", GovernorError::QueueFull("max queue depth reached".into())),
        "queue full: max queue depth reached"
    );
    assert_eq!(format!("{}", GovernorError::DeadlineExpired), "deadline expired");
    assert!(!GovernorError::DeadlineExpired.is_retryable());
}

#[test]
fn test_error_into_anyhow() {
    let result: apply_governor::core::AppResult<()> =
        Err(GovernorError::InvalidConfig("lookback_secs must be greater than 0".into()).into());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("lookback_secs"));
}
