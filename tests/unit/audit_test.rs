//! Tests for audit sink

use apply_governor::core::{build_audit_event, AuditSink, InMemoryAuditSink, TracingAuditSink};
use apply_governor::util::serde::{IdentityId, RunId};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let run_id = RunId::new_v4();

    let event = build_audit_event(
        IdentityId::from("acct-1"),
        Some(run_id),
        "start",
        1_000,
        Some("detail".to_string()),
    );
    sink.record(event);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, format!("acct-1-{run_id}-start-1000"));
    assert_eq!(events[0].action, "start");
    assert_eq!(events[0].run_id, Some(run_id));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    for (at, action) in [(1, "admit"), (2, "start"), (3, "complete")] {
        sink.record(build_audit_event(IdentityId::from("a"), None, action, at, None));
    }

    let actions: Vec<_> = sink.events().into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec!["start", "complete"]);
}

#[test]
fn test_events_for_identity() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event(IdentityId::from("a"), None, "admit", 1, None));
    sink.record(build_audit_event(IdentityId::from("b"), None, "reject_running", 2, None));
    sink.record(build_audit_event(IdentityId::from("a"), None, "clear_cooldown", 3, None));

    let for_a = sink.events_for(&IdentityId::from("a"));
    assert_eq!(for_a.len(), 2);
    assert_eq!(for_a[1].event_id, "a-clear_cooldown-3");
}

#[test]
fn test_zero_capacity_sink_drops_everything() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event(IdentityId::from("a"), None, "admit", 1, None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_tracing_sink_accepts_events() {
    let mut sink = TracingAuditSink;
    sink.record(build_audit_event(IdentityId::from("a"), None, "timeout", 1, None));
}
