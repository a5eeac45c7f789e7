//! Tests for progress publishers

use apply_governor::core::{NoopPublisher, OutcomeKind, ProgressPublisher, RunEvent};
use apply_governor::infra::{BroadcastPublisher, InMemoryProgressMailbox};
use apply_governor::util::serde::{IdentityId, RunId};

#[test]
fn test_in_memory_mailbox_publish_and_fetch() {
    let mailbox = InMemoryProgressMailbox::new(10);
    let id = IdentityId::from("acct-1");
    let run_id = RunId::new_v4();

    mailbox.publish(&id, RunEvent::Admitted);
    mailbox.publish(&id, RunEvent::Started { run_id });

    let messages = mailbox.fetch(&id, None, 10);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].event, RunEvent::Started { run_id });
    assert_eq!(mailbox.fetch(&id, None, 1).len(), 1);
    assert!(mailbox.fetch(&IdentityId::from("other"), None, 10).is_empty());
}

#[test]
fn test_in_memory_mailbox_is_bounded_per_identity() {
    let mailbox = InMemoryProgressMailbox::new(2);
    let id = IdentityId::from("acct-1");
    let run_id = RunId::new_v4();
    for step in ["login", "search", "apply"] {
        mailbox.publish(&id, RunEvent::Step { run_id, step: step.into() });
    }

    let steps: Vec<String> = mailbox
        .events(&id)
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::Step { step, .. } => Some(step),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec!["search", "apply"]);
}

#[test]
fn test_fetch_since_timestamp() {
    let mailbox = InMemoryProgressMailbox::default();
    let id = IdentityId::from("acct-1");
    mailbox.publish(&id, RunEvent::Admitted);

    let far_future = u128::MAX;
    assert!(mailbox.fetch(&id, Some(far_future), 10).is_empty());
    assert_eq!(mailbox.fetch(&id, Some(0), 10).len(), 1);
}

#[tokio::test]
async fn test_broadcast_publisher_delivers_to_subscribers() {
    let publisher = BroadcastPublisher::new(8);
    let mut rx = publisher.subscribe();
    let id = IdentityId::from("acct-2");
    let run_id = RunId::new_v4();

    publisher.publish(
        &id,
        RunEvent::Finished {
            run_id,
            outcome: OutcomeKind::RateLimited,
            cooldown_until: Some(42),
        },
    );

    let message = rx.recv().await.unwrap();
    assert_eq!(message.identity_id, id);
    assert!(matches!(message.event, RunEvent::Finished { cooldown_until: Some(42), .. }));
}

#[test]
fn test_publishing_without_listeners_is_harmless() {
    let publisher = BroadcastPublisher::new(1);
    publisher.publish(&IdentityId::from("a"), RunEvent::Admitted);
    NoopPublisher.publish(&IdentityId::from("a"), RunEvent::Admitted);
}

#[test]
fn test_run_event_wire_format() {
    let json = serde_json::to_value(RunEvent::ManualAttentionRequired {
        run_id: RunId::nil(),
        outcome: OutcomeKind::ChallengeDetected,
    })
    .unwrap();
    assert_eq!(json["event"], "manual_attention_required");
    assert_eq!(json["outcome"], "challenge_detected");
}
