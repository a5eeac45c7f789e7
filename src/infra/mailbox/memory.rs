//! In-memory progress mailbox.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::core::progress::{ProgressMessage, ProgressPublisher, RunEvent};
use crate::util::clock::now_ms;
use crate::util::serde::IdentityId;

/// Mailbox keeping the latest events per identity for clients that poll
/// or reconnect after missing the live stream.
pub struct InMemoryProgressMailbox {
    messages: Mutex<HashMap<IdentityId, VecDeque<ProgressMessage>>>,
    max_per_identity: usize,
}

impl InMemoryProgressMailbox {
    /// Create a mailbox retaining at most `max_per_identity` events per identity.
    #[must_use]
    pub fn new(max_per_identity: usize) -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            max_per_identity: max_per_identity.max(1),
        }
    }

    /// Fetch messages for an identity, optionally since a timestamp.
    #[must_use]
    pub fn fetch(&self, identity: &IdentityId, since_ms: Option<u128>, limit: usize) -> Vec<ProgressMessage> {
        self.messages
            .lock()
            .get(identity)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| since_ms.is_none_or(|s| m.created_at_ms >= s))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Events only, oldest first.
    #[must_use]
    pub fn events(&self, identity: &IdentityId) -> Vec<RunEvent> {
        self.fetch(identity, None, usize::MAX)
            .into_iter()
            .map(|m| m.event)
            .collect()
    }
}

impl Default for InMemoryProgressMailbox {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressPublisher for InMemoryProgressMailbox {
    fn publish(&self, identity: &IdentityId, event: RunEvent) {
        let mut messages = self.messages.lock();
        let entry = messages.entry(identity.clone()).or_default();
        if entry.len() >= self.max_per_identity {
            entry.pop_front();
        }
        entry.push_back(ProgressMessage {
            identity_id: identity.clone(),
            event,
            created_at_ms: now_ms(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_events_per_identity() {
        let mailbox = InMemoryProgressMailbox::new(2);
        let id = IdentityId::from("a");
        mailbox.publish(&id, RunEvent::Admitted);
        mailbox.publish(&id, RunEvent::Started { run_id: uuid::Uuid::nil() });
        mailbox.publish(&id, RunEvent::Step { run_id: uuid::Uuid::nil(), step: "form".into() });
        let events = mailbox.events(&id);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], RunEvent::Step { .. }));
        assert!(mailbox.events(&IdentityId::from("b")).is_empty());
    }
}
