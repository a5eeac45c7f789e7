//! Broadcast publisher feeding a real-time channel (e.g. a WebSocket fan-out).

use tokio::sync::broadcast;

use crate::core::progress::{ProgressMessage, ProgressPublisher, RunEvent};
use crate::util::clock::now_ms;
use crate::util::serde::IdentityId;

/// Publisher backed by a `tokio::sync::broadcast` channel.
///
/// Slow subscribers lag and lose old messages instead of blocking the run.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ProgressMessage>,
}

impl BroadcastPublisher {
    /// Create a publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every identity's events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressMessage> {
        self.tx.subscribe()
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, identity: &IdentityId, event: RunEvent) {
        let msg = ProgressMessage {
            identity_id: identity.clone(),
            event,
            created_at_ms: now_ms(),
        };
        if self.tx.send(msg).is_err() {
            tracing::trace!(identity = %identity, "no progress subscribers");
        }
    }
}
