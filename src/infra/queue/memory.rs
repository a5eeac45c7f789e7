//! In-memory run queue with priority, backoff and deadline awareness.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::dispatcher::{RunQueue, ScheduledRun};
use crate::core::GovernorError;

/// Orders runs by priority (highest first), FIFO within a priority.
struct QueuedRun {
    run: ScheduledRun,
}

impl PartialEq for QueuedRun {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedRun {}

impl PartialOrd for QueuedRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRun {
    fn cmp(&self, other: &Self) -> Ordering {
        self.run
            .priority
            .cmp(&other.run.priority)
            // Reversed for the max-heap: earlier created_at wins.
            .then_with(|| other.run.created_at_ms.cmp(&self.run.created_at_ms))
            .then_with(|| other.run.identity_id.cmp(&self.run.identity_id))
    }
}

/// In-memory queue storing scheduled runs in a priority heap.
pub struct InMemoryRunQueue {
    max_depth: usize,
    runs: BinaryHeap<QueuedRun>,
}

impl InMemoryRunQueue {
    /// Create a new in-memory queue with a maximum depth.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            runs: BinaryHeap::with_capacity(max_depth.min(1024)),
        }
    }
}

impl RunQueue for InMemoryRunQueue {
    fn enqueue(&mut self, run: ScheduledRun) -> Result<(), GovernorError> {
        if self.len() >= self.max_depth() {
            return Err(GovernorError::QueueFull("max queue depth reached".into()));
        }
        self.runs.push(QueuedRun { run });
        Ok(())
    }

    fn dequeue_ready(&mut self, now_ms: u128) -> Option<ScheduledRun> {
        let mut deferred = Vec::new();
        let mut ready = None;
        while let Some(entry) = self.runs.pop() {
            if entry.run.is_ready(now_ms) {
                ready = Some(entry.run);
                break;
            }
            deferred.push(entry);
        }
        self.runs.extend(deferred);
        ready
    }

    fn prune_expired(&mut self, now_ms: u128) -> usize {
        let before = self.runs.len();
        self.runs.retain(|entry| !entry.run.is_expired(now_ms));
        before - self.runs.len()
    }

    fn next_ready_at(&self) -> Option<u128> {
        self.runs.iter().map(|entry| entry.run.not_before_ms).min()
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn len(&self) -> usize {
        self.runs.len()
    }
}
