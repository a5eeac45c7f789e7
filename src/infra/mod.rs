//! Infrastructure adapters for record stores, progress mailboxes and run queues.

pub mod mailbox;
pub mod queue;
pub mod store;

pub use mailbox::{BroadcastPublisher, InMemoryProgressMailbox};
pub use queue::InMemoryRunQueue;
#[cfg(feature = "sqlite")]
pub use store::SqliteIdentityStore;
pub use store::InMemoryIdentityStore;
