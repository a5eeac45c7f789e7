//! Progress mailbox backends.

pub mod broadcast;
pub mod memory;

pub use broadcast::BroadcastPublisher;
pub use memory::InMemoryProgressMailbox;
