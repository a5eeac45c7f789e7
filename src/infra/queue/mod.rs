//! Run queue backends for the dispatcher.

pub mod memory;

pub use memory::InMemoryRunQueue;
