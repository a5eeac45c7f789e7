//! Identity record store backends.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryIdentityStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteIdentityStore;
