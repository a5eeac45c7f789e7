//! Tokio spawner and the caller-facing governor facade.

pub mod governor;
pub mod tokio_spawner;

pub use governor::{Governor, IdentityStatus};
pub use tokio_spawner::TokioSpawner;
