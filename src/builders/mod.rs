//! Builders to construct governor components from configuration.

pub mod governor_builder;

pub use governor_builder::{build_governor, build_store};
