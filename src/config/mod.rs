//! Configuration models for cooldown policy, supervision, dispatching and storage.

pub mod governor;

pub use governor::{
    CooldownPolicyConfig, DispatcherConfig, GovernorConfig, StoreBackendConfig, SupervisorConfig,
};
