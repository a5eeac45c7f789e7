//! Builds stores and governors from [`GovernorConfig`].

use std::sync::Arc;

#[cfg(feature = "sqlite")]
use anyhow::Context;

use crate::config::{GovernorConfig, StoreBackendConfig};
use crate::core::{AutomationDriver, CooldownPolicy, IdentityStore, ProgressPublisher, Spawn};
use crate::core::AppResult;
use crate::infra::InMemoryIdentityStore;
use crate::runtime::Governor;

/// Build the configured identity store backend.
///
/// # Errors
/// Fails when the backend cannot be opened or was compiled out.
pub fn build_store(cfg: &StoreBackendConfig, history_limit: usize) -> AppResult<Arc<dyn IdentityStore>> {
    match cfg {
        StoreBackendConfig::InMemory => Ok(Arc::new(InMemoryIdentityStore::new())),
        #[cfg(feature = "sqlite")]
        StoreBackendConfig::Sqlite { path } => {
            let store = crate::infra::SqliteIdentityStore::open(path, history_limit)
                .with_context(|| format!("opening identity store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackendConfig::Sqlite { path } => {
            let _ = history_limit;
            anyhow::bail!("sqlite store at {} requested but the `sqlite` feature is disabled", path.display())
        }
    }
}

/// Validate the configuration and assemble a governor around the given driver.
///
/// # Errors
/// Fails on invalid configuration or when the store cannot be opened.
pub fn build_governor<D, S>(
    cfg: &GovernorConfig,
    driver: D,
    publisher: Arc<dyn ProgressPublisher>,
    spawner: S,
) -> AppResult<Governor<D, S>>
where
    D: AutomationDriver,
    S: Spawn + Clone + Send + 'static,
{
    cfg.validate()
        .map_err(|e| anyhow::anyhow!("config invalid: {e}"))?;
    let store = build_store(&cfg.store, cfg.policy.history_limit)?;
    let policy = CooldownPolicy::new(cfg.policy.clone())?;
    tracing::info!(store = ?cfg.store, "governor built");
    Ok(Governor::new(
        store,
        driver,
        policy,
        publisher,
        spawner,
        cfg.supervisor.clone(),
    ))
}
