//! In-memory identity store.
//!
//! Check-and-set happens under one mutex, which makes admission atomic within a
//! single process. Use the SQLite backend when workers live in separate processes.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::store::{IdentityRecord, IdentityStore, OutcomeWrite};
use crate::core::GovernorError;
use crate::util::serde::IdentityId;

/// Process-local identity store for development/testing.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    records: Mutex<HashMap<IdentityId, IdentityRecord>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record wholesale (seeding and tests).
    pub fn put(&self, record: IdentityRecord) {
        self.records.lock().insert(record.id.clone(), record);
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn get(&self, id: &IdentityId) -> Result<Option<IdentityRecord>, GovernorError> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn register(&self, id: &IdentityId, credentials_ref: Option<&str>) -> Result<(), GovernorError> {
        let mut records = self.records.lock();
        let record = records
            .entry(id.clone())
            .or_insert_with(|| IdentityRecord::new(id.clone()));
        record.credentials_ref = credentials_ref.map(str::to_owned);
        Ok(())
    }

    fn conditional_set_running(&self, id: &IdentityId, now_ms: u128) -> Result<bool, GovernorError> {
        let mut records = self.records.lock();
        let record = records
            .entry(id.clone())
            .or_insert_with(|| IdentityRecord::new(id.clone()));
        if !record.is_eligible(now_ms) {
            return Ok(false);
        }
        record.is_running = true;
        record.running_since_ms = Some(now_ms);
        Ok(true)
    }

    fn set_cooldown_and_clear_running(
        &self,
        id: &IdentityId,
        running_since_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError> {
        let mut records = self.records.lock();
        match records.get_mut(id) {
            Some(record) if record.is_held_since(running_since_ms) => {
                record.apply(write);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn clear_cooldown(&self, id: &IdentityId) -> Result<bool, GovernorError> {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id) else {
            return Ok(false);
        };
        record.cooldown_until = None;
        Ok(true)
    }

    fn stale_running(&self, started_before_ms: u128) -> Result<Vec<IdentityRecord>, GovernorError> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.is_running && r.running_since_ms.is_some_and(|s| s < started_before_ms))
            .cloned()
            .collect())
    }

    fn release_stale(
        &self,
        id: &IdentityId,
        started_before_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError> {
        let mut records = self.records.lock();
        match records.get_mut(id) {
            Some(record)
                if record.is_running
                    && record.running_since_ms.is_some_and(|s| s < started_before_ms) =>
            {
                record.apply(write);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
