//! SQLite-backed identity store.
//!
//! Admission is a single conditional upsert, so several worker processes sharing the
//! database file can never both take the same identity. WAL mode plus a busy timeout
//! lets those processes wait on each other instead of failing.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::core::outcome::OutcomeKind;
use crate::core::policy::OutcomeEvent;
use crate::core::store::{IdentityRecord, IdentityStore, OutcomeWrite};
use crate::core::GovernorError;
use crate::util::serde::IdentityId;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl From<rusqlite::Error> for GovernorError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

/// Identity store persisted in a SQLite database.
pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
    history_limit: usize,
}

impl SqliteIdentityStore {
    /// Open (or create) a database at the given path and apply migrations.
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when the file cannot be opened or migrated.
    pub fn open(path: &Path, history_limit: usize) -> Result<Self, GovernorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GovernorError::Persistence(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn, history_limit)?;
        tracing::info!(path = %path.display(), "identity store opened");
        Ok(store)
    }

    /// Open a private in-memory database (for testing).
    ///
    /// # Errors
    /// [`GovernorError::Persistence`] when migrations fail.
    pub fn in_memory(history_limit: usize) -> Result<Self, GovernorError> {
        Self::from_connection(Connection::open_in_memory()?, history_limit)
    }

    fn from_connection(conn: Connection, history_limit: usize) -> Result<Self, GovernorError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            history_limit: history_limit.max(1),
        })
    }

    fn load(conn: &Connection, id: &IdentityId, history_limit: usize) -> Result<Option<IdentityRecord>, GovernorError> {
        let row = conn
            .query_row(
                "SELECT credentials_ref, cooldown_until, last_outcome, is_running, running_since
                 FROM identities WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((credentials_ref, cooldown_until, last_outcome, is_running, running_since)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT kind, at_ms FROM outcome_events
             WHERE identity_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(history_limit).unwrap_or(i64::MAX);
        let mut history = stmt
            .query_map(params![id.as_str(), limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .filter_map(|row| match row {
                Ok((kind, at_ms)) => OutcomeKind::parse(&kind).map(|kind| {
                    Ok(OutcomeEvent {
                        kind,
                        at_ms: from_ts(at_ms),
                    })
                }),
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        history.reverse();

        Ok(Some(IdentityRecord {
            id: id.clone(),
            credentials_ref,
            cooldown_until: cooldown_until.map(from_ts),
            last_outcome: last_outcome.as_deref().and_then(OutcomeKind::parse),
            is_running,
            running_since_ms: running_since.map(from_ts),
            history,
        }))
    }
}

fn run_migrations(conn: &Connection) -> Result<(), GovernorError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )?;
    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    if current < 1 {
        conn.execute_batch(
            "BEGIN IMMEDIATE;
            CREATE TABLE IF NOT EXISTS identities (
                id              TEXT PRIMARY KEY NOT NULL,
                credentials_ref TEXT,
                cooldown_until  INTEGER,
                last_outcome    TEXT,
                is_running      INTEGER NOT NULL DEFAULT 0 CHECK (is_running IN (0, 1)),
                running_since   INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_identities_cooldown ON identities (cooldown_until);
            CREATE INDEX IF NOT EXISTS idx_identities_running ON identities (is_running, running_since);

            CREATE TABLE IF NOT EXISTS outcome_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id TEXT NOT NULL REFERENCES identities (id),
                kind        TEXT NOT NULL,
                at_ms       INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outcome_events_identity ON outcome_events (identity_id, id DESC);

            INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'identities');
            COMMIT;",
        )?;
        tracing::info!("applied identity store migration v1");
    }
    Ok(())
}

fn to_ts(ms: u128) -> Result<i64, GovernorError> {
    i64::try_from(ms).map_err(|_| GovernorError::Persistence(format!("timestamp {ms} out of range")))
}

fn from_ts(ms: i64) -> u128 {
    u128::try_from(ms).unwrap_or(0)
}

/// Record the outcome event and trim the identity's history.
fn append_event(tx: &Transaction<'_>, id: &IdentityId, write: &OutcomeWrite) -> Result<(), GovernorError> {
    tx.execute(
        "INSERT INTO outcome_events (identity_id, kind, at_ms) VALUES (?1, ?2, ?3)",
        params![id.as_str(), write.outcome.as_str(), to_ts(write.at_ms)?],
    )?;
    let keep = i64::try_from(write.history_limit).unwrap_or(i64::MAX);
    tx.execute(
        "DELETE FROM outcome_events
         WHERE identity_id = ?1 AND id NOT IN (
             SELECT id FROM outcome_events WHERE identity_id = ?1 ORDER BY id DESC LIMIT ?2
         )",
        params![id.as_str(), keep],
    )?;
    Ok(())
}

impl IdentityStore for SqliteIdentityStore {
    fn get(&self, id: &IdentityId) -> Result<Option<IdentityRecord>, GovernorError> {
        Self::load(&self.conn.lock(), id, self.history_limit)
    }

    fn register(&self, id: &IdentityId, credentials_ref: Option<&str>) -> Result<(), GovernorError> {
        self.conn.lock().execute(
            "INSERT INTO identities (id, credentials_ref) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET credentials_ref = excluded.credentials_ref",
            params![id.as_str(), credentials_ref],
        )?;
        Ok(())
    }

    fn conditional_set_running(&self, id: &IdentityId, now_ms: u128) -> Result<bool, GovernorError> {
        let changed = self.conn.lock().execute(
            "INSERT INTO identities (id, is_running, running_since) VALUES (?1, 1, ?2)
             ON CONFLICT (id) DO UPDATE SET is_running = 1, running_since = excluded.running_since
             WHERE identities.is_running = 0
               AND (identities.cooldown_until IS NULL OR identities.cooldown_until <= ?2)",
            params![id.as_str(), to_ts(now_ms)?],
        )?;
        Ok(changed == 1)
    }

    fn set_cooldown_and_clear_running(
        &self,
        id: &IdentityId,
        running_since_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError> {
        let cooldown_until = write.cooldown_until.map(to_ts).transpose()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE identities
             SET cooldown_until = ?2, last_outcome = ?3, is_running = 0, running_since = NULL
             WHERE id = ?1 AND is_running = 1 AND running_since = ?4",
            params![id.as_str(), cooldown_until, write.outcome.as_str(), to_ts(running_since_ms)?],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        append_event(&tx, id, write)?;
        tx.commit()?;
        Ok(true)
    }

    fn clear_cooldown(&self, id: &IdentityId) -> Result<bool, GovernorError> {
        let changed = self.conn.lock().execute(
            "UPDATE identities SET cooldown_until = NULL WHERE id = ?1",
            params![id.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn stale_running(&self, started_before_ms: u128) -> Result<Vec<IdentityRecord>, GovernorError> {
        let conn = self.conn.lock();
        let ids = {
            let mut stmt = conn.prepare_cached(
                "SELECT id FROM identities WHERE is_running = 1 AND running_since < ?1",
            )?;
            let ids = stmt
                .query_map(params![to_ts(started_before_ms)?], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = Self::load(&conn, &IdentityId::from(id), self.history_limit)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn release_stale(
        &self,
        id: &IdentityId,
        started_before_ms: u128,
        write: &OutcomeWrite,
    ) -> Result<bool, GovernorError> {
        let cooldown_until = write.cooldown_until.map(to_ts).transpose()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE identities
             SET cooldown_until = ?2, last_outcome = ?3, is_running = 0, running_since = NULL
             WHERE id = ?1 AND is_running = 1 AND running_since < ?4",
            params![id.as_str(), cooldown_until, write.outcome.as_str(), to_ts(started_before_ms)?],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        append_event(&tx, id, write)?;
        tx.commit()?;
        Ok(true)
    }
}
