use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::StateStore;
use crate::{Result, SpotihueError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);";

/// [`StateStore`] persisted in a SQLite file, so a loop running in one
/// process can be observed and stopped from another.
///
/// Expiry timestamps are unix milliseconds; conditional writes run inside
/// `IMMEDIATE` transactions to stay atomic across processes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::debug!(?path, "opened state database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SpotihueError::msg("state database handle has been poisoned"))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn live_value(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM state WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        params![key, now_millis()],
        |row| row.get(0),
    )
    .optional()
}

impl StateStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(live_value(&conn, key)?)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO state (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, ttl.map(expiry)],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM state WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn set_if_vacant_or_same(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = live_value(&tx, key)?;
        if current.as_deref().is_some_and(|current| current != value) {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO state (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expiry(ttl)],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn refresh_if_same(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE state SET expires_at = ?3
             WHERE key = ?1 AND value = ?2 AND (expires_at IS NULL OR expires_at > ?4)",
            params![key, value, expiry(ttl), now_millis()],
        )?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;

    #[test]
    fn basic_operations() {
        exercise_basic_operations(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn entries_expire() {
        exercise_expiry(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn compare_and_set() {
        exercise_compare_and_set(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn refresh_only_extends_own_entries() {
        exercise_refresh(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn state_is_shared_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        let writer = SqliteStore::open(&path).unwrap();
        let reader = SqliteStore::open(&path).unwrap();

        writer.set("spotihue:run_id", "run-1", None).unwrap();
        assert_eq!(reader.get("spotihue:run_id").unwrap().as_deref(), Some("run-1"));

        assert!(!reader
            .set_if_vacant_or_same("spotihue:run_id", "run-2", Duration::from_secs(5))
            .unwrap());
        reader.delete("spotihue:run_id").unwrap();
        assert_eq!(writer.get("spotihue:run_id").unwrap(), None);
    }
}
