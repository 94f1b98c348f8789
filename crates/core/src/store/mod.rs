//! Key/value state shared between the sync loop and whoever controls it.
//!
//! Values may carry a time-to-live; expired entries are invisible to every
//! operation. The two conditional writes are atomic so they can back the
//! singleton lock and the run heartbeat.

mod memory;
mod sqlite;

use std::time::Duration;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::Result;

/// Well-known keys.
pub mod keys {
    /// Artwork URL whose colors are currently on the fixtures.
    pub const LAST_ARTWORK_URL: &str = "spotihue:last_artwork_url";
    /// JSON snapshot of the most recently polled track.
    pub const TRACK_INFORMATION: &str = "spotihue:track_information";
    /// Identifier of the active sync run.
    pub const RUN_ID: &str = "spotihue:run_id";

    pub fn lock(lock_id: &str) -> String {
        format!("spotihue:lock:{lock_id}")
    }
}

pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value`, replacing any previous entry. `ttl = None` never
    /// expires.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Writes `value` with `ttl` if the key is vacant (or expired) or already
    /// holds `value`. Returns whether the write happened.
    fn set_if_vacant_or_same(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Extends the TTL of `key` only while it still holds `value`. Returns
    /// `false` when the entry is gone or owned by someone else.
    fn refresh_if_same(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    //! Behaviour every store must share.

    use std::thread::sleep;

    use super::*;

    pub(super) fn exercise_basic_operations(store: &dyn StateStore) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("key", "one", None).unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("one"));

        store.set("key", "two", None).unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("two"));

        store.delete("key").unwrap();
        assert_eq!(store.get("key").unwrap(), None);
        store.delete("key").unwrap();
    }

    pub(super) fn exercise_expiry(store: &dyn StateStore) {
        store
            .set("short", "lived", Some(Duration::from_millis(30)))
            .unwrap();
        assert!(store.get("short").unwrap().is_some());
        sleep(Duration::from_millis(80));
        assert_eq!(store.get("short").unwrap(), None);
    }

    pub(super) fn exercise_compare_and_set(store: &dyn StateStore) {
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_vacant_or_same("lock", "a", ttl).unwrap());
        assert!(store.set_if_vacant_or_same("lock", "a", ttl).unwrap());
        assert!(!store.set_if_vacant_or_same("lock", "b", ttl).unwrap());
        assert_eq!(store.get("lock").unwrap().as_deref(), Some("a"));

        store
            .set("stale", "a", Some(Duration::from_millis(20)))
            .unwrap();
        sleep(Duration::from_millis(60));
        assert!(store.set_if_vacant_or_same("stale", "b", ttl).unwrap());
        assert_eq!(store.get("stale").unwrap().as_deref(), Some("b"));
    }

    pub(super) fn exercise_refresh(store: &dyn StateStore) {
        let short = Duration::from_millis(40);
        store.set("run", "r1", Some(short)).unwrap();

        assert!(store.refresh_if_same("run", "r1", Duration::from_secs(60)).unwrap());
        sleep(Duration::from_millis(80));
        assert_eq!(store.get("run").unwrap().as_deref(), Some("r1"));

        assert!(!store.refresh_if_same("run", "r2", short).unwrap());
        store.delete("run").unwrap();
        assert!(!store.refresh_if_same("run", "r1", short).unwrap());
    }

    #[test]
    fn lock_keys_are_namespaced() {
        assert_eq!(keys::lock("sync_loop"), "spotihue:lock:sync_loop");
    }
}
