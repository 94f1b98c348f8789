use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    store::{keys, StateStore},
    Result, SpotihueError,
};

/// Lock id guarding the synchronization loop.
pub const SYNC_LOOP_LOCK: &str = "sync_loop";
/// Lock id guarding bridge pairing.
pub const SETUP_BRIDGE_LOCK: &str = "setup_bridge";

/// Singleton lock for a routine, keyed by `lock_id` and held by an opaque
/// token (usually a run id).
///
/// A holder may acquire its own lock again. Records expire after
/// `max_duration` so a crashed holder cannot block the routine forever; they
/// are never refreshed.
#[derive(Clone)]
pub struct RunLock {
    lock_id: String,
    store: Arc<dyn StateStore>,
    max_duration: Duration,
}

impl RunLock {
    pub fn new(lock_id: impl Into<String>, store: Arc<dyn StateStore>, max_duration: Duration) -> Self {
        Self {
            lock_id: lock_id.into(),
            store,
            max_duration,
        }
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// Attempts to take the lock for `holder_token`. The returned guard
    /// reports whether it succeeded and, if it did, deletes the record when
    /// dropped.
    pub fn acquire_for(&self, holder_token: &str) -> Result<LockGuard> {
        let key = keys::lock(&self.lock_id);
        let acquired = self
            .store
            .set_if_vacant_or_same(&key, holder_token, self.max_duration)?;

        if acquired {
            tracing::debug!(lock = %self.lock_id, holder = holder_token, "acquired lock");
        } else {
            tracing::debug!(lock = %self.lock_id, holder = holder_token, "lock is held elsewhere");
        }

        Ok(LockGuard {
            store: self.store.clone(),
            lock_id: self.lock_id.clone(),
            key,
            acquired,
        })
    }

    /// Current holder, if the lock is taken and unexpired.
    pub fn holder(&self) -> Result<Option<String>> {
        self.store.get(&keys::lock(&self.lock_id))
    }

    /// Runs `task` while holding the lock. Fails with
    /// [`SpotihueError::AlreadyRunning`] without polling `task` when another
    /// holder owns it.
    pub async fn run_exclusive<F, T>(&self, holder_token: &str, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = self.acquire_for(holder_token)?;
        if !guard.acquired() {
            tracing::info!(lock = %self.lock_id, holder = holder_token, "another run holds the lock");
            return Err(SpotihueError::AlreadyRunning(self.lock_id.clone()));
        }
        let result = task.await;
        drop(guard);
        result
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock")
            .field("lock_id", &self.lock_id)
            .field("max_duration", &self.max_duration)
            .finish()
    }
}

/// Scope of one acquisition attempt. Releases the lock on drop when the
/// attempt succeeded.
pub struct LockGuard {
    store: Arc<dyn StateStore>,
    lock_id: String,
    key: String,
    acquired: bool,
}

impl LockGuard {
    pub fn acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.acquired {
            return;
        }
        match self.store.delete(&self.key) {
            Ok(()) => tracing::debug!(lock = %self.lock_id, "released lock"),
            Err(err) => tracing::error!(lock = %self.lock_id, error = %err, "failed to release lock"),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock_id", &self.lock_id)
            .field("acquired", &self.acquired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;
    use crate::store::MemoryStore;

    fn lock(store: Arc<dyn StateStore>, max_duration: Duration) -> RunLock {
        RunLock::new(SYNC_LOOP_LOCK, store, max_duration)
    }

    #[test]
    fn only_one_token_holds_the_lock() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let lock = lock(store, Duration::from_secs(300));

        let first = lock.acquire_for("token-a").unwrap();
        let second = lock.acquire_for("token-b").unwrap();
        assert!(first.acquired());
        assert!(!second.acquired());
        assert_eq!(lock.holder().unwrap().as_deref(), Some("token-a"));

        // The failed attempt must not release the holder's record.
        drop(second);
        assert_eq!(lock.holder().unwrap().as_deref(), Some("token-a"));

        drop(first);
        assert_eq!(lock.holder().unwrap(), None);
        assert!(lock.acquire_for("token-b").unwrap().acquired());
    }

    #[test]
    fn same_token_reacquires() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let lock = lock(store, Duration::from_secs(300));

        let first = lock.acquire_for("token-a").unwrap();
        let again = lock.acquire_for("token-a").unwrap();
        assert!(first.acquired() && again.acquired());
    }

    #[test]
    fn stale_records_expire() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let lock = lock(store, Duration::from_millis(30));

        let crashed = lock.acquire_for("token-a").unwrap();
        std::mem::forget(crashed);
        assert!(!lock.acquire_for("token-b").unwrap().acquired());

        sleep(Duration::from_millis(80));
        assert!(lock.acquire_for("token-b").unwrap().acquired());
    }

    #[tokio::test]
    async fn run_exclusive_reports_contention() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let lock = lock(store, Duration::from_secs(300));

        let held = lock.acquire_for("token-a").unwrap();
        let err = lock
            .run_exclusive("token-b", async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, SpotihueError::AlreadyRunning(ref id) if id == SYNC_LOOP_LOCK));
        drop(held);

        let value = lock.run_exclusive("token-b", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(lock.holder().unwrap(), None);
    }

    #[tokio::test]
    async fn run_exclusive_releases_after_failure() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let lock = lock(store, Duration::from_secs(300));

        let result: Result<()> = lock
            .run_exclusive("token-a", async { Err(SpotihueError::msg("boom")) })
            .await;
        assert!(result.is_err());
        assert_eq!(lock.holder().unwrap(), None);
    }
}
