use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use super::StateStore;
use crate::{Result, SpotihueError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Process-local [`StateStore`]. Suitable when the controller and the loop
/// share one process, and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| SpotihueError::msg("memory store has been poisoned"))
    }

    /// Live value for `key`, dropping the entry if it has expired.
    fn live_value(entries: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

/// Expiry instant for `ttl`, or `None` (never) when it lies beyond what
/// `Instant` can represent.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock()?;
        Ok(Self::live_value(&mut entries, key))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.and_then(deadline),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn set_if_vacant_or_same(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.lock()?;
        match Self::live_value(&mut entries, key) {
            Some(current) if current != value => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at: deadline(ttl),
                    },
                );
                Ok(true)
            }
        }
    }

    fn refresh_if_same(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.lock()?;
        if Self::live_value(&mut entries, key).as_deref() != Some(value) {
            return Ok(false);
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = deadline(ttl);
        }
        Ok(true)
    }
}
