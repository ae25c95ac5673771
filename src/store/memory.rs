//! In-process store backing both storage traits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use crate::store::{Clock, KeyValueStore, OptionStore, StoreError, SystemClock};

/// Minimum time between sweeps of expired entries.
const PURGE_INTERVAL_MS: u64 = 60_000;

struct Entry {
    value: Value,
    /// Expiry in epoch millis; `None` never expires.
    expires_at: Option<u64>,
}

/// A thread-safe map with optional expiry per entry.
///
/// Used as the transient store in production (rate-limit windows do not need
/// to survive a restart) and as the fake for both traits in tests.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    next_purge_at: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            clock,
            next_purge_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.inner
            .iter()
            .filter(|r| r.value().expires_at.map_or(true, |at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.inner.len();
        self.inner
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        before.saturating_sub(self.inner.len())
    }

    /// Sweep at most once per interval; the writer that wins the swap does it.
    fn purge_if_due(&self, now: u64) {
        let due = self.next_purge_at.load(Ordering::Relaxed);
        if now < due {
            return;
        }
        if self
            .next_purge_at
            .compare_exchange(due, now + PURGE_INTERVAL_MS, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let removed = self.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "Purged expired store entries");
            }
        }
    }

    fn read(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let expired = match self.inner.get(key) {
            Some(entry) => match entry.expires_at {
                Some(at) if at <= now => true,
                _ => return Some(entry.value.clone()),
            },
            None => return None,
        };
        if expired {
            self.inner.remove(key);
        }
        None
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read(key))
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        self.purge_if_due(now);
        let expires_at = now + ttl.as_millis() as u64;
        self.inner.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key);
        Ok(())
    }
}

impl OptionStore for MemoryStore {
    fn get_option(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read(name))
    }

    fn update_option(&self, name: &str, value: Value) -> Result<(), StoreError> {
        self.inner.insert(
            name.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }
}
