//! Sliding-window rate limiting over an external TTL store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::security::identity::Identity;
use crate::store::{Clock, KeyValueStore};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Recorded. `remaining` more events fit in the current window.
    Allowed { remaining: u32 },
    /// Rejected and not recorded. The oldest event leaves the window in
    /// `retry_after_secs`.
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Counts events per key over the trailing window ending now.
///
/// Each key stores its event timestamps (epoch millis). A check reads the
/// list, drops entries older than the window, compares against the limit and
/// writes the list back with the window as TTL. The sequence is not atomic:
/// concurrent checks on one key race and the last write wins.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Key for one identity issuing one action from one address.
    pub fn key(action: &str, identity: &Identity) -> String {
        let ip_hash = hex::encode(&blake3::hash(identity.ip.as_bytes()).as_bytes()[..8]);
        format!("rate_limit:{}:{}:{}", action, identity.user_id, ip_hash)
    }

    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateDecision {
        let now = self.clock.now_millis();
        let window_ms = window.as_millis() as u64;
        let cutoff = now.saturating_sub(window_ms);

        let mut events: Vec<u64> = match self.store.get(key) {
            Ok(Some(Value::Array(items))) => items.iter().filter_map(Value::as_u64).collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                // Fail open: a broken store must not lock administrators out.
                tracing::warn!(key = %key, error = %e, "Rate limit window unreadable; allowing");
                Vec::new()
            }
        };
        events.retain(|&at| at > cutoff);

        if events.len() >= limit as usize {
            let oldest = events.iter().copied().min().unwrap_or(now);
            let retry_after_ms = (oldest + window_ms).saturating_sub(now);
            tracing::debug!(key = %key, count = events.len(), limit, "Rate limit reached");
            return RateDecision::Limited {
                retry_after_secs: retry_after_ms.div_ceil(1000),
            };
        }

        events.push(now);
        let remaining = limit.saturating_sub(events.len() as u32);
        let stored = Value::Array(events.into_iter().map(Value::from).collect());
        if let Err(e) = self.store.set(key, stored, window) {
            tracing::warn!(key = %key, error = %e, "Failed to record rate limit event");
        }
        RateDecision::Allowed { remaining }
    }

    /// Forget all events for `key`.
    pub fn reset(&self, key: &str) {
        if let Err(e) = self.store.delete(key) {
            tracing::warn!(key = %key, error = %e, "Failed to reset rate limit window");
        }
    }
}
