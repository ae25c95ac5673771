//! Persistence seams shared by the gateway.
//!
//! # Data Flow
//! ```text
//! RateLimiter
//!     → KeyValueStore (TTL'd sliding windows)
//!
//! ErrorLogger
//!     → OptionStore (bounded violation / error histories)
//!     → ring.rs (read → push → truncate → write)
//! ```
//!
//! # Design Decisions
//! - Both stores are traits so production and tests inject different backends
//! - No locking across get/set: concurrent writers race and the last one wins
//! - Time comes from a `Clock` so windows and TTLs can be driven by tests

pub mod clock;
pub mod file;
pub mod memory;
pub mod ring;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file::FileOptionStore;
pub use memory::MemoryStore;
pub use ring::RingBuffer;

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Transient key-value storage with per-entry expiry.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`; the entry disappears after `ttl`.
    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Durable named blobs.
pub trait OptionStore: Send + Sync {
    fn get_option(&self, name: &str) -> Result<Option<Value>, StoreError>;

    fn update_option(&self, name: &str, value: Value) -> Result<(), StoreError>;
}
