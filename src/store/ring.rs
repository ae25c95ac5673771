//! Bounded history kept inside a single option.

use std::sync::Arc;

use serde_json::Value;

use crate::store::{OptionStore, StoreError};

/// Fixed-capacity history stored as a JSON array under one option name.
///
/// Pushing past capacity silently drops the oldest entries. The
/// read-modify-write is not atomic across processes.
#[derive(Clone)]
pub struct RingBuffer {
    store: Arc<dyn OptionStore>,
    name: String,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(store: Arc<dyn OptionStore>, name: impl Into<String>, capacity: usize) -> Self {
        Self {
            store,
            name: name.into(),
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All entries, oldest first. A non-array value reads as empty.
    pub fn entries(&self) -> Result<Vec<Value>, StoreError> {
        match self.store.get_option(&self.name)? {
            Some(Value::Array(items)) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }

    pub fn push(&self, entry: Value) -> Result<(), StoreError> {
        let mut items = self.entries()?;
        items.push(entry);
        if items.len() > self.capacity {
            let overflow = items.len() - self.capacity;
            items.drain(..overflow);
        }
        self.store.update_option(&self.name, Value::Array(items))
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.update_option(&self.name, Value::Array(Vec::new()))
    }
}
