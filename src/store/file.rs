//! Option storage persisted to a JSON file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::store::{OptionStore, StoreError};

/// Durable option storage: one JSON object on disk, one key per option.
///
/// Each update rewrites the whole file through a temporary sibling and a
/// rename, so a crash mid-write leaves the previous contents intact.
pub struct FileOptionStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, Value>>,
}

impl FileOptionStore {
    /// Open the store, loading existing contents if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            HashMap::new()
        };
        tracing::info!(path = ?path, options = map.len(), "Option store opened");
        Ok(Self {
            path,
            cache: Mutex::new(map),
        })
    }

    fn persist(&self, map: &HashMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(writer, map)?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl OptionStore for FileOptionStore {
    fn get_option(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| StoreError::Unavailable("option cache poisoned".into()))?;
        Ok(cache.get(name).cloned())
    }

    fn update_option(&self, name: &str, value: Value) -> Result<(), StoreError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| StoreError::Unavailable("option cache poisoned".into()))?;
        cache.insert(name.to_string(), value);
        self.persist(&cache)
    }
}
