use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::StorageError;

pub const CUSTOM_PAGES_KEY: &str = "customPages";
/// Next counter value of a sequential id generator. Survives a reset.
pub const ID_COUNTER_KEY: &str = "cloudboardIdCounter";
pub const LAYOUT_KEY_PREFIX: &str = "layout-";
pub const FILTERS_KEY_PREFIX: &str = "s3-buckets-filters-";
pub const GRID_NAMESPACE_PREFIX: &str = "rgl-";

const STORAGE_FILE: &str = "storage.json";

pub fn layout_key(view_id: &str) -> String {
    format!("{LAYOUT_KEY_PREFIX}{view_id}")
}

pub fn filters_key(widget_id: &str) -> String {
    format!("{FILTERS_KEY_PREFIX}{widget_id}")
}

/// Keys removed by a full dashboard reset, including ones owned by the grid
/// surface rather than the page store.
pub fn is_reset_sweep_key(key: &str) -> bool {
    key.starts_with(GRID_NAMESPACE_PREFIX)
        || key.starts_with(FILTERS_KEY_PREFIX)
        || key.contains("layout")
        || key.contains("widget")
        || key.contains("position")
}

/// String-keyed blob storage with browser local-storage semantics.
pub trait KeyValueBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    entries: BTreeMap<String, String>,
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// All keys live in one JSON object file that is rewritten atomically on
/// every change.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileBackend {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(STORAGE_FILE);

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        info!(
            file = %path.display(),
            keys = entries.len(),
            "opened storage"
        );

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        debug!(file = %self.path.display(), count = entries.len(), "saving storage atomically");

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, entries)?;
        writeln!(temp)?;
        temp.flush()?;

        temp.persist(&self.path)
            .map_err(|err| StorageError::Persist {
                path: self.path.display().to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut next = self.entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.write(&next)?;
        self.entries = next;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if !self.entries.contains_key(key) {
            return Ok(());
        }
        let mut next = self.entries.clone();
        next.remove(key);
        self.write(&next)?;
        self.entries = next;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// Shared handle to the single durable store. Execution is single-threaded,
/// so every component holds a clone of the same `Rc`.
#[derive(Clone)]
pub struct Storage {
    backend: Rc<RefCell<dyn KeyValueBackend>>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    pub fn new<B>(backend: B) -> Self
    where
        B: KeyValueBackend + 'static,
    {
        let backend: Rc<RefCell<dyn KeyValueBackend>> = Rc::new(RefCell::new(backend));
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.borrow().get(key)
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        debug!(key, bytes = value.len(), "storage set");
        self.backend.borrow_mut().set(key, value)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        debug!(key, "storage remove");
        self.backend.borrow_mut().remove(key)
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.backend.borrow().keys()
    }

    /// Returns `None` for a missing key and for a blob that no longer
    /// decodes as `T`; the latter is logged and otherwise ignored.
    pub fn get_json<T>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(key, %error, "failed parsing stored value; ignoring it");
                Ok(None)
            }
        }
    }

    pub fn set_json<T>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json)
    }

    /// Removes every key the predicate accepts and returns the removed keys.
    #[tracing::instrument(skip(self, predicate))]
    pub fn remove_matching<F>(&self, predicate: F) -> Result<Vec<String>, StorageError>
    where
        F: Fn(&str) -> bool,
    {
        let doomed: Vec<String> = self
            .keys()?
            .into_iter()
            .filter(|key| predicate(key))
            .collect();
        for key in &doomed {
            self.remove(key)?;
        }
        debug!(count = doomed.len(), "removed matching keys");
        Ok(doomed)
    }
}
