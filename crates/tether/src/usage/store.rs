//! Persistence for usage tables.
//!
//! A table is a `bucket key → token count` map with the key rendered as a
//! decimal string, so any string-keyed store can hold it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

/// One exported usage table.
pub type UsageTable = BTreeMap<String, u64>;

#[derive(Debug, Error)]
pub enum UsageStoreError {
    #[error("usage store I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("usage store '{}' is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value persistence for named usage tables.
pub trait UsageStore: Send + Sync {
    /// The stored table, or an empty one if it was never saved.
    fn load(&self, table: &str) -> Result<UsageTable, UsageStoreError>;

    /// Replace the stored table.
    fn save(&self, table: &str, entries: &UsageTable) -> Result<(), UsageStoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    tables: Mutex<HashMap<String, UsageTable>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for MemoryUsageStore {
    fn load(&self, table: &str) -> Result<UsageTable, UsageStoreError> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables.get(table).cloned().unwrap_or_default())
    }

    fn save(&self, table: &str, entries: &UsageTable) -> Result<(), UsageStoreError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.insert(table.to_string(), entries.clone());
        Ok(())
    }
}

/// All tables in one pretty-printed JSON object, rewritten on every save.
#[derive(Debug)]
pub struct JsonFileUsageStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileUsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, UsageTable>, UsageStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(UsageStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&text).map_err(|source| UsageStoreError::Json {
            path: self.path.clone(),
            source,
        })
    }
}

impl UsageStore for JsonFileUsageStore {
    fn load(&self, table: &str) -> Result<UsageTable, UsageStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut all = self.read_all()?;
        Ok(all.remove(table).unwrap_or_default())
    }

    fn save(&self, table: &str, entries: &UsageTable) -> Result<(), UsageStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut all = self.read_all()?;
        all.insert(table.to_string(), entries.clone());

        let io_err = |source| UsageStoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&all).map_err(|source| UsageStoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(
            "Saved usage table '{table}' ({} buckets) to {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
