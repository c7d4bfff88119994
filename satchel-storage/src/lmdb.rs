//! LMDB-backed host storage primitive.
//!
//! Uses the heed crate (Rust bindings for LMDB) to give non-browser
//! deployments a native host with the same callback contract as extension
//! storage.
//!
//! # Layout
//!
//! One named database per area (`local`, `session`, `sync`). Keys are UTF-8
//! strings, values are JSON documents. The environment's map size acts as
//! the storage quota: a write that would exceed it fails with a
//! `QUOTA_BYTES` host error.
//!
//! Opening the host starts a new session: the `session` database is emptied
//! while `local` and `sync` keep their contents.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Each write runs in one write transaction
//! and its change batch is computed inside that transaction, so a batch
//! always reflects exactly what was committed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, MdbError};
use satchel_core::{AreaName, StorageChange, StorageChanges, StorageError, StorageItems};
use serde_json::Value;

use crate::host::{HostCallback, HostChangeSink, HostError, HostStorage};

/// Error type for LMDB host operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbHostError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open an area database within the environment.
    #[error("Failed to open database for area {area}: {reason}")]
    DbOpen { area: AreaName, reason: String },

    /// The write does not fit in the environment map.
    #[error("QUOTA_BYTES quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbHostError {
    fn from(e: heed::Error) -> Self {
        match e {
            heed::Error::Mdb(MdbError::MapFull) => LmdbHostError::QuotaExceeded(e.to_string()),
            other => LmdbHostError::Transaction(other.to_string()),
        }
    }
}

/// Convert LmdbHostError to StorageError.
impl From<LmdbHostError> for StorageError {
    fn from(e: LmdbHostError) -> Self {
        StorageError::Backend {
            reason: e.to_string(),
        }
    }
}

/// LMDB environment exposing the host callback API.
///
/// # Example
///
/// ```ignore
/// use satchel_storage::{HostStorageAdapter, LmdbHost};
/// use std::sync::Arc;
///
/// let host = LmdbHost::open("/var/lib/satchel", 64)?;
/// let storage = HostStorageAdapter::new(Arc::new(host));
/// ```
pub struct LmdbHost {
    env: Env,
    dbs: HashMap<AreaName, Database<Str, Bytes>>,
    sinks: RwLock<Vec<HostChangeSink>>,
}

impl LmdbHost {
    /// Open (or create) an LMDB host, emptying the `session` area.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Map size in megabytes, the effective quota
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbHostError> {
        std::fs::create_dir_all(&path)?;

        // Safety: the environment directory is owned by this process; no other
        // handle maps the same files with incompatible options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(AreaName::ALL.len() as u32)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbHostError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let mut dbs = HashMap::new();
        for area in AreaName::ALL {
            let db: Database<Str, Bytes> = env
                .create_database(&mut wtxn, Some(area.as_str()))
                .map_err(|e| LmdbHostError::DbOpen {
                    area,
                    reason: e.to_string(),
                })?;
            if area == AreaName::Session {
                db.clear(&mut wtxn)?;
            }
            dbs.insert(area, db);
        }
        wtxn.commit()?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB storage host");

        Ok(Self {
            env,
            dbs,
            sinks: RwLock::new(Vec::new()),
        })
    }

    fn db(&self, area: AreaName) -> Result<Database<Str, Bytes>, LmdbHostError> {
        self.dbs.get(&area).copied().ok_or(LmdbHostError::DbOpen {
            area,
            reason: "area database missing".to_string(),
        })
    }

    fn decode(key: &str, bytes: &[u8]) -> Option<Value> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Skipping undecodable LMDB value");
                None
            }
        }
    }

    /// Read keys from an area; `None` reads the whole area.
    pub fn read(&self, area: AreaName, keys: Option<&[String]>) -> Result<StorageItems, LmdbHostError> {
        let db = self.db(area)?;
        let rtxn = self.env.read_txn()?;
        let mut items = StorageItems::new();

        match keys {
            Some(keys) => {
                for key in keys {
                    if let Some(bytes) = db.get(&rtxn, key)? {
                        if let Some(value) = Self::decode(key, bytes) {
                            items.insert(key.clone(), value);
                        }
                    }
                }
            }
            None => {
                for entry in db.iter(&rtxn)? {
                    let (key, bytes) = entry?;
                    if let Some(value) = Self::decode(key, bytes) {
                        items.insert(key.to_string(), value);
                    }
                }
            }
        }

        Ok(items)
    }

    /// Write items, returning the change batch that was committed.
    pub fn write(&self, area: AreaName, items: StorageItems) -> Result<StorageChanges, LmdbHostError> {
        let db = self.db(area)?;
        let mut wtxn = self.env.write_txn()?;
        let mut changes = StorageChanges::new();

        for (key, value) in items {
            let encoded =
                serde_json::to_vec(&value).map_err(|e| LmdbHostError::Serialization(e.to_string()))?;
            let old = db
                .get(&wtxn, &key)?
                .and_then(|bytes| Self::decode(&key, bytes));
            if old.as_ref() == Some(&value) {
                continue;
            }
            db.put(&mut wtxn, &key, &encoded)?;
            changes.insert(key, StorageChange::written(old, value));
        }

        wtxn.commit()?;
        Ok(changes)
    }

    /// Delete keys, returning changes for the keys that existed.
    pub fn delete(&self, area: AreaName, keys: &[String]) -> Result<StorageChanges, LmdbHostError> {
        let db = self.db(area)?;
        let mut wtxn = self.env.write_txn()?;
        let mut changes = StorageChanges::new();

        for key in keys {
            let old = db.get(&wtxn, key)?.and_then(|bytes| Self::decode(key, bytes));
            if db.delete(&mut wtxn, key)? {
                if let Some(old) = old {
                    changes.insert(key.clone(), StorageChange::removed(old));
                }
            }
        }

        wtxn.commit()?;
        Ok(changes)
    }

    /// Delete every key in an area. The removed entries are collected in the
    /// same write transaction that clears them.
    pub fn wipe(&self, area: AreaName) -> Result<StorageChanges, LmdbHostError> {
        let db = self.db(area)?;
        let mut wtxn = self.env.write_txn()?;
        let mut changes = StorageChanges::new();

        for entry in db.iter(&wtxn)? {
            let (key, bytes) = entry?;
            if let Some(old) = Self::decode(key, bytes) {
                changes.insert(key.to_string(), StorageChange::removed(old));
            }
        }
        db.clear(&mut wtxn)?;

        wtxn.commit()?;
        Ok(changes)
    }

    /// Push a batch to every sink, then drop the sinks whose subscriber is
    /// gone. Sinks run outside the lock so they may write back to the host.
    fn notify(&self, changes: &StorageChanges, area: AreaName) {
        if changes.is_empty() {
            return;
        }
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner).clone();
        let dead: Vec<HostChangeSink> = sinks
            .into_iter()
            .filter(|sink| !sink(changes.clone(), area))
            .collect();
        if !dead.is_empty() {
            self.sinks
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|sink| !dead.iter().any(|d| Arc::ptr_eq(sink, d)));
            tracing::debug!(dropped = dead.len(), "Dropped change sinks of released adapters");
        }
    }

    /// Number of live change subscriptions.
    pub fn sink_count(&self) -> usize {
        self.sinks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn finish(
        &self,
        operation: &'static str,
        area: AreaName,
        result: Result<StorageChanges, LmdbHostError>,
        callback: HostCallback<()>,
    ) {
        match result {
            Ok(changes) => {
                tracing::debug!(operation, area = %area, changed = changes.len(), "LMDB write committed");
                self.notify(&changes, area);
                callback(Ok(()));
            }
            Err(e) => callback(Err(HostError::new(e.to_string()))),
        }
    }
}

impl HostStorage for LmdbHost {
    fn get(&self, area: AreaName, keys: Option<Vec<String>>, callback: HostCallback<StorageItems>) {
        callback(
            self.read(area, keys.as_deref())
                .map_err(|e| HostError::new(e.to_string())),
        );
    }

    fn set(&self, area: AreaName, items: StorageItems, callback: HostCallback<()>) {
        let result = self.write(area, items);
        self.finish("set", area, result, callback);
    }

    fn remove(&self, area: AreaName, keys: Vec<String>, callback: HostCallback<()>) {
        let result = self.delete(area, &keys);
        self.finish("remove", area, result, callback);
    }

    fn clear(&self, area: AreaName, callback: HostCallback<()>) {
        let result = self.wipe(area);
        self.finish("clear", area, result, callback);
    }

    fn subscribe(&self, sink: HostChangeSink) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }
}
