//! Storage backend chosen from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use satchel_core::{
    AreaName, ConfigError, SatchelResult, StorageBackendKind, StorageError, StorageItems,
    StorageSettings,
};

use crate::adapter::{KeyQuery, StorageAdapter};
use crate::events::ChangeHub;
use crate::host::HostStorageAdapter;
use crate::lmdb::LmdbHost;
use crate::memory::InMemoryStorage;

/// Whichever adapter `[storage]` selected.
pub enum ConfiguredStorage {
    Memory(InMemoryStorage),
    Lmdb(HostStorageAdapter<LmdbHost>),
}

impl ConfiguredStorage {
    /// Open the backend named by `settings.backend`.
    pub fn open(settings: &StorageSettings) -> SatchelResult<Self> {
        match settings.backend {
            StorageBackendKind::Memory => Ok(ConfiguredStorage::Memory(InMemoryStorage::new())),
            StorageBackendKind::Lmdb => {
                let path = settings.path.as_ref().ok_or_else(|| ConfigError::MissingRequired {
                    field: "storage.path".to_string(),
                })?;
                let host = LmdbHost::open(path, settings.max_size_mb).map_err(StorageError::from)?;
                Ok(ConfiguredStorage::Lmdb(HostStorageAdapter::new(Arc::new(host))))
            }
        }
    }

    pub fn kind(&self) -> StorageBackendKind {
        match self {
            ConfiguredStorage::Memory(_) => StorageBackendKind::Memory,
            ConfiguredStorage::Lmdb(_) => StorageBackendKind::Lmdb,
        }
    }

    fn inner(&self) -> &dyn StorageAdapter {
        match self {
            ConfiguredStorage::Memory(storage) => storage,
            ConfiguredStorage::Lmdb(storage) => storage,
        }
    }
}

#[async_trait]
impl StorageAdapter for ConfiguredStorage {
    async fn get(&self, area: AreaName, keys: KeyQuery) -> SatchelResult<StorageItems> {
        self.inner().get(area, keys).await
    }

    async fn set(&self, area: AreaName, items: StorageItems) -> SatchelResult<()> {
        self.inner().set(area, items).await
    }

    async fn remove(&self, area: AreaName, keys: Vec<String>) -> SatchelResult<()> {
        self.inner().remove(area, keys).await
    }

    async fn clear(&self, area: AreaName) -> SatchelResult<()> {
        self.inner().clear(area).await
    }

    fn on_changed(&self) -> &ChangeHub {
        self.inner().on_changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::SatchelError;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_settings_open_memory() {
        let storage = ConfiguredStorage::open(&StorageSettings::default())
            .expect("memory backend should open");
        assert_eq!(storage.kind(), StorageBackendKind::Memory);
        storage
            .set_one(AreaName::Session, "k", json!(1))
            .await
            .expect("set should succeed");
        assert_eq!(
            storage
                .get_one(AreaName::Session, "k")
                .await
                .expect("get should succeed"),
            Some(json!(1))
        );
    }

    #[tokio::test]
    async fn test_lmdb_backend_opens_at_path() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let settings = StorageSettings {
            backend: StorageBackendKind::Lmdb,
            path: Some(temp_dir.path().to_path_buf()),
            max_size_mb: 4,
        };
        let storage = ConfiguredStorage::open(&settings).expect("lmdb backend should open");
        assert_eq!(storage.kind(), StorageBackendKind::Lmdb);
        storage
            .set_one(AreaName::Local, "k", json!("v"))
            .await
            .expect("set should succeed");
        assert!(storage
            .get_one(AreaName::Session, "k")
            .await
            .expect("get should succeed")
            .is_none());
    }

    #[test]
    fn test_lmdb_without_path_is_config_error() {
        let settings = StorageSettings {
            backend: StorageBackendKind::Lmdb,
            path: None,
            max_size_mb: 4,
        };
        assert!(matches!(
            ConfiguredStorage::open(&settings),
            Err(SatchelError::Config(ConfigError::MissingRequired { .. }))
        ));
    }
}
