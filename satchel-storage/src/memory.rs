//! In-memory storage adapter.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use satchel_core::{
    AreaName, SatchelResult, StorageChange, StorageChanges, StorageError, StorageItems,
};
use serde_json::Value;

use crate::adapter::{KeyQuery, StorageAdapter};
use crate::events::ChangeHub;

/// Per-area maps behind a lock, with the same change-event semantics as the
/// host-backed adapter.
///
/// An optional byte quota makes writes fail the way the host reports
/// `QUOTA_BYTES` errors, so callers' error paths can be exercised.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    areas: RwLock<HashMap<AreaName, StorageItems>>,
    hub: ChangeHub,
    quota_bytes: Option<usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit each area to roughly `quota_bytes` (key length plus JSON size).
    pub fn with_quota_bytes(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Number of keys currently held in an area.
    pub fn len(&self, area: AreaName) -> usize {
        self.areas
            .read()
            .map(|areas| areas.get(&area).map(|items| items.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, area: AreaName) -> bool {
        self.len(area) == 0
    }

    fn area_size(items: &StorageItems) -> usize {
        items
            .iter()
            .map(|(key, value)| key.len() + value.to_string().len())
            .sum()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn get(&self, area: AreaName, keys: KeyQuery) -> SatchelResult<StorageItems> {
        let areas = self.areas.read().map_err(|_| StorageError::LockPoisoned)?;
        let Some(items) = areas.get(&area) else {
            return Ok(StorageItems::new());
        };

        let result = match keys.keys() {
            None => items.clone(),
            Some(keys) => keys
                .into_iter()
                .filter_map(|key| items.get(&key).map(|value| (key, value.clone())))
                .collect(),
        };
        Ok(result)
    }

    async fn set(&self, area: AreaName, items: StorageItems) -> SatchelResult<()> {
        let changes = {
            let mut areas = self.areas.write().map_err(|_| StorageError::LockPoisoned)?;
            let current = areas.entry(area).or_default();

            if let Some(quota) = self.quota_bytes {
                let mut projected = current.clone();
                projected.extend(items.clone());
                let size = Self::area_size(&projected);
                if size > quota {
                    tracing::error!(area = %area, size, quota, "In-memory storage quota exceeded");
                    return Err(StorageError::Host {
                        operation: "set".to_string(),
                        reason: format!("QUOTA_BYTES quota exceeded ({size} > {quota})"),
                    }
                    .into());
                }
            }

            let mut changes = StorageChanges::new();
            for (key, value) in items {
                let old: Option<Value> = current.insert(key.clone(), value.clone());
                if old.as_ref() != Some(&value) {
                    changes.insert(key, StorageChange::written(old, value));
                }
            }
            changes
        };

        self.hub.emit(&changes, area);
        Ok(())
    }

    async fn remove(&self, area: AreaName, keys: Vec<String>) -> SatchelResult<()> {
        let changes = {
            let mut areas = self.areas.write().map_err(|_| StorageError::LockPoisoned)?;
            let mut changes = StorageChanges::new();
            if let Some(current) = areas.get_mut(&area) {
                for key in keys {
                    if let Some(old) = current.remove(&key) {
                        changes.insert(key, StorageChange::removed(old));
                    }
                }
            }
            changes
        };

        self.hub.emit(&changes, area);
        Ok(())
    }

    async fn clear(&self, area: AreaName) -> SatchelResult<()> {
        let changes: StorageChanges = {
            let mut areas = self.areas.write().map_err(|_| StorageError::LockPoisoned)?;
            areas
                .remove(&area)
                .unwrap_or_default()
                .into_iter()
                .map(|(key, old)| (key, StorageChange::removed(old)))
                .collect()
        };

        self.hub.emit(&changes, area);
        Ok(())
    }

    fn on_changed(&self) -> &ChangeHub {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::SatchelError;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Recorded = Arc<Mutex<Vec<(AreaName, StorageChanges)>>>;

    fn recording(storage: &InMemoryStorage) -> Recorded {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        storage.on_changed().add_listener(move |changes, area| {
            sink.lock().unwrap().push((area, changes.clone()));
        });
        recorded
    }

    fn items(pairs: &[(&str, Value)]) -> StorageItems {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_get_unknown_keys_are_absent() {
        let storage = InMemoryStorage::new();
        storage
            .set(AreaName::Session, items(&[("a", json!(1))]))
            .await
            .unwrap();

        let result = storage
            .get(AreaName::Session, KeyQuery::from(&["a", "missing"][..]))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result["a"], json!(1));
    }

    #[tokio::test]
    async fn test_get_all_returns_whole_area() {
        let storage = InMemoryStorage::new();
        storage
            .set(AreaName::Local, items(&[("a", json!(1)), ("b", json!(2))]))
            .await
            .unwrap();
        storage
            .set(AreaName::Session, items(&[("c", json!(3))]))
            .await
            .unwrap();

        let local = storage.get(AreaName::Local, KeyQuery::All).await.unwrap();
        assert_eq!(local.len(), 2);
        assert!(!local.contains_key("c"));
    }

    #[tokio::test]
    async fn test_set_emits_one_change_per_key() {
        let storage = InMemoryStorage::new();
        let recorded = recording(&storage);

        storage
            .set(AreaName::Session, items(&[("a", json!(1)), ("b", json!(2))]))
            .await
            .unwrap();
        storage
            .set(AreaName::Session, items(&[("a", json!(10))]))
            .await
            .unwrap();

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].1.len(), 2);
        let second = &recorded[1].1["a"];
        assert_eq!(second.old_value, Some(json!(1)));
        assert_eq!(second.new_value, Some(json!(10)));
    }

    #[tokio::test]
    async fn test_set_same_value_emits_nothing() {
        let storage = InMemoryStorage::new();
        storage
            .set(AreaName::Session, items(&[("a", json!(1))]))
            .await
            .unwrap();
        let recorded = recording(&storage);
        storage
            .set(AreaName::Session, items(&[("a", json!(1))]))
            .await
            .unwrap();
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_only_reports_existing_keys() {
        let storage = InMemoryStorage::new();
        storage
            .set(AreaName::Session, items(&[("a", json!(1))]))
            .await
            .unwrap();
        let recorded = recording(&storage);

        storage
            .remove(AreaName::Session, vec!["missing".to_string()])
            .await
            .unwrap();
        assert!(recorded.lock().unwrap().is_empty());

        storage
            .remove(AreaName::Session, vec!["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1.len(), 1);
        assert!(recorded[0].1["a"].is_deletion());
    }

    #[tokio::test]
    async fn test_clear_reports_every_existing_key() {
        let storage = InMemoryStorage::new();
        storage
            .set(AreaName::Session, items(&[("a", json!(1)), ("b", json!(2))]))
            .await
            .unwrap();
        storage
            .set(AreaName::Local, items(&[("keep", json!(true))]))
            .await
            .unwrap();
        let recorded = recording(&storage);

        storage.clear(AreaName::Session).await.unwrap();
        storage.clear(AreaName::Sync).await.unwrap();

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, AreaName::Session);
        assert_eq!(recorded[0].1.len(), 2);
        assert!(storage.is_empty(AreaName::Session));
        assert_eq!(storage.len(AreaName::Local), 1);
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_write() {
        let storage = InMemoryStorage::with_quota_bytes(16);
        let recorded = recording(&storage);

        let result = storage
            .set_one(AreaName::Session, "big", json!("x".repeat(64)))
            .await;
        assert!(matches!(
            result,
            Err(SatchelError::Storage(StorageError::Host { .. }))
        ));
        assert!(recorded.lock().unwrap().is_empty());
        assert!(storage.get_one(AreaName::Session, "big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_removed_listener_not_called() {
        let storage = InMemoryStorage::new();
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let id = storage.on_changed().add_listener(move |changes, area| {
            sink.lock().unwrap().push((area, changes.clone()));
        });
        assert!(storage.on_changed().remove_listener(id));

        storage
            .set_one(AreaName::Session, "a", json!(1))
            .await
            .unwrap();
        assert!(recorded.lock().unwrap().is_empty());
    }
}
