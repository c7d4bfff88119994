//! Host-backed storage adapter.
//!
//! The host exposes storage as a callback API: every operation takes a
//! completion callback that receives either the result or the host's error
//! (the equivalent of `runtime.lastError`). [`HostStorageAdapter`] turns each
//! call into a future and forwards the host's change events to a
//! [`ChangeHub`].

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use satchel_core::{AreaName, SatchelResult, StorageChanges, StorageError, StorageItems};
use tokio::sync::oneshot;

use crate::adapter::{KeyQuery, StorageAdapter};
use crate::events::ChangeHub;

/// Error reported by the host through an operation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Completion callback handed to the host for one operation.
pub type HostCallback<T> = Box<dyn FnOnce(Result<T, HostError>) + Send + 'static>;

/// Sink the host pushes change batches into. Returns `false` once its
/// subscriber is gone; the host should then drop the sink.
pub type HostChangeSink = Arc<dyn Fn(StorageChanges, AreaName) -> bool + Send + Sync>;

/// Callback-style storage primitive provided by the host.
///
/// Implementations must invoke each callback exactly once. Change batches
/// for a write should be pushed to subscribed sinks before the write's
/// callback is invoked.
pub trait HostStorage: Send + Sync {
    /// Read keys; `None` requests the whole area.
    fn get(&self, area: AreaName, keys: Option<Vec<String>>, callback: HostCallback<StorageItems>);

    fn set(&self, area: AreaName, items: StorageItems, callback: HostCallback<()>);

    fn remove(&self, area: AreaName, keys: Vec<String>, callback: HostCallback<()>);

    fn clear(&self, area: AreaName, callback: HostCallback<()>);

    /// Register a sink for change batches across all areas.
    fn subscribe(&self, sink: HostChangeSink);
}

/// Adapter delegating to a [`HostStorage`] primitive.
pub struct HostStorageAdapter<H: HostStorage> {
    host: Arc<H>,
    hub: Arc<ChangeHub>,
}

impl<H: HostStorage> HostStorageAdapter<H> {
    /// Wrap a host primitive and subscribe to its change events.
    ///
    /// The host only holds the hub weakly; dropping the adapter frees the hub
    /// and its listeners, and the host drops the sink on its next batch.
    pub fn new(host: Arc<H>) -> Self {
        let hub = Arc::new(ChangeHub::new());
        let forward: Weak<ChangeHub> = Arc::downgrade(&hub);
        host.subscribe(Arc::new(move |changes: StorageChanges, area: AreaName| {
            match forward.upgrade() {
                Some(hub) => {
                    hub.emit(&changes, area);
                    true
                }
                None => false,
            }
        }));
        Self { host, hub }
    }

    /// Get a reference to the host primitive.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run one host call and await its callback.
    async fn call<T, F>(operation: &'static str, area: AreaName, invoke: F) -> SatchelResult<T>
    where
        T: Send + 'static,
        F: FnOnce(HostCallback<T>),
    {
        let (tx, rx) = oneshot::channel();
        invoke(Box::new(move |result| {
            // Receiver gone means the caller stopped waiting.
            let _ = tx.send(result);
        }));

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(operation, area = %area, error = %e, "Host storage operation failed");
                Err(StorageError::Host {
                    operation: operation.to_string(),
                    reason: e.message,
                }
                .into())
            }
            Err(_) => Err(StorageError::HostDisconnected {
                operation: operation.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl<H: HostStorage + 'static> StorageAdapter for HostStorageAdapter<H> {
    async fn get(&self, area: AreaName, keys: KeyQuery) -> SatchelResult<StorageItems> {
        Self::call("get", area, |done| self.host.get(area, keys.keys(), done)).await
    }

    async fn set(&self, area: AreaName, items: StorageItems) -> SatchelResult<()> {
        Self::call("set", area, |done| self.host.set(area, items, done)).await
    }

    async fn remove(&self, area: AreaName, keys: Vec<String>) -> SatchelResult<()> {
        Self::call("remove", area, |done| self.host.remove(area, keys, done)).await
    }

    async fn clear(&self, area: AreaName) -> SatchelResult<()> {
        Self::call("clear", area, |done| self.host.clear(area, done)).await
    }

    fn on_changed(&self) -> &ChangeHub {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::{SatchelError, StorageChange};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Host that answers from a map and can be told to fail or hang up.
    #[derive(Default)]
    struct ScriptedHost {
        items: Mutex<StorageItems>,
        sinks: Mutex<Vec<HostChangeSink>>,
        fail_with: Mutex<Option<String>>,
        drop_callbacks: Mutex<bool>,
    }

    impl ScriptedHost {
        fn answer<T>(&self, value: T, callback: HostCallback<T>) {
            if *self.drop_callbacks.lock().unwrap() {
                drop(callback);
                return;
            }
            match self.fail_with.lock().unwrap().clone() {
                Some(message) => callback(Err(HostError::new(message))),
                None => callback(Ok(value)),
            }
        }
    }

    impl HostStorage for ScriptedHost {
        fn get(&self, _area: AreaName, keys: Option<Vec<String>>, callback: HostCallback<StorageItems>) {
            let items = self.items.lock().unwrap().clone();
            let result = match keys {
                None => items,
                Some(keys) => items
                    .into_iter()
                    .filter(|(k, _)| keys.contains(k))
                    .collect(),
            };
            self.answer(result, callback);
        }

        fn set(&self, area: AreaName, items: StorageItems, callback: HostCallback<()>) {
            if self.fail_with.lock().unwrap().is_none() {
                let mut changes = StorageChanges::new();
                let mut stored = self.items.lock().unwrap();
                for (k, v) in items {
                    let old = stored.insert(k.clone(), v.clone());
                    changes.insert(k, StorageChange::written(old, v));
                }
                drop(stored);
                self.sinks
                    .lock()
                    .unwrap()
                    .retain(|sink| sink(changes.clone(), area));
            }
            self.answer((), callback);
        }

        fn remove(&self, _area: AreaName, keys: Vec<String>, callback: HostCallback<()>) {
            let mut stored = self.items.lock().unwrap();
            for k in keys {
                stored.remove(&k);
            }
            drop(stored);
            self.answer((), callback);
        }

        fn clear(&self, _area: AreaName, callback: HostCallback<()>) {
            self.items.lock().unwrap().clear();
            self.answer((), callback);
        }

        fn subscribe(&self, sink: HostChangeSink) {
            self.sinks.lock().unwrap().push(sink);
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_callbacks() {
        let adapter = HostStorageAdapter::new(Arc::new(ScriptedHost::default()));
        adapter
            .set_one(AreaName::Session, "a", json!({"n": 1}))
            .await
            .unwrap();
        let value = adapter.get_one(AreaName::Session, "a").await.unwrap();
        assert_eq!(value, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_host_changes_reach_hub_before_resolve() {
        let adapter = HostStorageAdapter::new(Arc::new(ScriptedHost::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        adapter.on_changed().add_listener(move |changes, area| {
            sink.lock().unwrap().push((area, changes.keys().cloned().collect::<Vec<_>>()));
        });

        adapter.set_one(AreaName::Session, "a", json!(1)).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (AreaName::Session, vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn test_dropped_adapter_releases_its_hub() {
        let host = Arc::new(ScriptedHost::default());
        let first = HostStorageAdapter::new(Arc::clone(&host));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        first.on_changed().add_listener(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let second = HostStorageAdapter::new(Arc::clone(&host));
        assert_eq!(host.sinks.lock().unwrap().len(), 2);

        drop(first);
        assert_eq!(Arc::strong_count(&hits), 1);

        second
            .set_one(AreaName::Session, "a", json!(1))
            .await
            .expect("set should succeed");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(host.sinks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_host_error_rejects() {
        let host = Arc::new(ScriptedHost::default());
        *host.fail_with.lock().unwrap() = Some("QUOTA_BYTES quota exceeded".to_string());
        let adapter = HostStorageAdapter::new(Arc::clone(&host));

        let result = adapter.set_one(AreaName::Session, "a", json!(1)).await;
        match result {
            Err(SatchelError::Storage(StorageError::Host { operation, reason })) => {
                assert_eq!(operation, "set");
                assert!(reason.contains("quota"));
            }
            other => panic!("expected host error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_callback_is_disconnect() {
        let host = Arc::new(ScriptedHost::default());
        *host.drop_callbacks.lock().unwrap() = true;
        let adapter = HostStorageAdapter::new(host);

        let result = adapter.get(AreaName::Local, KeyQuery::All).await;
        assert!(matches!(
            result,
            Err(SatchelError::Storage(StorageError::HostDisconnected { .. }))
        ));
    }
}
