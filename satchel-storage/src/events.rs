//! Change listener registry (`onChanged`).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use satchel_core::{AreaName, ListenerId, StorageChanges};

/// Callback invoked with every change batch, for every area.
pub type ChangeCallback = Arc<dyn Fn(&StorageChanges, AreaName) + Send + Sync>;

/// Listener registry shared by all areas of an adapter.
///
/// Listeners run synchronously, in registration order, on the thread that
/// completed the write. A panicking listener is logged and skipped; the
/// remaining listeners still run.
#[derive(Default)]
pub struct ChangeHub {
    listeners: RwLock<Vec<(ListenerId, ChangeCallback)>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every change batch.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&StorageChanges, AreaName) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Unsubscribe. Returns false if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(listener_id, _)| *listener_id == id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver a change batch to every listener. Empty batches are dropped.
    pub fn emit(&self, changes: &StorageChanges, area: AreaName) {
        if changes.is_empty() {
            return;
        }

        // Snapshot so listeners may (un)subscribe from inside the callback.
        let snapshot: Vec<(ListenerId, ChangeCallback)> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::trace!(area = %area, changed = changes.len(), listeners = snapshot.len(), "Dispatching storage changes");

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(changes, area))).is_err() {
                tracing::error!(listener = %id, area = %area, "Storage change listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for ChangeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
