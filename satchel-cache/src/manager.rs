//! TTL cache over the `session` storage area.
//!
//! Reads never block on a refresh. A missing or expired entry makes the
//! reader write a `<key>-refresh` signal and return whatever it found; the
//! background refresh dispatcher turns that signal into a loader call and a
//! fresh write, which in turn reaches per-key update listeners.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use satchel_core::{
    is_refresh_key, now_millis, refresh_key, AreaName, CacheEntry, CacheError, CacheSettings,
    EpochMillis, ListenerError, ListenerId, SatchelResult, StorageChanges, DEFAULT_TTL_MS,
};
use satchel_storage::{KeyQuery, StorageAdapter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Every cache entry lives in this area.
pub const CACHE_AREA: AreaName = AreaName::Session;

/// Callback for successful data updates on one key: `(key, value)`.
pub type UpdateCallback = Arc<dyn Fn(&str, &Value) -> Result<(), ListenerError> + Send + Sync>;

type ListenerMap = HashMap<String, Vec<(ListenerId, UpdateCallback)>>;

// ============================================================================
// READ RESULT
// ============================================================================

/// Outcome of [`CacheManager::get_cached_data`].
///
/// `value` may be stale; `refresh_scheduled` says whether this read wrote a
/// refresh signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRead<T> {
    pub value: Option<T>,
    pub expiry: Option<EpochMillis>,
    pub refresh_scheduled: bool,
}

impl<T> CachedRead<T> {
    pub fn miss(refresh_scheduled: bool) -> Self {
        Self {
            value: None,
            expiry: None,
            refresh_scheduled,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn map<U, F>(self, f: F) -> CachedRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CachedRead {
            value: self.value.map(f),
            expiry: self.expiry,
            refresh_scheduled: self.refresh_scheduled,
        }
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that found a fresh entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Reads that found an expired entry.
    pub stale_reads: u64,
    /// Refresh signals successfully written.
    pub refresh_signals: u64,
    /// Update callbacks invoked without error.
    pub updates_delivered: u64,
    /// Update callbacks that returned an error or panicked.
    pub listener_failures: u64,
}

impl CacheStats {
    /// Fraction of reads served fresh.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.stale_reads;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_reads: AtomicU64,
    refresh_signals: AtomicU64,
    updates_delivered: AtomicU64,
    listener_failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            refresh_signals: self.refresh_signals.load(Ordering::Relaxed),
            updates_delivered: self.updates_delivered.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// CACHE MANAGER
// ============================================================================

/// Typed get/set/invalidate over the `session` area with per-key update
/// listeners.
///
/// Construction subscribes to the adapter's change events; [`destroy`]
/// (also run on drop) removes that subscription and every update listener.
///
/// [`destroy`]: CacheManager::destroy
pub struct CacheManager<S: StorageAdapter + 'static> {
    storage: Arc<S>,
    default_ttl: Duration,
    listeners: Arc<RwLock<ListenerMap>>,
    stats: Arc<StatsCounters>,
    storage_listener: Mutex<Option<ListenerId>>,
}

impl<S: StorageAdapter + 'static> CacheManager<S> {
    /// Create a manager and subscribe it to `storage` change events.
    pub fn new(storage: Arc<S>, default_ttl: Duration) -> Self {
        let listeners: Arc<RwLock<ListenerMap>> = Arc::new(RwLock::new(HashMap::new()));
        let stats = Arc::new(StatsCounters::default());

        let dispatch_listeners = Arc::clone(&listeners);
        let dispatch_stats = Arc::clone(&stats);
        let id = storage.on_changed().add_listener(move |changes, area| {
            dispatch_updates(&dispatch_listeners, &dispatch_stats, changes, area);
        });
        tracing::info!(listener = %id, ttl_ms = default_ttl.as_millis() as u64, "Cache manager attached to storage");

        Self {
            storage,
            default_ttl,
            listeners,
            stats,
            storage_listener: Mutex::new(Some(id)),
        }
    }

    /// Create a manager using the configured default TTL.
    pub fn with_settings(storage: Arc<S>, settings: &CacheSettings) -> Self {
        Self::new(storage, settings.default_ttl())
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Read `session[key]`, scheduling a refresh when it is missing or
    /// expired. Returns the value found, stale or not.
    ///
    /// Storage read failures propagate. A failed signal write is logged and
    /// reported as `refresh_scheduled = false`.
    pub async fn get_cached_data<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> SatchelResult<CachedRead<T>> {
        let now = now_millis();
        let entry = self.read_entry(key).await?;

        let needs_refresh = match &entry {
            None => {
                StatsCounters::bump(&self.stats.misses);
                tracing::debug!(key, "Cache miss");
                true
            }
            Some(entry) if entry.is_expired_at(now) => {
                StatsCounters::bump(&self.stats.stale_reads);
                tracing::debug!(key, expiry = entry.expiry, "Cache entry expired");
                true
            }
            Some(_) => {
                StatsCounters::bump(&self.stats.hits);
                tracing::debug!(key, "Cache hit");
                false
            }
        };

        let refresh_scheduled = needs_refresh && self.signal_refresh(key, now).await;

        let Some(entry) = entry else {
            return Ok(CachedRead::miss(refresh_scheduled));
        };
        let value = serde_json::from_value::<T>(entry.value).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(CachedRead {
            value: Some(value),
            expiry: Some(entry.expiry),
            refresh_scheduled,
        })
    }

    /// Schedule a refresh only when the entry is missing or expired.
    /// Returns whether a signal was written.
    pub async fn ensure_fresh(&self, key: &str) -> SatchelResult<bool> {
        let now = now_millis();
        let fresh = self
            .read_entry(key)
            .await?
            .is_some_and(|entry| entry.is_fresh_at(now));
        if fresh {
            return Ok(false);
        }
        self.write_signal(key, now).await?;
        Ok(true)
    }

    /// Read and decode the raw entry. Undecodable entries count as absent.
    async fn read_entry(&self, key: &str) -> SatchelResult<Option<CacheEntry<Value>>> {
        let Some(raw) = self.storage.get_one(CACHE_AREA, key).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<CacheEntry<Value>>(raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring malformed cache entry");
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write `session[key] = {value, expiry: now + ttl}`.
    pub async fn set_cached_data<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> SatchelResult<()> {
        let value = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.set_cached_value(key, value, ttl).await
    }

    /// Untyped form of [`CacheManager::set_cached_data`].
    pub async fn set_cached_value(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> SatchelResult<()> {
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl), now_millis());
        let expiry = entry.expiry;
        let raw = serde_json::to_value(entry).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.storage.set_one(CACHE_AREA, key, raw).await?;
        tracing::debug!(key, expiry, "Cache entry written");
        Ok(())
    }

    /// Write the refresh signal unconditionally.
    pub async fn trigger_refresh(&self, key: &str) -> SatchelResult<()> {
        self.write_signal(key, now_millis()).await
    }

    pub async fn clear_cached_data(&self, key: &str) -> SatchelResult<()> {
        self.storage.remove_one(CACHE_AREA, key).await
    }

    /// Wipe the whole `session` area.
    pub async fn clear_all_cached_data(&self) -> SatchelResult<()> {
        self.storage.clear(CACHE_AREA).await?;
        tracing::info!("Cleared all cached data");
        Ok(())
    }

    /// Raw keys currently present in the cache area, signals included.
    pub async fn cached_keys(&self) -> SatchelResult<Vec<String>> {
        Ok(self
            .storage
            .get(CACHE_AREA, KeyQuery::All)
            .await?
            .into_keys()
            .collect())
    }

    async fn write_signal(&self, key: &str, now: EpochMillis) -> SatchelResult<()> {
        let signal = refresh_key(key);
        self.storage
            .set_one(CACHE_AREA, &signal, Value::from(now))
            .await?;
        StatsCounters::bump(&self.stats.refresh_signals);
        tracing::debug!(key, signal = %signal, "Refresh signal written");
        Ok(())
    }

    /// Fire-and-forget signal used on the read path.
    async fn signal_refresh(&self, key: &str, now: EpochMillis) -> bool {
        match self.write_signal(key, now).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to write refresh signal");
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Update listeners
    // ------------------------------------------------------------------------

    /// Subscribe to successful data writes on `key`.
    pub fn add_update_listener<F>(&self, key: &str, callback: F) -> ListenerId
    where
        F: Fn(&str, &Value) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        let callback: UpdateCallback = Arc::new(callback);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push((id, callback));
        tracing::debug!(key, listener = %id, "Update listener added");
        id
    }

    /// Unsubscribe; removing the last listener for a key frees its bucket.
    pub fn remove_update_listener(&self, key: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(bucket) = listeners.get_mut(key) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|(existing, _)| *existing != id);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            listeners.remove(key);
        }
        removed
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Number of keys with at least one listener.
    pub fn watched_key_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Dispatch a change batch to update listeners. The adapter subscription
    /// calls this for every batch; it is public for hosts that deliver change
    /// events through another channel.
    pub fn handle_storage_change(&self, changes: &StorageChanges, area: AreaName) {
        dispatch_updates(&self.listeners, &self.stats, changes, area);
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Detach from storage and drop every update listener. Idempotent.
    pub fn destroy(&self) {
        let id = self
            .storage_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(id) = id else {
            return;
        };
        self.storage.on_changed().remove_listener(id);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!(listener = %id, "Cache manager detached from storage");
    }

    pub fn is_destroyed(&self) -> bool {
        self.storage_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<S: StorageAdapter + 'static> Drop for CacheManager<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<S: StorageAdapter + 'static> std::fmt::Debug for CacheManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("default_ttl", &self.default_ttl)
            .field("watched_keys", &self.watched_key_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<S: StorageAdapter + Default + 'static> Default for CacheManager<S> {
    fn default() -> Self {
        Self::new(
            Arc::new(S::default()),
            Duration::from_millis(DEFAULT_TTL_MS),
        )
    }
}

/// Deliver `(key, entry.value)` to the listeners of every written data key
/// in a `session` batch. Signals and deletions are skipped; each callback's
/// error or panic is contained.
fn dispatch_updates(
    listeners: &RwLock<ListenerMap>,
    stats: &StatsCounters,
    changes: &StorageChanges,
    area: AreaName,
) {
    if area != CACHE_AREA {
        return;
    }

    for (key, change) in changes {
        if is_refresh_key(key) {
            continue;
        }
        let Some(new_value) = &change.new_value else {
            continue;
        };

        let callbacks: Vec<UpdateCallback> = listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|bucket| bucket.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        if callbacks.is_empty() {
            continue;
        }

        let entry = match serde_json::from_value::<CacheEntry<Value>>(new_value.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping update dispatch for malformed entry");
                continue;
            }
        };

        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(key.as_str(), &entry.value))) {
                Ok(Ok(())) => StatsCounters::bump(&stats.updates_delivered),
                Ok(Err(e)) => {
                    StatsCounters::bump(&stats.listener_failures);
                    tracing::warn!(key = %key, error = %e, "Update listener failed");
                }
                Err(_) => {
                    StatsCounters::bump(&stats.listener_failures);
                    tracing::error!(key = %key, "Update listener panicked");
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
