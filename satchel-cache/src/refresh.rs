//! Refresh listener registration.
//!
//! A [`RefreshRegistry`] pairs refresh regexes with async loaders. Once
//! attached to the storage adapter it watches for newly written
//! `<key>-refresh` signals in the `session` area, runs the first matching
//! loader with the captured arguments, and writes the result back under the
//! data key. Loader failures are logged and swallowed; the stale entry stays.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use satchel_core::{
    data_key_of, is_refresh_key, CacheSettings, ConfigError, ListenerId, LoaderError,
    SatchelResult,
};
use satchel_storage::StorageAdapter;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::keys::{capture_args, Resource};
use crate::manager::{CacheManager, CACHE_AREA};

// ============================================================================
// LOADERS
// ============================================================================

/// What a loader decided to do with its fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Write the value under the data key.
    Store(Value),
    /// Leave the cache untouched (e.g. the network switched mid-fetch).
    Discard { reason: String },
}

/// Fetches fresh data for one resource. Arguments arrive in capture order.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, args: Vec<String>) -> Result<LoadOutcome, LoaderError>;
}

/// Adapter turning an async closure into a [`Loader`].
pub struct FnLoader<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Loader for FnLoader<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<LoadOutcome, LoaderError>> + Send + 'static,
{
    async fn load(&self, args: Vec<String>) -> Result<LoadOutcome, LoaderError> {
        (self.f)(args).await
    }
}

/// Wrap an async closure as a shareable loader.
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn Loader>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<LoadOutcome, LoaderError>> + Send + 'static,
{
    Arc::new(FnLoader { f })
}

// ============================================================================
// DISPATCH OUTCOMES
// ============================================================================

/// Result of handling one refresh signal. Never an error: failures are
/// reported here and in the log, not to the storage event stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Stored { key: String },
    Discarded { key: String, reason: String },
    LoaderFailed { key: String, error: String },
    WriteFailed { key: String, error: String },
    /// No registered pattern matched the signal.
    Unmatched { signal: String },
}

impl RefreshOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, RefreshOutcome::Stored { .. })
    }
}

struct Registration {
    name: String,
    pattern: Regex,
    loader: Arc<dyn Loader>,
    ttl: Option<Duration>,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Refresh regex to loader table plus the background dispatcher.
pub struct RefreshRegistry<S: StorageAdapter + 'static> {
    cache: Arc<CacheManager<S>>,
    registrations: RwLock<Vec<Arc<Registration>>>,
    resource_ttl: CacheSettings,
    storage_listener: Mutex<Option<ListenerId>>,
}

impl<S: StorageAdapter + 'static> RefreshRegistry<S> {
    pub fn new(cache: Arc<CacheManager<S>>) -> Arc<Self> {
        Self::with_settings(cache, CacheSettings::default())
    }

    /// Registry whose resource registrations honour configured TTL overrides.
    pub fn with_settings(cache: Arc<CacheManager<S>>, settings: CacheSettings) -> Arc<Self> {
        Arc::new(Self {
            cache,
            registrations: RwLock::new(Vec::new()),
            resource_ttl: settings,
            storage_listener: Mutex::new(None),
        })
    }

    pub fn cache(&self) -> &Arc<CacheManager<S>> {
        &self.cache
    }

    /// Associate a refresh regex with a loader. Patterns are tried in
    /// registration order and the first match wins. `ttl` of `None` uses the
    /// cache manager's default. Captures are decoded like key arguments, so a
    /// capture holding a raw `-` does not match.
    pub fn register_refresh_listener(
        &self,
        pattern: Regex,
        loader: Arc<dyn Loader>,
        ttl: Option<Duration>,
    ) {
        let name = pattern.as_str().to_string();
        tracing::info!(pattern = %name, "Registered refresh listener");
        self.push(Registration {
            name,
            pattern,
            loader,
            ttl,
        });
    }

    /// Register a loader for a known resource using its derived regex. The
    /// TTL is the configured override, else the resource default.
    pub fn register_resource(&self, resource: Resource, loader: Arc<dyn Loader>) -> SatchelResult<()> {
        let pattern = resource.refresh_regex()?.clone();
        let ttl = self
            .resource_ttl
            .ttl_for(resource.prefix())
            .unwrap_or_else(|| resource.default_ttl());
        tracing::info!(resource = %resource, ttl_ms = ttl.as_millis() as u64, "Registered resource loader");
        self.push(Registration {
            name: resource.prefix().to_string(),
            pattern,
            loader,
            ttl: Some(ttl),
        });
        Ok(())
    }

    fn push(&self, registration: Registration) {
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(registration));
    }

    pub fn registration_count(&self) -> usize {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// First registration whose pattern matches the full signal key, with the
    /// captured arguments.
    fn find_match(&self, signal_key: &str) -> Option<(Arc<Registration>, Vec<String>)> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|registration| {
                capture_args(&registration.pattern, signal_key)
                    .map(|args| (Arc::clone(registration), args))
            })
    }

    /// Run the loader for one refresh signal and store its result.
    pub async fn handle_refresh_key(&self, signal_key: &str) -> RefreshOutcome {
        let Some(data_key) = data_key_of(signal_key) else {
            return RefreshOutcome::Unmatched {
                signal: signal_key.to_string(),
            };
        };
        let Some((registration, args)) = self.find_match(signal_key) else {
            tracing::debug!(signal = %signal_key, "No refresh listener matches signal");
            return RefreshOutcome::Unmatched {
                signal: signal_key.to_string(),
            };
        };

        tracing::debug!(key = %data_key, loader = %registration.name, ?args, "Running refresh loader");
        match registration.loader.load(args).await {
            Ok(LoadOutcome::Store(value)) => {
                match self
                    .cache
                    .set_cached_value(data_key, value, registration.ttl)
                    .await
                {
                    Ok(()) => RefreshOutcome::Stored {
                        key: data_key.to_string(),
                    },
                    Err(e) => {
                        tracing::error!(key = %data_key, error = %e, "Failed to store refreshed data");
                        RefreshOutcome::WriteFailed {
                            key: data_key.to_string(),
                            error: e.to_string(),
                        }
                    }
                }
            }
            Ok(LoadOutcome::Discard { reason }) => {
                tracing::debug!(key = %data_key, reason = %reason, "Refresh result discarded");
                RefreshOutcome::Discarded {
                    key: data_key.to_string(),
                    reason,
                }
            }
            Err(e) => {
                tracing::warn!(key = %data_key, loader = %registration.name, error = %e, "Refresh loader failed");
                RefreshOutcome::LoaderFailed {
                    key: data_key.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Start watching storage for refresh signals. Each signal is handled on
    /// a task spawned onto the current tokio runtime, so the storage event
    /// stack never waits on a loader. Attaching twice is a no-op.
    pub fn attach(self: &Arc<Self>) -> SatchelResult<ListenerId> {
        let mut slot = self
            .storage_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = *slot {
            return Ok(id);
        }

        let handle = Handle::try_current().map_err(|e| ConfigError::InvalidValue {
            field: "runtime".to_string(),
            value: "none".to_string(),
            reason: format!("refresh dispatch needs a tokio runtime: {e}"),
        })?;
        let registry: Weak<Self> = Arc::downgrade(self);

        let id = self
            .cache
            .storage()
            .on_changed()
            .add_listener(move |changes, area| {
                if area != CACHE_AREA {
                    return;
                }
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                for (key, change) in changes {
                    if !is_refresh_key(key) || change.new_value.is_none() {
                        continue;
                    }
                    let registry = Arc::clone(&registry);
                    let signal = key.clone();
                    handle.spawn(async move {
                        registry.handle_refresh_key(&signal).await;
                    });
                }
            });

        tracing::info!(listener = %id, registrations = self.registration_count(), "Refresh dispatcher attached");
        *slot = Some(id);
        Ok(id)
    }

    /// Stop watching storage. Idempotent.
    pub fn detach(&self) {
        let id = self
            .storage_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.cache.storage().on_changed().remove_listener(id);
            tracing::info!(listener = %id, "Refresh dispatcher detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.storage_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<S: StorageAdapter + 'static> Drop for RefreshRegistry<S> {
    fn drop(&mut self) {
        self.detach();
    }
}

// =============================================================================
// TESTS
// =============================================================================
