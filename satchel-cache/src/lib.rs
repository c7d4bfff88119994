//! Satchel Cache - TTL session cache with pull-based refresh
//!
//! Many UI contexts read network-derived data through [`CacheManager`]. A
//! missing or expired entry makes the reader write a `<key>-refresh` signal;
//! the background [`RefreshRegistry`] matches the signal against the
//! [`Resource`] refresh regexes, runs the registered loader, and writes the
//! fresh value back. That write reaches every context's update listeners
//! through the storage adapter's change events.
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use satchel_cache::{CacheManager, RefreshRegistry};
//! use satchel_core::DEFAULT_TTL_MS;
//! use satchel_storage::InMemoryStorage;
//!
//! # async fn wire() -> satchel_core::SatchelResult<()> {
//! let storage = Arc::new(InMemoryStorage::new());
//! let cache = Arc::new(CacheManager::new(
//!     storage,
//!     std::time::Duration::from_millis(DEFAULT_TTL_MS),
//! ));
//! let registry = RefreshRegistry::new(Arc::clone(&cache));
//! registry.attach()?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod keys;
pub mod loaders;
pub mod manager;
pub mod refresh;
pub mod store;
pub mod wallet;

pub use command::{CacheCommand, CommandKind, CommandRouter};
pub use keys::{derive_refresh_regex, CacheKey, Resource, KEY_SEPARATOR};
pub use loaders::{
    fetch_all_pages, fetch_offset_pages, with_network_guard, NetworkContext, NetworkGuard, Page,
    PageCursor, DEFAULT_MAX_PAGES, FIRST_PAGE_TOKEN,
};
pub use manager::{CacheManager, CacheStats, CachedRead, UpdateCallback, CACHE_AREA};
pub use refresh::{loader_fn, LoadOutcome, Loader, RefreshOutcome, RefreshRegistry};
pub use wallet::{register_wallet_loaders, WalletApi};
