//! Satchel Storage - Storage Adapter and Implementations
//!
//! Defines the uniform asynchronous key-value interface over the three named
//! storage areas (`local`, `session`, `sync`) and its change notification
//! contract.
//!
//! Two adapters implement it:
//!
//! - [`InMemoryStorage`]: per-area maps, used in tests and in hosts without
//!   extension storage.
//! - [`HostStorageAdapter`]: wraps a callback-style host primitive
//!   ([`HostStorage`]) in futures. [`LmdbHost`] is the native host used
//!   outside the browser.
//!
//! [`ConfiguredStorage`] picks one of them from `[storage]` settings.
//!
//! Both deliver [`StorageChanges`](satchel_core::StorageChanges) to every
//! listener registered on [`ChangeHub`] before the write future resolves.

pub mod adapter;
pub mod configured;
pub mod events;
pub mod host;
pub mod lmdb;
pub mod memory;

pub use adapter::{KeyQuery, StorageAdapter};
pub use configured::ConfiguredStorage;
pub use events::{ChangeCallback, ChangeHub};
pub use host::{HostCallback, HostChangeSink, HostError, HostStorage, HostStorageAdapter};
pub use lmdb::{LmdbHost, LmdbHostError};
pub use memory::InMemoryStorage;
