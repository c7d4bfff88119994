//! Error types for satchel operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Host storage {operation} failed: {reason}")]
    Host { operation: String, reason: String },

    #[error("Host storage dropped the {operation} callback without answering")]
    HostDisconnected { operation: String },

    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Resource {resource} takes {expected} arguments, got {got}")]
    ArityMismatch {
        resource: String,
        expected: usize,
        got: usize,
    },

    #[error("Invalid refresh pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid background command: {reason}")]
    InvalidCommand { reason: String },
}

/// Loader (refresh fetch) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Fetch for {resource} failed: {reason}")]
    Fetch { resource: String, reason: String },

    #[error("Invalid loader argument {name}: {value}")]
    InvalidArgument { name: String, value: String },

    #[error("Loader aborted: {reason}")]
    Aborted { reason: String },
}

/// Returned by update subscribers to report a failed callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Update callback for {key} failed: {reason}")]
    Callback { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Master error type for all satchel errors.
#[derive(Debug, Clone, Error)]
pub enum SatchelError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for satchel operations.
pub type SatchelResult<T> = Result<T, SatchelError>;

// =============================================================================
// TESTS
// =============================================================================
