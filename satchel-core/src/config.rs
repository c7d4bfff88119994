//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cache entry lifetime in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 30_000;

/// Cache behaviour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// TTL applied when a write does not specify one.
    pub default_ttl_ms: u64,
    /// Per-resource TTL overrides, keyed by resource prefix (e.g. `"news"`).
    pub resource_ttl_ms: BTreeMap<String, u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            resource_ttl_ms: BTreeMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// TTL override for a resource prefix, if one is configured.
    pub fn ttl_for(&self, resource_prefix: &str) -> Option<Duration> {
        self.resource_ttl_ms
            .get(resource_prefix)
            .map(|ms| Duration::from_millis(*ms))
    }
}

/// Which storage implementation backs the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Process-local maps. Nothing survives a restart.
    Memory,
    /// LMDB environment on disk.
    Lmdb,
}

/// Storage backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    pub backend: StorageBackendKind,
    /// LMDB directory. Required when `backend = "lmdb"`.
    pub path: Option<PathBuf>,
    /// LMDB map size in megabytes; writes beyond it fail like a quota error.
    pub max_size_mb: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            path: None,
            max_size_mb: 64,
        }
    }
}

/// Logging settings consumed by [`crate::telemetry::init_tracing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "satchel=info".to_string(),
            json: false,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SatchelConfig {
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub log: LogConfig,
}

impl SatchelConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> SatchelResult<Self> {
        let config: SatchelConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn from_path(path: &Path) -> SatchelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `SATCHEL_CACHE_DEFAULT_TTL_MS`: default entry TTL (default: 30000)
    /// - `SATCHEL_STORAGE_BACKEND`: `memory` or `lmdb` (default: memory)
    /// - `SATCHEL_STORAGE_PATH`: LMDB directory
    /// - `SATCHEL_STORAGE_MAX_SIZE_MB`: LMDB map size (default: 64)
    /// - `SATCHEL_LOG_FILTER`: tracing filter (default: satchel=info)
    /// - `SATCHEL_LOG_JSON`: `true` for JSON output (default: false)
    pub fn from_env() -> SatchelResult<Self> {
        let defaults = Self::default();

        let backend = match std::env::var("SATCHEL_STORAGE_BACKEND") {
            Ok(raw) => match raw.as_str() {
                "memory" => StorageBackendKind::Memory,
                "lmdb" => StorageBackendKind::Lmdb,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "storage.backend".to_string(),
                        value: other.to_string(),
                        reason: "expected memory or lmdb".to_string(),
                    }
                    .into())
                }
            },
            Err(_) => defaults.storage.backend,
        };

        let config = Self {
            cache: CacheSettings {
                default_ttl_ms: env_parse("SATCHEL_CACHE_DEFAULT_TTL_MS")
                    .unwrap_or(defaults.cache.default_ttl_ms),
                resource_ttl_ms: defaults.cache.resource_ttl_ms,
            },
            storage: StorageSettings {
                backend,
                path: std::env::var("SATCHEL_STORAGE_PATH")
                    .ok()
                    .map(PathBuf::from)
                    .or(defaults.storage.path),
                max_size_mb: env_parse("SATCHEL_STORAGE_MAX_SIZE_MB")
                    .unwrap_or(defaults.storage.max_size_mb),
            },
            log: LogConfig {
                filter: std::env::var("SATCHEL_LOG_FILTER").unwrap_or(defaults.log.filter),
                json: env_parse("SATCHEL_LOG_JSON").unwrap_or(defaults.log.json),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - default and per-resource TTLs are positive
    /// - the LMDB backend has a path and a non-zero map size
    pub fn validate(&self) -> SatchelResult<()> {
        if self.cache.default_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.default_ttl_ms".to_string(),
                value: "0".to_string(),
                reason: "default_ttl_ms must be positive".to_string(),
            }
            .into());
        }

        if let Some((resource, _)) = self.cache.resource_ttl_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::InvalidValue {
                field: format!("cache.resource_ttl_ms.{resource}"),
                value: "0".to_string(),
                reason: "resource TTLs must be positive".to_string(),
            }
            .into());
        }

        if self.storage.backend == StorageBackendKind::Lmdb {
            if self.storage.path.is_none() {
                return Err(ConfigError::MissingRequired {
                    field: "storage.path".to_string(),
                }
                .into());
            }
            if self.storage.max_size_mb == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "storage.max_size_mb".to_string(),
                    value: "0".to_string(),
                    reason: "max_size_mb must be positive".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

// =============================================================================
// TESTS
// =============================================================================
