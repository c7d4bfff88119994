//! Satchel Core - Session Cache Types
//!
//! Pure data structures shared by every satchel crate: storage area names,
//! change records, cache entries, networks, and the error taxonomy.
//! This crate performs no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{
    CacheSettings, LogConfig, SatchelConfig, StorageBackendKind, StorageSettings,
    DEFAULT_TTL_MS,
};
pub use error::{
    CacheError, ConfigError, ListenerError, LoaderError, SatchelError, SatchelResult,
    StorageError,
};

// ============================================================================
// TIME
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Absolute wall-clock time in epoch milliseconds.
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// Convert a TTL into milliseconds, saturating at `i64::MAX`.
pub fn ttl_millis(ttl: Duration) -> EpochMillis {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// REFRESH SIGNALS
// ============================================================================

/// Suffix appended to a data key to form its refresh signal key.
pub const REFRESH_SUFFIX: &str = "-refresh";

/// Build the refresh signal key for a data key.
pub fn refresh_key(key: &str) -> String {
    format!("{key}{REFRESH_SUFFIX}")
}

/// Returns true if `key` is a refresh signal rather than cached data.
pub fn is_refresh_key(key: &str) -> bool {
    key.ends_with(REFRESH_SUFFIX)
}

/// Strip the refresh suffix, returning the data key it signals.
pub fn data_key_of(signal_key: &str) -> Option<&str> {
    signal_key.strip_suffix(REFRESH_SUFFIX)
}

// ============================================================================
// STORAGE AREAS
// ============================================================================

/// One of the three named storage areas exposed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaName {
    /// Persisted, device-local state.
    Local,
    /// Cleared when the browser session ends, or when a native host is
    /// reopened. Holds every cache entry.
    Session,
    /// Persisted and synchronized across devices.
    Sync,
}

impl AreaName {
    /// All areas, in a stable order.
    pub const ALL: [AreaName; 3] = [AreaName::Local, AreaName::Session, AreaName::Sync];

    pub fn as_str(&self) -> &'static str {
        match self {
            AreaName::Local => "local",
            AreaName::Session => "session",
            AreaName::Sync => "sync",
        }
    }
}

impl fmt::Display for AreaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AreaName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(AreaName::Local),
            "session" => Ok(AreaName::Session),
            "sync" => Ok(AreaName::Sync),
            other => Err(ConfigError::InvalidValue {
                field: "area".to_string(),
                value: other.to_string(),
                reason: "expected one of local, session, sync".to_string(),
            }),
        }
    }
}

// ============================================================================
// CHANGE RECORDS
// ============================================================================

/// Old/new value pair delivered for a single changed key.
///
/// `new_value == None` signals deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageChange {
    #[serde(rename = "oldValue", skip_serializing_if = "Option::is_none", default)]
    pub old_value: Option<Value>,
    #[serde(rename = "newValue", skip_serializing_if = "Option::is_none", default)]
    pub new_value: Option<Value>,
}

impl StorageChange {
    pub fn written(old_value: Option<Value>, new_value: Value) -> Self {
        Self {
            old_value,
            new_value: Some(new_value),
        }
    }

    pub fn removed(old_value: Value) -> Self {
        Self {
            old_value: Some(old_value),
            new_value: None,
        }
    }

    /// Returns true if this change deleted the key.
    pub fn is_deletion(&self) -> bool {
        self.new_value.is_none()
    }
}

/// A batch of changes keyed by storage key, as delivered to listeners.
pub type StorageChanges = BTreeMap<String, StorageChange>;

/// Key/value pairs read from or written to a storage area.
pub type StorageItems = BTreeMap<String, Value>;

/// Opaque handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Generate a new timestamp-sortable listener id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// CACHE ENTRIES
// ============================================================================

/// A cached value with its absolute expiry.
///
/// Entries are never mutated in place: every write replaces the whole entry.
/// An entry is fresh iff `now < expiry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Absolute expiry in epoch milliseconds.
    pub expiry: EpochMillis,
}

impl<T> CacheEntry<T> {
    /// Create an entry that expires `ttl` after `now`.
    pub fn new(value: T, ttl: Duration, now: EpochMillis) -> Self {
        Self {
            value,
            expiry: now.saturating_add(ttl_millis(ttl)),
        }
    }

    pub fn is_fresh_at(&self, now: EpochMillis) -> bool {
        now < self.expiry
    }

    pub fn is_expired_at(&self, now: EpochMillis) -> bool {
        !self.is_fresh_at(now)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_at(&self, now: EpochMillis) -> Duration {
        let left = self.expiry.saturating_sub(now).max(0);
        Duration::from_millis(left as u64)
    }

    pub fn map<U, F>(self, f: F) -> CacheEntry<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheEntry {
            value: f(self.value),
            expiry: self.expiry,
        }
    }
}

// ============================================================================
// NETWORKS
// ============================================================================

/// Blockchain network a cached resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(LoaderError::InvalidArgument {
                name: "network".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_refresh_key_round_trip() {
        let signal = refresh_key("news");
        assert_eq!(signal, "news-refresh");
        assert!(is_refresh_key(&signal));
        assert_eq!(data_key_of(&signal), Some("news"));
        assert!(!is_refresh_key("news"));
        assert_eq!(data_key_of("news"), None);
    }

    #[test]
    fn test_area_name_parse_and_display() {
        for area in AreaName::ALL {
            assert_eq!(area.as_str().parse::<AreaName>().unwrap(), area);
            assert_eq!(area.to_string(), area.as_str());
        }
        assert!("managed".parse::<AreaName>().is_err());
    }

    #[test]
    fn test_cache_entry_freshness_boundary() {
        let entry = CacheEntry::new("v", Duration::from_millis(10), 1_000);
        assert_eq!(entry.expiry, 1_010);
        assert!(entry.is_fresh_at(1_009));
        assert!(entry.is_expired_at(1_010));
        assert_eq!(entry.remaining_at(1_004), Duration::from_millis(6));
        assert_eq!(entry.remaining_at(2_000), Duration::ZERO);
    }

    #[test]
    fn test_cache_entry_serialized_shape() {
        let entry = CacheEntry::new(json!({"balance": 42}), Duration::from_secs(1), 0);
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(encoded, json!({"value": {"balance": 42}, "expiry": 1000}));
    }

    #[test]
    fn test_storage_change_serialized_shape() {
        let change = StorageChange::removed(json!(1));
        assert!(change.is_deletion());
        let encoded = serde_json::to_value(&change).unwrap();
        assert_eq!(encoded, json!({"oldValue": 1}));
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!(Network::Testnet.to_string(), "testnet");
        assert!(matches!(
            "previewnet".parse::<Network>(),
            Err(LoaderError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_ttl_millis_saturates() {
        assert_eq!(ttl_millis(Duration::from_millis(30_000)), 30_000);
        assert_eq!(ttl_millis(Duration::MAX), i64::MAX);
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let a = ListenerId::new();
        let b = ListenerId::new();
        assert_ne!(a, b);
    }
    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            #[test]
            fn prop_signal_strips_back_to_data_key(key in "[a-z0-9%-]{1,40}") {
                let signal = refresh_key(&key);
                prop_assert!(is_refresh_key(&signal));
                prop_assert_eq!(data_key_of(&signal), Some(key.as_str()));
            }

            #[test]
            fn prop_entry_fresh_strictly_before_expiry(
                now in 0i64..1_000_000_000,
                ttl_ms in 0u64..10_000_000,
                offset in 0i64..20_000_000,
            ) {
                let entry = CacheEntry::new((), Duration::from_millis(ttl_ms), now);
                let at = now + offset;
                prop_assert_eq!(entry.is_fresh_at(at), at < now + ttl_ms as i64);
                prop_assert_eq!(entry.is_fresh_at(at), !entry.is_expired_at(at));
            }
        }
    }
}
