//! Storage adapter trait.
//!
//! Every operation is asynchronous because it crosses into the host's
//! storage subsystem. Unknown keys are simply absent from `get` results.

use async_trait::async_trait;
use satchel_core::{AreaName, SatchelResult, StorageItems};
use serde_json::Value;

use crate::events::ChangeHub;

/// Which keys a `get` should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyQuery {
    /// A single key.
    One(String),
    /// Several keys; missing ones are omitted from the result.
    Many(Vec<String>),
    /// The whole area.
    All,
}

impl KeyQuery {
    /// The requested keys, or `None` for the whole area.
    pub fn keys(&self) -> Option<Vec<String>> {
        match self {
            KeyQuery::One(key) => Some(vec![key.clone()]),
            KeyQuery::Many(keys) => Some(keys.clone()),
            KeyQuery::All => None,
        }
    }

    /// Returns true if `key` is covered by this query.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyQuery::One(k) => k == key,
            KeyQuery::Many(keys) => keys.iter().any(|k| k == key),
            KeyQuery::All => true,
        }
    }
}

impl From<&str> for KeyQuery {
    fn from(key: &str) -> Self {
        KeyQuery::One(key.to_string())
    }
}

impl From<String> for KeyQuery {
    fn from(key: String) -> Self {
        KeyQuery::One(key)
    }
}

impl From<Vec<String>> for KeyQuery {
    fn from(keys: Vec<String>) -> Self {
        KeyQuery::Many(keys)
    }
}

impl From<&[&str]> for KeyQuery {
    fn from(keys: &[&str]) -> Self {
        KeyQuery::Many(keys.iter().map(|k| k.to_string()).collect())
    }
}

/// Uniform key-value interface over the three storage areas.
///
/// # Change Events
///
/// `set`, `remove` and `clear` must raise one change per key that actually
/// changed, and deliver the batch to every [`ChangeHub`] listener before the
/// returned future resolves. Removing or clearing a key that does not exist
/// raises nothing.
///
/// # Failure
///
/// Host-reported failures (e.g. quota exceeded) surface as
/// `StorageError::Host`. Adapters never retry on their own.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read keys from an area.
    async fn get(&self, area: AreaName, keys: KeyQuery) -> SatchelResult<StorageItems>;

    /// Write one or more key/value pairs.
    async fn set(&self, area: AreaName, items: StorageItems) -> SatchelResult<()>;

    /// Delete keys from an area.
    async fn remove(&self, area: AreaName, keys: Vec<String>) -> SatchelResult<()>;

    /// Delete every key in an area.
    async fn clear(&self, area: AreaName) -> SatchelResult<()>;

    /// Change notification registry shared by all areas.
    fn on_changed(&self) -> &ChangeHub;

    /// Read a single key.
    async fn get_one(&self, area: AreaName, key: &str) -> SatchelResult<Option<Value>> {
        let mut items = self.get(area, KeyQuery::from(key)).await?;
        Ok(items.remove(key))
    }

    /// Write a single key.
    async fn set_one(&self, area: AreaName, key: &str, value: Value) -> SatchelResult<()> {
        let mut items = StorageItems::new();
        items.insert(key.to_string(), value);
        self.set(area, items).await
    }

    /// Delete a single key.
    async fn remove_one(&self, area: AreaName, key: &str) -> SatchelResult<()> {
        self.remove(area, vec![key.to_string()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_query_conversions() {
        assert_eq!(KeyQuery::from("a"), KeyQuery::One("a".to_string()));
        assert_eq!(
            KeyQuery::from(&["a", "b"][..]),
            KeyQuery::Many(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(KeyQuery::All.keys(), None);
        assert_eq!(KeyQuery::from("a").keys(), Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_key_query_matches() {
        let query = KeyQuery::from(vec!["a".to_string(), "b".to_string()]);
        assert!(query.matches("a"));
        assert!(!query.matches("c"));
        assert!(KeyQuery::All.matches("anything"));
    }
}
