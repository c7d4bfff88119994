//! Background command routing.
//!
//! UI contexts send `{"method": ..., "params": ...}` requests to the
//! background. The method name deserializes into a [`CommandKind`], and the
//! router dispatches through a handler table built once at construction, so
//! an unknown method fails at the boundary instead of at lookup time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use satchel_core::{CacheError, SatchelError, SatchelResult};
use satchel_storage::StorageAdapter;

use crate::manager::{CacheManager, CachedRead};

/// Every command the background accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    GetCachedData,
    SetCachedData,
    TriggerRefresh,
    EnsureFresh,
    ClearCachedData,
    ClearAllCachedData,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        CommandKind::GetCachedData,
        CommandKind::SetCachedData,
        CommandKind::TriggerRefresh,
        CommandKind::EnsureFresh,
        CommandKind::ClearCachedData,
        CommandKind::ClearAllCachedData,
    ];
}

/// Typed command, as built by in-process callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum CacheCommand {
    GetCachedData {
        key: String,
    },
    #[serde(rename_all = "camelCase")]
    SetCachedData {
        key: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_ms: Option<u64>,
    },
    TriggerRefresh {
        key: String,
    },
    EnsureFresh {
        key: String,
    },
    ClearCachedData {
        key: String,
    },
    ClearAllCachedData,
}

impl CacheCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            CacheCommand::GetCachedData { .. } => CommandKind::GetCachedData,
            CacheCommand::SetCachedData { .. } => CommandKind::SetCachedData,
            CacheCommand::TriggerRefresh { .. } => CommandKind::TriggerRefresh,
            CacheCommand::EnsureFresh { .. } => CommandKind::EnsureFresh,
            CacheCommand::ClearCachedData { .. } => CommandKind::ClearCachedData,
            CacheCommand::ClearAllCachedData => CommandKind::ClearAllCachedData,
        }
    }
}

type Handler<S> = fn(Arc<CacheManager<S>>, CacheCommand) -> BoxFuture<'static, SatchelResult<Value>>;

fn mismatch(expected: CommandKind, got: &CacheCommand) -> SatchelError {
    CacheError::InvalidCommand {
        reason: format!("{:?} handler received {:?}", expected, got.kind()),
    }
    .into()
}

fn get_cached_data<S: StorageAdapter + 'static>(
    cache: Arc<CacheManager<S>>,
    command: CacheCommand,
) -> BoxFuture<'static, SatchelResult<Value>> {
    Box::pin(async move {
        let key = match command {
            CacheCommand::GetCachedData { key } => key,
            other => return Err(mismatch(CommandKind::GetCachedData, &other)),
        };
        let read: CachedRead<Value> = cache.get_cached_data(&key).await?;
        serde_json::to_value(read).map_err(|e| {
            CacheError::Serialization {
                key,
                reason: e.to_string(),
            }
            .into()
        })
    })
}

fn set_cached_data<S: StorageAdapter + 'static>(
    cache: Arc<CacheManager<S>>,
    command: CacheCommand,
) -> BoxFuture<'static, SatchelResult<Value>> {
    Box::pin(async move {
        let (key, value, ttl_ms) = match command {
            CacheCommand::SetCachedData { key, value, ttl_ms } => (key, value, ttl_ms),
            other => return Err(mismatch(CommandKind::SetCachedData, &other)),
        };
        cache
            .set_cached_value(&key, value, ttl_ms.map(Duration::from_millis))
            .await?;
        Ok(Value::Null)
    })
}

fn trigger_refresh<S: StorageAdapter + 'static>(
    cache: Arc<CacheManager<S>>,
    command: CacheCommand,
) -> BoxFuture<'static, SatchelResult<Value>> {
    Box::pin(async move {
        let key = match command {
            CacheCommand::TriggerRefresh { key } => key,
            other => return Err(mismatch(CommandKind::TriggerRefresh, &other)),
        };
        cache.trigger_refresh(&key).await?;
        Ok(Value::Null)
    })
}

fn ensure_fresh<S: StorageAdapter + 'static>(
    cache: Arc<CacheManager<S>>,
    command: CacheCommand,
) -> BoxFuture<'static, SatchelResult<Value>> {
    Box::pin(async move {
        let key = match command {
            CacheCommand::EnsureFresh { key } => key,
            other => return Err(mismatch(CommandKind::EnsureFresh, &other)),
        };
        Ok(Value::Bool(cache.ensure_fresh(&key).await?))
    })
}

fn clear_cached_data<S: StorageAdapter + 'static>(
    cache: Arc<CacheManager<S>>,
    command: CacheCommand,
) -> BoxFuture<'static, SatchelResult<Value>> {
    Box::pin(async move {
        let key = match command {
            CacheCommand::ClearCachedData { key } => key,
            other => return Err(mismatch(CommandKind::ClearCachedData, &other)),
        };
        cache.clear_cached_data(&key).await?;
        Ok(Value::Null)
    })
}

fn clear_all_cached_data<S: StorageAdapter + 'static>(
    cache: Arc<CacheManager<S>>,
    command: CacheCommand,
) -> BoxFuture<'static, SatchelResult<Value>> {
    Box::pin(async move {
        if command.kind() != CommandKind::ClearAllCachedData {
            return Err(mismatch(CommandKind::ClearAllCachedData, &command));
        }
        cache.clear_all_cached_data().await?;
        Ok(Value::Null)
    })
}

/// Routes commands to cache operations through a lookup table.
pub struct CommandRouter<S: StorageAdapter + 'static> {
    cache: Arc<CacheManager<S>>,
    handlers: HashMap<CommandKind, Handler<S>>,
}

impl<S: StorageAdapter + 'static> CommandRouter<S> {
    pub fn new(cache: Arc<CacheManager<S>>) -> Self {
        let mut handlers: HashMap<CommandKind, Handler<S>> = HashMap::new();
        handlers.insert(CommandKind::GetCachedData, get_cached_data::<S>);
        handlers.insert(CommandKind::SetCachedData, set_cached_data::<S>);
        handlers.insert(CommandKind::TriggerRefresh, trigger_refresh::<S>);
        handlers.insert(CommandKind::EnsureFresh, ensure_fresh::<S>);
        handlers.insert(CommandKind::ClearCachedData, clear_cached_data::<S>);
        handlers.insert(CommandKind::ClearAllCachedData, clear_all_cached_data::<S>);
        Self { cache, handlers }
    }

    pub fn handles(&self, kind: CommandKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run a typed command.
    pub async fn dispatch(&self, command: CacheCommand) -> SatchelResult<Value> {
        let kind = command.kind();
        let handler = self.handlers.get(&kind).ok_or_else(|| CacheError::InvalidCommand {
            reason: format!("no handler for {:?}", kind),
        })?;
        tracing::debug!(command = ?kind, "Dispatching cache command");
        handler(Arc::clone(&self.cache), command).await
    }

    /// Decode a `{"method", "params"}` message and run it.
    pub async fn dispatch_json(&self, message: Value) -> SatchelResult<Value> {
        let command: CacheCommand =
            serde_json::from_value(message).map_err(|e| CacheError::InvalidCommand {
                reason: e.to_string(),
            })?;
        self.dispatch(command).await
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::refresh_key;
    use serde_json::json;
    use satchel_storage::InMemoryStorage;

    fn router() -> CommandRouter<InMemoryStorage> {
        let cache = Arc::new(CacheManager::new(
            Arc::new(InMemoryStorage::new()),
            Duration::from_secs(30),
        ));
        CommandRouter::new(cache)
    }

    #[test]
    fn test_every_kind_has_a_handler() {
        let router = router();
        for kind in CommandKind::ALL {
            assert!(router.handles(kind), "missing handler for {:?}", kind);
        }
    }

    #[test]
    fn test_command_wire_format() {
        let command = CacheCommand::SetCachedData {
            key: "news".to_string(),
            value: json!([1]),
            ttl_ms: Some(500),
        };
        let wire = serde_json::to_value(&command).expect("command should encode");
        assert_eq!(
            wire,
            json!({"method": "setCachedData", "params": {"key": "news", "value": [1], "ttlMs": 500}})
        );
        assert_eq!(
            serde_json::to_value(CacheCommand::ClearAllCachedData).expect("command should encode"),
            json!({"method": "clearAllCachedData"})
        );
    }

    #[tokio::test]
    async fn test_set_then_get_through_router() {
        let router = router();
        router
            .dispatch_json(json!({
                "method": "setCachedData",
                "params": {"key": "news", "value": ["a"]}
            }))
            .await
            .expect("set should succeed");

        let reply = router
            .dispatch_json(json!({"method": "getCachedData", "params": {"key": "news"}}))
            .await
            .expect("get should succeed");
        assert_eq!(reply["value"], json!(["a"]));
        assert_eq!(reply["refreshScheduled"], json!(false));
    }

    #[tokio::test]
    async fn test_trigger_refresh_writes_signal() {
        let router = router();
        router
            .dispatch(CacheCommand::TriggerRefresh {
                key: "news".to_string(),
            })
            .await
            .expect("trigger should succeed");
        let signal = router
            .cache
            .storage()
            .get_one(crate::manager::CACHE_AREA, &refresh_key("news"))
            .await
            .expect("get should succeed");
        assert!(signal.is_some());
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let router = router();
        let result = router
            .dispatch_json(json!({"method": "dropDatabase", "params": {}}))
            .await;
        assert!(matches!(
            result,
            Err(SatchelError::Cache(CacheError::InvalidCommand { .. }))
        ));
    }

    #[tokio::test]
    async fn test_ensure_fresh_reply() {
        let router = router();
        let reply = router
            .dispatch(CacheCommand::EnsureFresh {
                key: "news".to_string(),
            })
            .await
            .expect("ensure should succeed");
        assert_eq!(reply, Value::Bool(true));
    }
}
