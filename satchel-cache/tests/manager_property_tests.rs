//! Cache manager read/write properties over in-memory storage.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{json, Value};

use satchel_cache::{CacheManager, CachedRead, CommandRouter};
use satchel_core::{now_millis, ttl_millis, AreaName};
use satchel_storage::{InMemoryStorage, StorageAdapter};
use satchel_test_utils::assertions::{assert_cache_error, assert_storage_error};
use satchel_test_utils::fixtures::memory_cache;
use satchel_test_utils::generators::{arb_address, arb_area, arb_json_value, arb_ttl};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime should build")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A value written with a TTL reads back unchanged, fresh, and with an
    /// expiry `ttl` after the write.
    #[test]
    fn prop_written_value_reads_back_fresh(
        key in arb_address(),
        value in arb_json_value(),
        ttl in arb_ttl(),
    ) {
        let rt = runtime();
        let (_storage, cache) = memory_cache(Duration::from_secs(30));

        let before = now_millis();
        let read: CachedRead<Value> = rt.block_on(async {
            cache
                .set_cached_data(&key, &value, Some(ttl))
                .await
                .expect("set should succeed");
            cache.get_cached_data(&key).await.expect("get should succeed")
        });
        let after = now_millis();

        prop_assert_eq!(read.value.as_ref(), Some(&value));
        prop_assert!(!read.refresh_scheduled);
        let expiry = read.expiry.expect("hit should carry an expiry");
        prop_assert!(expiry >= before + ttl_millis(ttl));
        prop_assert!(expiry <= after + ttl_millis(ttl));
    }

    /// A write to one area is invisible in every other area.
    #[test]
    fn prop_writes_stay_in_their_area(
        area in arb_area(),
        key in arb_address(),
        value in arb_json_value(),
    ) {
        let rt = runtime();
        let storage = InMemoryStorage::new();

        rt.block_on(async {
            storage
                .set_one(area, &key, value.clone())
                .await
                .expect("set should succeed");
            for other in AreaName::ALL {
                let found = storage.get_one(other, &key).await.expect("get should succeed");
                if other == area {
                    assert_eq!(found.as_ref(), Some(&value));
                } else {
                    assert!(found.is_none(), "{key} leaked into {other}");
                }
            }
        });
    }
}

#[tokio::test]
async fn test_write_over_quota_is_storage_error() {
    let storage = Arc::new(InMemoryStorage::with_quota_bytes(64));
    let cache = CacheManager::new(storage, Duration::from_secs(30));

    let result = cache.set_cached_data("news", &"x".repeat(256), None).await;
    assert_storage_error(&result);
}

#[tokio::test]
async fn test_unknown_command_is_cache_error() {
    let (_storage, cache) = memory_cache(Duration::from_secs(30));
    let router = CommandRouter::new(cache);

    let result = router
        .dispatch_json(json!({"method": "dropEverything", "params": {}}))
        .await;
    assert_cache_error(&result);
}
