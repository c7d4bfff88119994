//! Satchel Test Utilities
//!
//! Shared test infrastructure for the satchel workspace:
//! - Proptest generators for keys, networks and cached values
//! - A scripted [`WalletApi`] with call recording and network flipping
//! - Fixtures wiring storage, cache manager and refresh registry
//! - Recorders for update listeners and custom assertions

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use satchel_cache::store::{
    AccountBalance, ChildAccount, CoinItem, CollectionPage, EvmCollectionIds, MainAccount,
    NewsItem, NftCollectionInfo, NftItem, PlaceholderAccount, RegisterStatus, RemoteConfig,
    TokenInfo, TransferItem, TransferList, UserInfo,
};
pub use satchel_cache::{
    CacheKey, CacheManager, CachedRead, NetworkContext, PageCursor, RefreshRegistry, Resource,
    WalletApi,
};
pub use satchel_core::{
    AreaName, CacheError, ListenerId, LoaderError, Network, SatchelError, SatchelResult,
    StorageError,
};
pub use satchel_storage::{InMemoryStorage, StorageAdapter};

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-writer subscriber once per process. Later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("satchel=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK WALLET API
// ============================================================================

/// Deterministic [`WalletApi`] that records calls.
///
/// Collections are served as `collection_pages` pages of two NFTs each;
/// Cadence pages chain numeric offsets, EVM pages chain `tok-<n>` tokens.
#[derive(Debug)]
pub struct MockWalletApi {
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<LoaderError>>,
    flip: Mutex<Option<(Arc<NetworkContext>, Network)>>,
    balance: Mutex<String>,
    collection_pages: u64,
}

impl Default for MockWalletApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWalletApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            flip: Mutex::new(None),
            balance: Mutex::new("42.0".to_string()),
            collection_pages: 3,
        }
    }

    pub fn with_collection_pages(mut self, pages: u64) -> Self {
        self.collection_pages = pages.max(1);
        self
    }

    /// Make every subsequent call fail with `error`.
    pub fn fail_with(&self, error: LoaderError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Switch `context` to `network` inside every subsequent call, simulating
    /// a user changing networks while a fetch is in flight.
    pub fn flip_network_during_calls(&self, context: Arc<NetworkContext>, network: Network) {
        *self.flip.lock().unwrap_or_else(PoisonError::into_inner) = Some((context, network));
    }

    pub fn set_balance(&self, balance: impl Into<String>) {
        *self.balance.lock().unwrap_or_else(PoisonError::into_inner) = balance.into();
    }

    /// Method names called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == method).count()
    }

    fn record(&self, method: &str) -> Result<(), LoaderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(method.to_string());

        if let Some((context, network)) = self
            .flip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            context.switch_to(*network);
        }

        match self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn page(&self, address: &str, collection: &str, index: u64, next: Option<PageCursor>) -> CollectionPage {
        let nfts = (0..2)
            .map(|i| NftItem {
                id: format!("{}", index * 2 + i),
                name: format!("{collection} #{}", index * 2 + i),
                thumbnail: String::new(),
                collection_name: collection.to_string(),
                contract_address: address.to_string(),
            })
            .collect();
        CollectionPage {
            collection: fixtures::collection_info(address, collection),
            nfts,
            total: self.collection_pages * 2,
            next,
        }
    }
}

#[async_trait]
impl WalletApi for MockWalletApi {
    async fn news(&self) -> Result<Vec<NewsItem>, LoaderError> {
        self.record("news")?;
        Ok(vec![fixtures::news_item("welcome")])
    }

    async fn remote_config(&self) -> Result<RemoteConfig, LoaderError> {
        self.record("remote_config")?;
        Ok(RemoteConfig {
            version: "1".to_string(),
            features: BTreeMap::from([("evm".to_string(), true)]),
            payer: None,
        })
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, LoaderError> {
        self.record("user_info")?;
        Ok(UserInfo {
            user_id: user_id.to_string(),
            username: format!("user-{user_id}"),
            nickname: "tester".to_string(),
            avatar: String::new(),
            private: false,
        })
    }

    async fn register_status(&self, public_key: &str) -> Result<RegisterStatus, LoaderError> {
        self.record("register_status")?;
        Ok(RegisterStatus {
            public_key: public_key.to_string(),
            registered: true,
        })
    }

    async fn main_accounts(
        &self,
        _network: Network,
        public_key: &str,
    ) -> Result<Vec<MainAccount>, LoaderError> {
        self.record("main_accounts")?;
        Ok(vec![MainAccount {
            address: "0x01".to_string(),
            public_key: public_key.to_string(),
            key_index: 0,
            sign_algo: "ECDSA_secp256k1".to_string(),
            hash_algo: "SHA2_256".to_string(),
            weight: 1000,
            evm_address: None,
        }])
    }

    async fn placeholder_accounts(
        &self,
        _network: Network,
        public_key: &str,
    ) -> Result<Vec<PlaceholderAccount>, LoaderError> {
        self.record("placeholder_accounts")?;
        Ok(vec![PlaceholderAccount {
            address: "0x02".to_string(),
            public_key: public_key.to_string(),
            tx_id: "tx-1".to_string(),
        }])
    }

    async fn account_balance(
        &self,
        _network: Network,
        address: &str,
    ) -> Result<AccountBalance, LoaderError> {
        self.record("account_balance")?;
        let balance = self
            .balance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(fixtures::balance(address, &balance))
    }

    async fn child_accounts(
        &self,
        _network: Network,
        address: &str,
    ) -> Result<Vec<ChildAccount>, LoaderError> {
        self.record("child_accounts")?;
        Ok(vec![ChildAccount {
            address: format!("{address}-child"),
            name: "child".to_string(),
            description: String::new(),
            thumbnail: String::new(),
        }])
    }

    async fn coin_list(
        &self,
        _network: Network,
        _address: &str,
        currency: &str,
    ) -> Result<Vec<CoinItem>, LoaderError> {
        self.record("coin_list")?;
        Ok(vec![CoinItem {
            symbol: "FLOW".to_string(),
            name: "Flow".to_string(),
            contract: "FlowToken".to_string(),
            balance: "1.0".to_string(),
            price: "0.5".to_string(),
            currency: currency.to_string(),
            logo: String::new(),
        }])
    }

    async fn token_list(
        &self,
        _network: Network,
        _chain_type: &str,
    ) -> Result<Vec<TokenInfo>, LoaderError> {
        self.record("token_list")?;
        Ok(vec![TokenInfo {
            symbol: "FLOW".to_string(),
            name: "Flow".to_string(),
            address: "0x1654653399040a61".to_string(),
            decimals: 8,
            logo_uri: String::new(),
        }])
    }

    async fn transfer_list(
        &self,
        _network: Network,
        address: &str,
        offset: u64,
        limit: u64,
    ) -> Result<TransferList, LoaderError> {
        self.record("transfer_list")?;
        let list = (offset..offset + limit.min(3))
            .map(|i| TransferItem {
                tx_id: format!("tx-{i}"),
                sender: address.to_string(),
                receiver: "0x03".to_string(),
                amount: "1.0".to_string(),
                token: "FLOW".to_string(),
                status: "sealed".to_string(),
                time: i as i64,
            })
            .collect::<Vec<_>>();
        Ok(TransferList {
            count: list.len() as u64,
            list,
            next: false,
        })
    }

    async fn nft_list(&self, _network: Network) -> Result<Vec<NftCollectionInfo>, LoaderError> {
        self.record("nft_list")?;
        Ok(vec![fixtures::collection_info("0x04", "TopShot")])
    }

    async fn nft_catalog_collections(
        &self,
        _network: Network,
        address: &str,
    ) -> Result<Vec<NftCollectionInfo>, LoaderError> {
        self.record("nft_catalog_collections")?;
        Ok(vec![fixtures::collection_info(address, "TopShot")])
    }

    async fn nft_collection_page(
        &self,
        _network: Network,
        address: &str,
        collection_id: &str,
        offset: u64,
    ) -> Result<CollectionPage, LoaderError> {
        self.record("nft_collection_page")?;
        let index = offset / 2;
        let next = (index + 1 < self.collection_pages).then(|| PageCursor::Offset(offset + 2));
        Ok(self.page(address, collection_id, index, next))
    }

    async fn evm_nft_ids(
        &self,
        _network: Network,
        address: &str,
    ) -> Result<Vec<EvmCollectionIds>, LoaderError> {
        self.record("evm_nft_ids")?;
        Ok(vec![EvmCollectionIds {
            collection: fixtures::collection_info(address, "Punks"),
            ids: vec!["1".to_string(), "2".to_string()],
            count: 2,
        }])
    }

    async fn evm_nft_collection_page(
        &self,
        _network: Network,
        address: &str,
        collection_identifier: &str,
        cursor: &str,
    ) -> Result<CollectionPage, LoaderError> {
        self.record("evm_nft_collection_page")?;
        let index = match cursor.strip_prefix("tok-") {
            Some(n) => n.parse::<u64>().map_err(|_| LoaderError::InvalidArgument {
                name: "cursor".to_string(),
                value: cursor.to_string(),
            })?,
            None => 0,
        };
        let next = if index + 1 < self.collection_pages {
            Some(PageCursor::Token(format!("tok-{}", index + 1)))
        } else {
            Some(PageCursor::Token(String::new()))
        };
        Ok(self.page(address, collection_identifier, index, next))
    }
}

// ============================================================================
// UPDATE RECORDER
// ============================================================================

/// Forwards every update delivered to a key into a channel.
pub struct UpdateRecorder {
    pub listener: ListenerId,
    rx: mpsc::UnboundedReceiver<(String, Value)>,
}

impl UpdateRecorder {
    pub fn attach<S: StorageAdapter + 'static>(cache: &CacheManager<S>, key: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = cache.add_update_listener(key, move |key, value| {
            let _ = tx.send((key.to_string(), value.clone()));
            Ok(())
        });
        Self { listener, rx }
    }

    /// Wait up to `timeout` for the next update.
    pub async fn next(&mut self, timeout: Duration) -> Option<(String, Value)> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    /// Updates already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        while let Ok(update) = self.rx.try_recv() {
            out.push(update);
        }
        out
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for satchel types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_network() -> impl Strategy<Value = Network> {
        prop_oneof![Just(Network::Mainnet), Just(Network::Testnet)]
    }

    pub fn arb_area() -> impl Strategy<Value = AreaName> {
        prop::sample::select(AreaName::ALL.to_vec())
    }

    /// Hex account address.
    pub fn arb_address() -> impl Strategy<Value = String> {
        "0x[0-9a-f]{16}"
    }

    /// A key argument, including the separator, escape and empty cases.
    pub fn arb_key_arg() -> impl Strategy<Value = String> {
        prop_oneof![
            4 => "[A-Za-z0-9_.]{1,24}",
            2 => "[A-Za-z0-9%-]{1,24}",
            1 => Just(String::new()),
            1 => Just("%00".to_string()),
        ]
    }

    pub fn arb_resource() -> impl Strategy<Value = Resource> {
        prop::sample::select(Resource::ALL.to_vec())
    }

    /// A structured key whose arguments fit its resource's arity.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        arb_resource().prop_flat_map(|resource| {
            prop::collection::vec(arb_key_arg(), resource.arity()).prop_filter_map(
                "arity mismatch",
                move |args| CacheKey::new(resource, args).ok(),
            )
        })
    }

    /// JSON values of bounded depth.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,32}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// TTLs long enough to outlive a test case.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (60u64..3_600).prop_map(Duration::from_secs)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// In-memory storage plus a cache manager over it.
    pub fn memory_cache(default_ttl: Duration) -> (Arc<InMemoryStorage>, Arc<CacheManager<InMemoryStorage>>) {
        let storage = Arc::new(InMemoryStorage::new());
        let cache = Arc::new(CacheManager::new(Arc::clone(&storage), default_ttl));
        (storage, cache)
    }

    /// Cache manager with a refresh registry over in-memory storage.
    pub fn memory_registry(
        default_ttl: Duration,
    ) -> (
        Arc<InMemoryStorage>,
        Arc<CacheManager<InMemoryStorage>>,
        Arc<RefreshRegistry<InMemoryStorage>>,
    ) {
        let (storage, cache) = memory_cache(default_ttl);
        let registry = RefreshRegistry::new(Arc::clone(&cache));
        (storage, cache, registry)
    }

    pub fn news_item(id: &str) -> NewsItem {
        NewsItem {
            id: id.to_string(),
            priority: "low".to_string(),
            kind: "message".to_string(),
            title: format!("News {id}"),
            body: None,
            icon: None,
            url: None,
            expiry_time: None,
        }
    }

    pub fn balance(address: &str, balance: &str) -> AccountBalance {
        AccountBalance {
            address: address.to_string(),
            balance: balance.to_string(),
            available_balance: balance.to_string(),
            storage_used: 1_024,
            storage_capacity: 100_000,
        }
    }

    pub fn collection_info(address: &str, name: &str) -> NftCollectionInfo {
        NftCollectionInfo {
            id: name.to_lowercase(),
            name: name.to_string(),
            contract_name: name.to_string(),
            address: address.to_string(),
            logo: String::new(),
            count: 0,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for satchel results and storage state.

    use super::*;

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &SatchelResult<T>) {
        match result {
            Err(SatchelError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &SatchelResult<T>) {
        match result {
            Err(SatchelError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    /// Assert that `session[<key>-refresh]` exists.
    pub async fn assert_signal_written<S: StorageAdapter>(storage: &S, key: &str) {
        let signal = satchel_core::refresh_key(key);
        let value = storage
            .get_one(AreaName::Session, &signal)
            .await
            .expect("signal read should succeed");
        assert!(value.is_some(), "expected refresh signal {signal}");
    }

    /// Assert that `session[key]` is absent.
    pub async fn assert_absent<S: StorageAdapter>(storage: &S, key: &str) {
        let value = storage
            .get_one(AreaName::Session, key)
            .await
            .expect("read should succeed");
        assert!(value.is_none(), "expected {key} to be absent, found {:?}", value);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_mock_records_calls_and_failures() {
        let api = MockWalletApi::new();
        api.news().await.expect("news should load");
        api.fail_with(LoaderError::Aborted {
            reason: "down".to_string(),
        });
        assert!(api.news().await.is_err());
        api.recover();
        assert!(api.account_balance(Network::Mainnet, "0x1").await.is_ok());
        assert_eq!(api.call_count("news"), 2);
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_flips_network() {
        let context = NetworkContext::new(Network::Mainnet);
        let api = MockWalletApi::new();
        api.flip_network_during_calls(Arc::clone(&context), Network::Testnet);
        api.nft_list(Network::Mainnet).await.expect("call should succeed");
        assert_eq!(context.current(), Network::Testnet);
    }

    #[tokio::test]
    async fn test_mock_evm_pages_end_with_empty_token() {
        let api = MockWalletApi::new().with_collection_pages(2);
        let first = api
            .evm_nft_collection_page(Network::Mainnet, "0x1", "Punks", "0")
            .await
            .expect("page should load");
        assert_eq!(first.next, Some(PageCursor::Token("tok-1".to_string())));
        let last = api
            .evm_nft_collection_page(Network::Mainnet, "0x1", "Punks", "tok-1")
            .await
            .expect("page should load");
        assert_eq!(last.next, Some(PageCursor::Token(String::new())));
    }

    #[tokio::test]
    async fn test_update_recorder_receives_writes() {
        let (_storage, cache) = fixtures::memory_cache(Duration::from_secs(30));
        let mut recorder = UpdateRecorder::attach(&cache, "news");
        cache
            .set_cached_data("news", &vec![fixtures::news_item("a")], None)
            .await
            .expect("set should succeed");
        let (key, _value) = recorder
            .next(Duration::from_millis(100))
            .await
            .expect("update should arrive");
        assert_eq!(key, "news");
        assert!(recorder.drain().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_generated_keys_have_resource_arity(key in generators::arb_cache_key()) {
            prop_assert_eq!(key.args().len(), key.resource().arity());
        }

        #[test]
        fn prop_encoded_args_have_no_separator(arg in generators::arb_key_arg()) {
            let encoded = satchel_cache::keys::encode_arg(&arg);
            prop_assert!(!encoded.contains('-'));
            prop_assert!(!encoded.is_empty());
        }
    }
}
