//! Wallet loader registration.
//!
//! [`WalletApi`] is the boundary to the network/RPC layer. [`register_wallet_loaders`]
//! wires every [`Resource`] to the matching API call: network-scoped
//! resources run behind a network-switch guard, and full-collection
//! resources follow page cursors sequentially.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use satchel_core::{LoaderError, Network, SatchelResult};
use satchel_storage::StorageAdapter;
use serde::Serialize;
use serde_json::Value;

use crate::keys::Resource;
use crate::loaders::{
    fetch_all_pages, parse_u64_arg, with_network_guard, NetworkContext, Page, PageCursor,
    DEFAULT_MAX_PAGES,
};
use crate::refresh::{loader_fn, LoadOutcome, Loader, RefreshRegistry};
use crate::store::{
    AccountBalance, ChildAccount, CoinItem, CollectionPage, EvmCollectionIds, FullCollection,
    MainAccount, NewsItem, NftCollectionInfo, NftItem, PlaceholderAccount, RegisterStatus,
    RemoteConfig, TokenInfo, TransferList, UserInfo,
};

/// Upstream calls backing each cached resource.
#[async_trait]
pub trait WalletApi: Send + Sync {
    async fn news(&self) -> Result<Vec<NewsItem>, LoaderError>;

    async fn remote_config(&self) -> Result<RemoteConfig, LoaderError>;

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, LoaderError>;

    async fn register_status(&self, public_key: &str) -> Result<RegisterStatus, LoaderError>;

    async fn main_accounts(
        &self,
        network: Network,
        public_key: &str,
    ) -> Result<Vec<MainAccount>, LoaderError>;

    async fn placeholder_accounts(
        &self,
        network: Network,
        public_key: &str,
    ) -> Result<Vec<PlaceholderAccount>, LoaderError>;

    async fn account_balance(
        &self,
        network: Network,
        address: &str,
    ) -> Result<AccountBalance, LoaderError>;

    async fn child_accounts(
        &self,
        network: Network,
        address: &str,
    ) -> Result<Vec<ChildAccount>, LoaderError>;

    async fn coin_list(
        &self,
        network: Network,
        address: &str,
        currency: &str,
    ) -> Result<Vec<CoinItem>, LoaderError>;

    async fn token_list(
        &self,
        network: Network,
        chain_type: &str,
    ) -> Result<Vec<TokenInfo>, LoaderError>;

    async fn transfer_list(
        &self,
        network: Network,
        address: &str,
        offset: u64,
        limit: u64,
    ) -> Result<TransferList, LoaderError>;

    async fn nft_list(&self, network: Network) -> Result<Vec<NftCollectionInfo>, LoaderError>;

    async fn nft_catalog_collections(
        &self,
        network: Network,
        address: &str,
    ) -> Result<Vec<NftCollectionInfo>, LoaderError>;

    /// One Cadence collection page at a numeric offset.
    async fn nft_collection_page(
        &self,
        network: Network,
        address: &str,
        collection_id: &str,
        offset: u64,
    ) -> Result<CollectionPage, LoaderError>;

    async fn evm_nft_ids(
        &self,
        network: Network,
        address: &str,
    ) -> Result<Vec<EvmCollectionIds>, LoaderError>;

    /// One EVM collection page at an opaque continuation token.
    async fn evm_nft_collection_page(
        &self,
        network: Network,
        address: &str,
        collection_identifier: &str,
        cursor: &str,
    ) -> Result<CollectionPage, LoaderError>;
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

fn arg(args: &[String], index: usize, name: &str) -> Result<String, LoaderError> {
    args.get(index)
        .cloned()
        .ok_or_else(|| LoaderError::InvalidArgument {
            name: name.to_string(),
            value: format!("missing (got {} args)", args.len()),
        })
}

fn network_arg(args: &[String]) -> Result<Network, LoaderError> {
    arg(args, 0, "network")?.parse()
}

fn to_json<T: Serialize>(resource: Resource, value: T) -> Result<Value, LoaderError> {
    serde_json::to_value(value).map_err(|e| LoaderError::Fetch {
        resource: resource.prefix().to_string(),
        reason: format!("unserializable response: {e}"),
    })
}

/// Loader for a resource that does not depend on the active network.
fn plain_loader<A, F, Fut, T>(api: &Arc<A>, resource: Resource, fetch: F) -> Arc<dyn Loader>
where
    A: WalletApi + 'static,
    F: Fn(Arc<A>, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, LoaderError>> + Send + 'static,
    T: Serialize,
{
    let api = Arc::clone(api);
    let fetch = Arc::new(fetch);
    loader_fn(move |args: Vec<String>| {
        let api = Arc::clone(&api);
        let fetch = Arc::clone(&fetch);
        async move {
            let value = fetch(api, args).await?;
            Ok::<_, LoaderError>(LoadOutcome::Store(to_json(resource, value)?))
        }
    })
}

/// Loader whose result is discarded if the active network changes while
/// the fetch is in flight.
fn guarded_loader<A, F, Fut, T>(
    api: &Arc<A>,
    context: &Arc<NetworkContext>,
    resource: Resource,
    fetch: F,
) -> Arc<dyn Loader>
where
    A: WalletApi + 'static,
    F: Fn(Arc<A>, Network, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, LoaderError>> + Send + 'static,
    T: Serialize,
{
    let api = Arc::clone(api);
    let context = Arc::clone(context);
    let fetch = Arc::new(fetch);
    loader_fn(move |args: Vec<String>| {
        let api = Arc::clone(&api);
        let context = Arc::clone(&context);
        let fetch = Arc::clone(&fetch);
        async move {
            let network = network_arg(&args)?;
            with_network_guard(&context, network, async move {
                let value = fetch(api, network, args).await?;
                to_json(resource, value)
            })
            .await
        }
    })
}

/// Merge sequentially fetched pages into one collection.
fn assemble_collection(
    resource: Resource,
    pages: Vec<CollectionPage>,
) -> Result<FullCollection, LoaderError> {
    let mut pages = pages.into_iter();
    let first = pages.next().ok_or_else(|| LoaderError::Fetch {
        resource: resource.prefix().to_string(),
        reason: "upstream returned no pages".to_string(),
    })?;
    let mut nfts: Vec<NftItem> = first.nfts;
    for page in pages {
        nfts.extend(page.nfts);
    }
    Ok(FullCollection {
        collection: first.collection,
        nfts,
    })
}

fn page_of(page: CollectionPage) -> Page<CollectionPage> {
    let next = page.next.clone();
    Page {
        items: vec![page],
        next,
    }
}

// ============================================================================
// REGISTRATION
// ============================================================================

/// Register a loader for every resource except `wallet-loaded`, which the
/// wallet writes directly once unlocked.
pub fn register_wallet_loaders<S, A>(
    registry: &RefreshRegistry<S>,
    api: Arc<A>,
    network: Arc<NetworkContext>,
) -> SatchelResult<()>
where
    S: StorageAdapter + 'static,
    A: WalletApi + 'static,
{
    registry.register_resource(
        Resource::News,
        plain_loader(&api, Resource::News, |api, _args| async move { api.news().await }),
    )?;
    registry.register_resource(
        Resource::RemoteConfig,
        plain_loader(&api, Resource::RemoteConfig, |api, _args| async move {
            api.remote_config().await
        }),
    )?;
    registry.register_resource(
        Resource::UserInfo,
        plain_loader(&api, Resource::UserInfo, |api, args| async move {
            api.user_info(&arg(&args, 0, "user_id")?).await
        }),
    )?;
    registry.register_resource(
        Resource::RegisterStatus,
        plain_loader(&api, Resource::RegisterStatus, |api, args| async move {
            api.register_status(&arg(&args, 0, "public_key")?).await
        }),
    )?;

    registry.register_resource(
        Resource::MainAccounts,
        guarded_loader(&api, &network, Resource::MainAccounts, |api, net, args| async move {
            api.main_accounts(net, &arg(&args, 1, "public_key")?).await
        }),
    )?;
    registry.register_resource(
        Resource::PlaceholderAccounts,
        guarded_loader(&api, &network, Resource::PlaceholderAccounts, |api, net, args| async move {
            api.placeholder_accounts(net, &arg(&args, 1, "public_key")?).await
        }),
    )?;
    registry.register_resource(
        Resource::AccountBalance,
        guarded_loader(&api, &network, Resource::AccountBalance, |api, net, args| async move {
            api.account_balance(net, &arg(&args, 1, "address")?).await
        }),
    )?;
    registry.register_resource(
        Resource::ChildAccounts,
        guarded_loader(&api, &network, Resource::ChildAccounts, |api, net, args| async move {
            api.child_accounts(net, &arg(&args, 1, "address")?).await
        }),
    )?;
    registry.register_resource(
        Resource::CoinList,
        guarded_loader(&api, &network, Resource::CoinList, |api, net, args| async move {
            let address = arg(&args, 1, "address")?;
            let currency = arg(&args, 2, "currency")?;
            api.coin_list(net, &address, &currency).await
        }),
    )?;
    registry.register_resource(
        Resource::TokenList,
        guarded_loader(&api, &network, Resource::TokenList, |api, net, args| async move {
            api.token_list(net, &arg(&args, 1, "chain_type")?).await
        }),
    )?;
    registry.register_resource(
        Resource::TransferList,
        guarded_loader(&api, &network, Resource::TransferList, |api, net, args| async move {
            let address = arg(&args, 1, "address")?;
            let offset = parse_u64_arg("offset", &arg(&args, 2, "offset")?)?;
            let limit = parse_u64_arg("limit", &arg(&args, 3, "limit")?)?;
            api.transfer_list(net, &address, offset, limit).await
        }),
    )?;
    registry.register_resource(
        Resource::NftList,
        guarded_loader(&api, &network, Resource::NftList, |api, net, _args| async move {
            api.nft_list(net).await
        }),
    )?;
    registry.register_resource(
        Resource::NftCatalogCollections,
        guarded_loader(&api, &network, Resource::NftCatalogCollections, |api, net, args| async move {
            api.nft_catalog_collections(net, &arg(&args, 1, "address")?).await
        }),
    )?;
    registry.register_resource(
        Resource::NftCollection,
        guarded_loader(&api, &network, Resource::NftCollection, |api, net, args| async move {
            let address = arg(&args, 1, "address")?;
            let collection_id = arg(&args, 2, "collection_id")?;
            let offset = parse_u64_arg("offset", &arg(&args, 3, "offset")?)?;
            api.nft_collection_page(net, &address, &collection_id, offset).await
        }),
    )?;
    registry.register_resource(
        Resource::EvmNftIds,
        guarded_loader(&api, &network, Resource::EvmNftIds, |api, net, args| async move {
            api.evm_nft_ids(net, &arg(&args, 1, "address")?).await
        }),
    )?;
    registry.register_resource(
        Resource::EvmNftCollectionList,
        guarded_loader(&api, &network, Resource::EvmNftCollectionList, |api, net, args| async move {
            let address = arg(&args, 1, "address")?;
            let collection = arg(&args, 2, "collection_identifier")?;
            let cursor = arg(&args, 3, "offset")?;
            api.evm_nft_collection_page(net, &address, &collection, &cursor).await
        }),
    )?;

    registry.register_resource(
        Resource::NftFullCollection,
        guarded_loader(&api, &network, Resource::NftFullCollection, |api, net, args| async move {
            let address = arg(&args, 1, "address")?;
            let collection_id = arg(&args, 2, "collection_id")?;
            let pages = fetch_all_pages(PageCursor::Offset(0), DEFAULT_MAX_PAGES, |cursor| {
                let api = Arc::clone(&api);
                let address = address.clone();
                let collection_id = collection_id.clone();
                async move {
                    let offset = match cursor {
                        PageCursor::Offset(offset) => offset,
                        PageCursor::Token(token) => parse_u64_arg("offset", &token)?,
                    };
                    let page = api
                        .nft_collection_page(net, &address, &collection_id, offset)
                        .await?;
                    Ok::<_, LoaderError>(page_of(page))
                }
            })
            .await?;
            assemble_collection(Resource::NftFullCollection, pages)
        }),
    )?;
    registry.register_resource(
        Resource::EvmNftFullCollection,
        guarded_loader(&api, &network, Resource::EvmNftFullCollection, |api, net, args| async move {
            let address = arg(&args, 1, "address")?;
            let collection = arg(&args, 2, "collection_identifier")?;
            let pages = fetch_all_pages(PageCursor::first_token(), DEFAULT_MAX_PAGES, |cursor| {
                let api = Arc::clone(&api);
                let address = address.clone();
                let collection = collection.clone();
                async move {
                    let page = api
                        .evm_nft_collection_page(net, &address, &collection, &cursor.as_key_arg())
                        .await?;
                    Ok::<_, LoaderError>(page_of(page))
                }
            })
            .await?;
            assemble_collection(Resource::EvmNftFullCollection, pages)
        }),
    )?;

    tracing::info!(registrations = registry.registration_count(), "Wallet loaders registered");
    Ok(())
}
