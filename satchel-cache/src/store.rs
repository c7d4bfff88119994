//! Typed shapes of the values cached per resource.
//!
//! Field names follow the upstream JSON (camelCase) so values written by
//! loaders and read by UI contexts agree on one encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::loaders::PageCursor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub priority: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub version: String,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub nickname: String,
    pub avatar: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStatus {
    pub public_key: String,
    pub registered: bool,
}

/// A main account derived from a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainAccount {
    pub address: String,
    pub public_key: String,
    pub key_index: u32,
    pub sign_algo: String,
    pub hash_algo: String,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_address: Option<String>,
}

/// An account still being created on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderAccount {
    pub address: String,
    pub public_key: String,
    pub tx_id: String,
}

/// Balances are decimal strings to avoid float rounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub address: String,
    pub balance: String,
    pub available_balance: String,
    pub storage_used: u64,
    pub storage_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildAccount {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinItem {
    pub symbol: String,
    pub name: String,
    pub contract: String,
    pub balance: String,
    pub price: String,
    pub currency: String,
    #[serde(default)]
    pub logo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub symbol: String,
    pub name: String,
    pub address: String,
    pub decimals: u8,
    #[serde(default, rename = "logoURI")]
    pub logo_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    pub tx_id: String,
    pub sender: String,
    pub receiver: String,
    pub amount: String,
    pub token: String,
    pub status: String,
    pub time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferList {
    pub list: Vec<TransferItem>,
    pub count: u64,
    /// Whether more pages exist past this one.
    pub next: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftCollectionInfo {
    pub id: String,
    pub name: String,
    pub contract_name: String,
    pub address: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub thumbnail: String,
    pub collection_name: String,
    #[serde(default)]
    pub contract_address: String,
}

/// One page of a collection listing, Cadence or EVM. Cadence pages carry a
/// numeric offset cursor, EVM pages an opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPage {
    pub collection: NftCollectionInfo,
    pub nfts: Vec<NftItem>,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<PageCursor>,
}

/// Every NFT of a collection, assembled from sequential page loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullCollection {
    pub collection: NftCollectionInfo,
    pub nfts: Vec<NftItem>,
}

/// NFT ids held per EVM collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmCollectionIds {
    pub collection: NftCollectionInfo,
    pub ids: Vec<String>,
    pub count: u64,
}
