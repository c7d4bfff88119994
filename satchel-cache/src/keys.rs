//! Cache key registry.
//!
//! Every cached resource is a [`Resource`] variant with a fixed prefix and an
//! ordered list of argument names. Keys are the prefix and arguments joined
//! with `-`; the refresh regex for a resource is derived from the very same
//! builder, so argument order in keys and capture groups cannot drift apart.
//!
//! Arguments are escaped before they are joined: `%` becomes `%25`, `-`
//! becomes `%2D` and the empty argument is written as `%00`. A rendered key
//! therefore contains exactly one separator per argument and parses back to
//! the arguments it was built from.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use satchel_core::{refresh_key, CacheError, Network, SatchelResult, REFRESH_SUFFIX};
use serde::{Deserialize, Serialize};

/// Separator between the prefix and each argument.
pub const KEY_SEPARATOR: &str = "-";

/// Capture group substituted for every argument in a derived refresh regex.
const ARG_CAPTURE: &str = "(.+)";

/// Rendering of an empty argument.
const EMPTY_ARG: &str = "%00";

// ============================================================================
// ARGUMENT ESCAPING
// ============================================================================

/// Escape one argument for use inside a key.
pub fn encode_arg(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() {
        return Cow::Borrowed(EMPTY_ARG);
    }
    if !arg.contains(['%', '-']) {
        return Cow::Borrowed(arg);
    }
    let mut out = String::with_capacity(arg.len() + 4);
    for c in arg.chars() {
        match c {
            '%' => out.push_str("%25"),
            '-' => out.push_str("%2D"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`encode_arg`].
///
/// Returns `None` for anything `encode_arg` never produces: a raw separator,
/// an unknown escape, or `%00` anywhere but as the whole argument.
pub fn decode_arg(raw: &str) -> Option<String> {
    if raw == EMPTY_ARG {
        return Some(String::new());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find(['%', '-']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%25") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%2D") {
            out.push('-');
            rest = after;
        } else {
            return None;
        }
    }
    out.push_str(rest);
    Some(out)
}

// ============================================================================
// REGEX DERIVATION
// ============================================================================

/// Placeholder handed to a builder while deriving its regex. Contains no
/// regex metacharacters, so it survives `regex::escape` unchanged.
fn placeholder(index: usize) -> String {
    format!("\u{1}arg{index}\u{1}")
}

/// Derive the refresh regex for an arbitrary key builder.
///
/// The builder is called once with placeholders, the result is escaped, each
/// placeholder becomes `(.+)`, and the pattern is anchored with the
/// `-refresh` suffix. Capture groups follow the builder's argument order.
pub fn derive_refresh_regex<F>(arity: usize, builder: F) -> SatchelResult<Regex>
where
    F: Fn(&[String]) -> String,
{
    let placeholders: Vec<String> = (0..arity).map(placeholder).collect();
    let mut pattern = regex::escape(&builder(&placeholders));
    for p in &placeholders {
        pattern = pattern.replacen(p.as_str(), ARG_CAPTURE, 1);
    }
    let pattern = format!("^{}{}$", pattern, regex::escape(REFRESH_SUFFIX));

    Regex::new(&pattern).map_err(|e| {
        CacheError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Apply a derived regex to a signal key, returning the decoded arguments.
///
/// A capture that does not decode (for instance one spanning a separator)
/// means the signal was not built by this builder, so the whole match fails.
pub fn capture_args(pattern: &Regex, signal_key: &str) -> Option<Vec<String>> {
    let captures = pattern.captures(signal_key)?;
    captures
        .iter()
        .skip(1)
        .map(|m| decode_arg(m.map(|m| m.as_str()).unwrap_or_default()))
        .collect()
}

// ============================================================================
// RESOURCES
// ============================================================================

/// A cached resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    News,
    RemoteConfig,
    WalletLoaded,
    UserInfo,
    RegisterStatus,
    MainAccounts,
    PlaceholderAccounts,
    AccountBalance,
    ChildAccounts,
    CoinList,
    TokenList,
    TransferList,
    NftList,
    NftCatalogCollections,
    NftCollection,
    NftFullCollection,
    EvmNftIds,
    EvmNftCollectionList,
    EvmNftFullCollection,
}

impl Resource {
    /// Every resource, in refresh-matching order.
    pub const ALL: [Resource; 19] = [
        Resource::News,
        Resource::RemoteConfig,
        Resource::WalletLoaded,
        Resource::UserInfo,
        Resource::RegisterStatus,
        Resource::MainAccounts,
        Resource::PlaceholderAccounts,
        Resource::AccountBalance,
        Resource::ChildAccounts,
        Resource::CoinList,
        Resource::TokenList,
        Resource::TransferList,
        Resource::NftList,
        Resource::NftCatalogCollections,
        Resource::NftCollection,
        Resource::NftFullCollection,
        Resource::EvmNftIds,
        Resource::EvmNftCollectionList,
        Resource::EvmNftFullCollection,
    ];

    /// Lowercase key prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            Resource::News => "news",
            Resource::RemoteConfig => "remote-config",
            Resource::WalletLoaded => "wallet-loaded",
            Resource::UserInfo => "user-info",
            Resource::RegisterStatus => "register-status",
            Resource::MainAccounts => "main-accounts",
            Resource::PlaceholderAccounts => "placeholder-accounts",
            Resource::AccountBalance => "account-balance",
            Resource::ChildAccounts => "child-accounts",
            Resource::CoinList => "coin-list",
            Resource::TokenList => "token-list",
            Resource::TransferList => "transfer-list",
            Resource::NftList => "nft-list",
            Resource::NftCatalogCollections => "nft-catalog-collections",
            Resource::NftCollection => "nft-collection",
            Resource::NftFullCollection => "nft-full-collection",
            Resource::EvmNftIds => "evm-nft-ids",
            Resource::EvmNftCollectionList => "evm-nft-collection-list",
            Resource::EvmNftFullCollection => "evm-nft-full-collection",
        }
    }

    /// Argument names, in key order.
    pub fn params(&self) -> &'static [&'static str] {
        match self {
            Resource::News | Resource::RemoteConfig | Resource::WalletLoaded => &[],
            Resource::UserInfo => &["user_id"],
            Resource::RegisterStatus => &["public_key"],
            Resource::MainAccounts | Resource::PlaceholderAccounts => &["network", "public_key"],
            Resource::AccountBalance
            | Resource::ChildAccounts
            | Resource::NftCatalogCollections
            | Resource::EvmNftIds => &["network", "address"],
            Resource::NftList => &["network"],
            Resource::CoinList => &["network", "address", "currency"],
            Resource::TokenList => &["network", "chain_type"],
            Resource::TransferList => &["network", "address", "offset", "limit"],
            Resource::NftCollection => &["network", "address", "collection_id", "offset"],
            Resource::EvmNftCollectionList => {
                &["network", "address", "collection_identifier", "offset"]
            }
            Resource::NftFullCollection => &["network", "address", "collection_id"],
            Resource::EvmNftFullCollection => &["network", "address", "collection_identifier"],
        }
    }

    pub fn arity(&self) -> usize {
        self.params().len()
    }

    /// Whether the first argument is a network and loaders should guard
    /// their writes against a network switch.
    pub fn is_network_scoped(&self) -> bool {
        self.params().first() == Some(&"network")
    }

    /// Lifetime applied to freshly loaded entries of this resource.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Resource::RemoteConfig | Resource::TokenList => Duration::from_secs(10 * 60),
            Resource::News
            | Resource::UserInfo
            | Resource::NftList
            | Resource::NftCatalogCollections
            | Resource::NftCollection
            | Resource::NftFullCollection
            | Resource::EvmNftIds
            | Resource::EvmNftCollectionList
            | Resource::EvmNftFullCollection => Duration::from_secs(5 * 60),
            Resource::MainAccounts
            | Resource::PlaceholderAccounts
            | Resource::ChildAccounts
            | Resource::RegisterStatus => Duration::from_secs(60),
            Resource::WalletLoaded
            | Resource::AccountBalance
            | Resource::CoinList
            | Resource::TransferList => Duration::from_secs(30),
        }
    }

    /// Build the data key, checking the argument count.
    pub fn key<A: AsRef<str>>(&self, args: &[A]) -> SatchelResult<String> {
        if args.len() != self.arity() {
            return Err(CacheError::ArityMismatch {
                resource: self.prefix().to_string(),
                expected: self.arity(),
                got: args.len(),
            }
            .into());
        }
        Ok(self.build(args))
    }

    /// The key builder. Every key and every refresh regex goes through here.
    fn build<A: AsRef<str>>(&self, args: &[A]) -> String {
        let mut key = String::from(self.prefix());
        for arg in args {
            key.push_str(KEY_SEPARATOR);
            key.push_str(&encode_arg(arg.as_ref()));
        }
        key
    }

    /// The compiled refresh regex, derived from [`Resource::key`]'s builder.
    /// Placeholders pass through [`encode_arg`] unchanged.
    pub fn refresh_regex(&self) -> SatchelResult<&'static Regex> {
        let slot = &REFRESH_PATTERNS[*self as usize];
        slot.get_or_try_init(|| derive_refresh_regex(self.arity(), |args| self.build(args)))
    }

    /// Parse a refresh signal key into the structured data key it refers to.
    ///
    /// Resources are tried in [`Resource::ALL`] order; the first match wins.
    pub fn parse_refresh_key(signal_key: &str) -> Option<CacheKey> {
        Resource::ALL.iter().find_map(|resource| {
            let pattern = resource.refresh_regex().ok()?;
            let args = capture_args(pattern, signal_key)?;
            Some(CacheKey {
                resource: *resource,
                args,
            })
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

static REFRESH_PATTERNS: Lazy<Vec<OnceCell<Regex>>> =
    Lazy::new(|| Resource::ALL.iter().map(|_| OnceCell::new()).collect());

// ============================================================================
// STRUCTURED KEYS
// ============================================================================

/// A resource plus its positional arguments.
///
/// Renders to the hyphen-joined storage key, so existing stored data stays
/// readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    resource: Resource,
    args: Vec<String>,
}

impl CacheKey {
    pub fn new<A: Into<String>>(resource: Resource, args: Vec<A>) -> SatchelResult<Self> {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.len() != resource.arity() {
            return Err(CacheError::ArityMismatch {
                resource: resource.prefix().to_string(),
                expected: resource.arity(),
                got: args.len(),
            }
            .into());
        }
        Ok(Self { resource, args })
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Named argument lookup, e.g. `key.arg("address")`.
    pub fn arg(&self, name: &str) -> Option<&str> {
        let index = self.resource.params().iter().position(|p| *p == name)?;
        self.args.get(index).map(String::as_str)
    }

    pub fn data_key(&self) -> String {
        self.resource.build(&self.args)
    }

    pub fn refresh_key(&self) -> String {
        refresh_key(&self.data_key())
    }

    /// Parse a data key (without suffix) back into its structured form.
    pub fn parse(data_key: &str) -> Option<Self> {
        Resource::parse_refresh_key(&refresh_key(data_key))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data_key())
    }
}

// ============================================================================
// TYPED BUILDERS
// ============================================================================

pub fn news_key() -> String {
    Resource::News.build::<&str>(&[])
}

pub fn remote_config_key() -> String {
    Resource::RemoteConfig.build::<&str>(&[])
}

pub fn wallet_loaded_key() -> String {
    Resource::WalletLoaded.build::<&str>(&[])
}

pub fn user_info_key(user_id: &str) -> String {
    Resource::UserInfo.build(&[user_id])
}

pub fn register_status_key(public_key: &str) -> String {
    Resource::RegisterStatus.build(&[public_key])
}

pub fn main_accounts_key(network: Network, public_key: &str) -> String {
    Resource::MainAccounts.build(&[network.as_str(), public_key])
}

pub fn placeholder_accounts_key(network: Network, public_key: &str) -> String {
    Resource::PlaceholderAccounts.build(&[network.as_str(), public_key])
}

pub fn account_balance_key(network: Network, address: &str) -> String {
    Resource::AccountBalance.build(&[network.as_str(), address])
}

pub fn child_accounts_key(network: Network, address: &str) -> String {
    Resource::ChildAccounts.build(&[network.as_str(), address])
}

pub fn coin_list_key(network: Network, address: &str, currency: &str) -> String {
    Resource::CoinList.build(&[network.as_str(), address, currency])
}

pub fn token_list_key(network: Network, chain_type: &str) -> String {
    Resource::TokenList.build(&[network.as_str(), chain_type])
}

pub fn transfer_list_key(network: Network, address: &str, offset: u64, limit: u64) -> String {
    let (offset, limit) = (offset.to_string(), limit.to_string());
    Resource::TransferList.build(&[network.as_str(), address, offset.as_str(), limit.as_str()])
}

pub fn nft_list_key(network: Network) -> String {
    Resource::NftList.build(&[network.as_str()])
}

pub fn nft_catalog_collections_key(network: Network, address: &str) -> String {
    Resource::NftCatalogCollections.build(&[network.as_str(), address])
}

/// Cadence collection page; `offset` is a numeric page offset.
pub fn nft_collection_key(
    network: Network,
    address: &str,
    collection_id: &str,
    offset: u64,
) -> String {
    let offset = offset.to_string();
    Resource::NftCollection.build(&[network.as_str(), address, collection_id, offset.as_str()])
}

pub fn nft_full_collection_key(network: Network, address: &str, collection_id: &str) -> String {
    Resource::NftFullCollection.build(&[network.as_str(), address, collection_id])
}

pub fn evm_nft_ids_key(network: Network, address: &str) -> String {
    Resource::EvmNftIds.build(&[network.as_str(), address])
}

/// EVM collection page; `offset` is the opaque continuation token the
/// upstream API returned for the previous page.
pub fn evm_nft_collection_list_key(
    network: Network,
    address: &str,
    collection_identifier: &str,
    offset: &str,
) -> String {
    Resource::EvmNftCollectionList.build(&[network.as_str(), address, collection_identifier, offset])
}

pub fn evm_nft_full_collection_key(
    network: Network,
    address: &str,
    collection_identifier: &str,
) -> String {
    Resource::EvmNftFullCollection.build(&[network.as_str(), address, collection_identifier])
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn two_arg_builder(args: &[String]) -> String {
        format!("x-{}-{}", args[0], args[1])
    }

    #[test]
    fn test_derived_regex_matches_and_captures_in_order() {
        let re = derive_refresh_regex(2, two_arg_builder).expect("derivation should succeed");
        assert_eq!(
            capture_args(&re, "x-foo-bar-refresh"),
            Some(vec!["foo".to_string(), "bar".to_string()])
        );
    }

    #[test]
    fn test_derived_regex_rejects_wrong_arity_and_prefix() {
        let re = derive_refresh_regex(2, two_arg_builder).expect("derivation should succeed");
        assert!(!re.is_match("x-foo-refresh"));
        assert!(!re.is_match("y-foo-bar-refresh"));
        assert!(!re.is_match("x-foo-bar"));
        assert!(!re.is_match("prefix-x-foo-bar-refresh"));
    }

    #[test]
    fn test_derived_regex_escapes_literal_parts() {
        let re = derive_refresh_regex(1, |args| format!("a.b-{}", args[0]))
            .expect("derivation should succeed");
        assert!(re.is_match("a.b-1-refresh"));
        assert!(!re.is_match("aXb-1-refresh"));
    }

    #[test]
    fn test_zero_arity_resource_regex() {
        let re = Resource::News.refresh_regex().expect("regex should compile");
        assert!(re.is_match("news-refresh"));
        assert!(!re.is_match("news-extra-refresh"));
    }

    #[test]
    fn test_key_checks_arity() {
        assert_eq!(
            Resource::AccountBalance
                .key(&["mainnet", "0xABC"])
                .expect("key should build"),
            "account-balance-mainnet-0xABC"
        );
        let err = Resource::AccountBalance.key(&["mainnet"]).unwrap_err();
        assert!(format!("{}", err).contains("takes 2 arguments"));
    }

    #[test]
    fn test_typed_builders_match_resource_key() {
        assert_eq!(news_key(), "news");
        assert_eq!(
            account_balance_key(Network::Mainnet, "0xABC"),
            "account-balance-mainnet-0xABC"
        );
        assert_eq!(
            transfer_list_key(Network::Testnet, "0x1", 0, 15),
            "transfer-list-testnet-0x1-0-15"
        );
        assert_eq!(
            evm_nft_collection_list_key(Network::Mainnet, "0x1", "coll", "tok"),
            "evm-nft-collection-list-mainnet-0x1-coll-tok"
        );
    }

    #[test]
    fn test_parse_refresh_key_returns_structured_key() {
        let key = Resource::parse_refresh_key("account-balance-mainnet-0xABC-refresh")
            .expect("signal should match");
        assert_eq!(key.resource(), Resource::AccountBalance);
        assert_eq!(key.args(), ["mainnet", "0xABC"]);
        assert_eq!(key.arg("address"), Some("0xABC"));
        assert_eq!(key.data_key(), "account-balance-mainnet-0xABC");
    }

    #[test]
    fn test_parse_unknown_signal_is_none() {
        assert!(Resource::parse_refresh_key("unknown-thing-refresh").is_none());
        assert!(Resource::parse_refresh_key("account-balance-mainnet-0xABC").is_none());
    }

    #[test]
    fn test_collection_prefixes_do_not_shadow_each_other() {
        let page = nft_collection_key(Network::Mainnet, "0x1", "coll", 0);
        let full = nft_full_collection_key(Network::Mainnet, "0x1", "coll");
        assert_eq!(
            CacheKey::parse(&page).map(|k| k.resource()),
            Some(Resource::NftCollection)
        );
        assert_eq!(
            CacheKey::parse(&full).map(|k| k.resource()),
            Some(Resource::NftFullCollection)
        );
    }

    #[test]
    fn test_cache_key_new_rejects_wrong_arity() {
        assert!(CacheKey::new(Resource::CoinList, vec!["mainnet", "0x1"]).is_err());
        let key = CacheKey::new(Resource::CoinList, vec!["mainnet", "0x1", "usd"])
            .expect("arity matches");
        assert_eq!(key.to_string(), "coin-list-mainnet-0x1-usd");
        assert_eq!(key.refresh_key(), "coin-list-mainnet-0x1-usd-refresh");
    }

    #[test]
    fn test_network_scoped_resources() {
        assert!(Resource::AccountBalance.is_network_scoped());
        assert!(Resource::NftList.is_network_scoped());
        assert!(!Resource::UserInfo.is_network_scoped());
        assert!(!Resource::News.is_network_scoped());
    }

    #[test]
    fn test_hyphenated_page_token_parses_back() {
        let key = evm_nft_collection_list_key(Network::Mainnet, "0x1", "coll", "abc-def");
        assert_eq!(key, "evm-nft-collection-list-mainnet-0x1-coll-abc%2Ddef");
        let parsed = CacheKey::parse(&key).expect("data key should parse");
        assert_eq!(parsed.resource(), Resource::EvmNftCollectionList);
        assert_eq!(parsed.args(), ["mainnet", "0x1", "coll", "abc-def"]);
        assert_eq!(parsed.arg("offset"), Some("abc-def"));
        assert_eq!(parsed.data_key(), key);
    }

    #[test]
    fn test_empty_argument_parses_back() {
        let key = user_info_key("");
        assert_eq!(key, "user-info-%00");
        let parsed = Resource::parse_refresh_key(&refresh_key(&key))
            .expect("signal should match");
        assert_eq!(parsed.resource(), Resource::UserInfo);
        assert_eq!(parsed.args(), [""]);
    }

    #[test]
    fn test_percent_in_argument_parses_back() {
        let key = coin_list_key(Network::Testnet, "0x1", "100%-usd");
        assert_eq!(key, "coin-list-testnet-0x1-100%25%2Dusd");
        let parsed = CacheKey::parse(&key).expect("data key should parse");
        assert_eq!(parsed.arg("currency"), Some("100%-usd"));
    }

    #[test]
    fn test_decode_rejects_what_encode_never_writes() {
        assert_eq!(decode_arg("plain"), Some("plain".to_string()));
        assert_eq!(decode_arg("a%2Db%25"), Some("a-b%".to_string()));
        assert_eq!(decode_arg("a-b"), None);
        assert_eq!(decode_arg("a%2db"), None);
        assert_eq!(decode_arg("a%00"), None);
        assert_eq!(decode_arg("%"), None);
    }

    #[test]
    fn test_unescaped_extra_separator_does_not_match() {
        assert!(Resource::parse_refresh_key("user-info-a-b-refresh").is_none());
        assert!(Resource::parse_refresh_key("account-balance-mainnet-0x1-extra-refresh").is_none());
    }

    #[test]
    fn test_all_matches_declaration_order() {
        for (index, resource) in Resource::ALL.iter().enumerate() {
            assert_eq!(*resource as usize, index);
        }
    }
}
