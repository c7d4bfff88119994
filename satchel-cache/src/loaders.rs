//! Loader policies shared by resource loaders: the network-switch guard and
//! paginated fetching.

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use satchel_core::{LoaderError, Network};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::refresh::LoadOutcome;

/// Upper bound on pages a sequential full-collection load will follow.
pub const DEFAULT_MAX_PAGES: usize = 200;

/// Cursor argument naming the first page of a token-paginated listing.
pub const FIRST_PAGE_TOKEN: &str = "0";

// ============================================================================
// NETWORK CONTEXT
// ============================================================================

/// The wallet's active network, observable by loaders.
#[derive(Debug)]
pub struct NetworkContext {
    tx: watch::Sender<Network>,
}

impl NetworkContext {
    pub fn new(initial: Network) -> Arc<Self> {
        let (tx, _rx) = watch::channel(initial);
        Arc::new(Self { tx })
    }

    pub fn current(&self) -> Network {
        *self.tx.borrow()
    }

    /// Switch networks. Returns false when `network` was already active.
    pub fn switch_to(&self, network: Network) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == network {
                false
            } else {
                *current = network;
                true
            }
        });
        if changed {
            tracing::info!(network = %network, "Active network switched");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<Network> {
        self.tx.subscribe()
    }

    /// Snapshot the active network at the start of a fetch.
    pub fn guard(&self) -> NetworkGuard {
        let mut rx = self.tx.subscribe();
        let expected = *rx.borrow_and_update();
        NetworkGuard { expected, rx }
    }
}

/// Remembers which network a fetch started on.
#[derive(Debug, Clone)]
pub struct NetworkGuard {
    expected: Network,
    rx: watch::Receiver<Network>,
}

impl NetworkGuard {
    pub fn expected(&self) -> Network {
        self.expected
    }

    /// True while the active network is still the one the fetch began on.
    pub fn still_current(&self) -> bool {
        *self.rx.borrow() == self.expected
    }

    /// Store `value` only if the network has not changed.
    pub fn admit(&self, value: Value) -> LoadOutcome {
        let active = *self.rx.borrow();
        if active == self.expected {
            LoadOutcome::Store(value)
        } else {
            LoadOutcome::Discard {
                reason: format!(
                    "network switched from {} to {} during fetch",
                    self.expected, active
                ),
            }
        }
    }
}

/// Run `fetch` for `network`, discarding the result if `network` is not the
/// active one when the fetch starts or when it finishes.
pub async fn with_network_guard<Fut>(
    context: &NetworkContext,
    network: Network,
    fetch: Fut,
) -> Result<LoadOutcome, LoaderError>
where
    Fut: Future<Output = Result<Value, LoaderError>>,
{
    let guard = context.guard();
    if guard.expected() != network {
        return Ok(LoadOutcome::Discard {
            reason: format!("requested {} while {} is active", network, guard.expected()),
        });
    }
    let value = fetch.await?;
    let outcome = guard.admit(value);
    if let LoadOutcome::Discard { reason } = &outcome {
        tracing::debug!(network = %network, reason = %reason, "Discarding fetch after network switch");
    }
    Ok(outcome)
}

// ============================================================================
// PAGINATION
// ============================================================================

/// Continuation cursor returned by a paginated upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageCursor {
    /// Numeric page offset (Cadence collections, transfers).
    Offset(u64),
    /// Opaque continuation token (EVM collections).
    Token(String),
}

impl PageCursor {
    /// First page of a token-paginated resource.
    pub fn first_token() -> Self {
        PageCursor::Token(FIRST_PAGE_TOKEN.to_string())
    }

    /// The string form used inside cache keys.
    pub fn as_key_arg(&self) -> String {
        match self {
            PageCursor::Offset(offset) => offset.to_string(),
            PageCursor::Token(token) => token.clone(),
        }
    }

    /// An empty token means the listing is exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PageCursor::Token(token) if token.is_empty())
    }
}

/// One page of results and the cursor for the next page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Follow continuation cursors one page at a time, concatenating items.
///
/// The next cursor is only known once the current page resolves, so pages
/// are fetched strictly in sequence. Stops when a page has no cursor, an
/// empty token, a cursor equal to the one just fetched, or after
/// `max_pages` pages.
pub async fn fetch_all_pages<T, F, Fut>(
    first: PageCursor,
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Vec<T>, LoaderError>
where
    F: FnMut(PageCursor) -> Fut,
    Fut: Future<Output = Result<Page<T>, LoaderError>>,
{
    let mut items = Vec::new();
    let mut cursor = first;

    for page_number in 0..max_pages {
        let page = fetch_page(cursor.clone()).await?;
        items.extend(page.items);

        match page.next {
            None => return Ok(items),
            Some(next) if next.is_exhausted() => return Ok(items),
            Some(next) if next == cursor => {
                tracing::warn!(page = page_number, cursor = ?next, "Upstream repeated a cursor, stopping pagination");
                return Ok(items);
            }
            Some(next) => cursor = next,
        }
    }

    tracing::warn!(max_pages, "Pagination stopped at page limit");
    Ok(items)
}

/// Fetch numeric-offset pages `0, page_size, 2*page_size, ...` below
/// `total` with at most `concurrency` requests in flight. Page order is
/// preserved in the result.
pub async fn fetch_offset_pages<T, F, Fut>(
    total: u64,
    page_size: u64,
    concurrency: usize,
    fetch_page: F,
) -> Result<Vec<T>, LoaderError>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, LoaderError>>,
{
    if page_size == 0 {
        return Err(LoaderError::InvalidArgument {
            name: "page_size".to_string(),
            value: "0".to_string(),
        });
    }

    let offsets = (0..total).step_by(page_size as usize);
    let pages: Vec<Vec<T>> = stream::iter(offsets)
        .map(&fetch_page)
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok(pages.into_iter().flatten().collect())
}

/// Parse a numeric key argument.
pub fn parse_u64_arg(name: &str, value: &str) -> Result<u64, LoaderError> {
    value.parse().map_err(|_| LoaderError::InvalidArgument {
        name: name.to_string(),
        value: value.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_switch_to_reports_change() {
        let context = NetworkContext::new(Network::Mainnet);
        assert!(!context.switch_to(Network::Mainnet));
        assert!(context.switch_to(Network::Testnet));
        assert_eq!(context.current(), Network::Testnet);
    }

    #[test]
    fn test_guard_discards_after_switch() {
        let context = NetworkContext::new(Network::Mainnet);
        let guard = context.guard();
        assert_eq!(guard.admit(json!(1)), LoadOutcome::Store(json!(1)));

        context.switch_to(Network::Testnet);
        assert!(!guard.still_current());
        assert!(matches!(guard.admit(json!(1)), LoadOutcome::Discard { .. }));
    }

    #[tokio::test]
    async fn test_with_network_guard_discards_mid_fetch_switch() {
        let context = NetworkContext::new(Network::Mainnet);
        let switcher = Arc::clone(&context);
        let outcome = with_network_guard(&context, Network::Mainnet, async move {
            switcher.switch_to(Network::Testnet);
            Ok(json!({"balance": 1}))
        })
        .await
        .expect("fetch should succeed");
        assert!(matches!(outcome, LoadOutcome::Discard { .. }));
    }

    #[tokio::test]
    async fn test_with_network_guard_rejects_inactive_network() {
        let context = NetworkContext::new(Network::Testnet);
        let outcome = with_network_guard(&context, Network::Mainnet, async { Ok(json!(1)) })
            .await
            .expect("guard should not error");
        assert!(matches!(outcome, LoadOutcome::Discard { .. }));
    }

    #[tokio::test]
    async fn test_fetch_all_pages_follows_tokens() {
        let calls = AtomicUsize::new(0);
        let items = fetch_all_pages(PageCursor::first_token(), 10, |cursor| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let page = match cursor {
                    PageCursor::Token(t) if t == FIRST_PAGE_TOKEN => Page {
                        items: vec![1, 2],
                        next: Some(PageCursor::Token("b".to_string())),
                    },
                    PageCursor::Token(t) if t == "b" => Page {
                        items: vec![3],
                        next: Some(PageCursor::Token(String::new())),
                    },
                    other => panic!("unexpected cursor {:?}", other),
                };
                Ok(page)
            }
        })
        .await
        .expect("pagination should succeed");

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_pages_stops_on_repeated_cursor_and_limit() {
        let items = fetch_all_pages(PageCursor::Offset(0), 10, |_cursor| async {
            Ok(Page {
                items: vec!["x"],
                next: Some(PageCursor::Offset(0)),
            })
        })
        .await
        .expect("pagination should succeed");
        assert_eq!(items.len(), 1);

        let mut next = 0u64;
        let items = fetch_all_pages(PageCursor::Offset(0), 3, |_cursor| {
            next += 1;
            let cursor = next;
            async move {
                Ok(Page {
                    items: vec![cursor],
                    next: Some(PageCursor::Offset(cursor)),
                })
            }
        })
        .await
        .expect("pagination should succeed");
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_all_pages_propagates_error() {
        let result: Result<Vec<u8>, _> = fetch_all_pages(PageCursor::Offset(0), 5, |_| async {
            Err(LoaderError::Fetch {
                resource: "nft-collection".to_string(),
                reason: "timeout".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_offset_pages_preserves_order() {
        let items = fetch_offset_pages(50, 10, 4, |offset| async move {
            // Later pages finish first.
            tokio::time::sleep(Duration::from_millis(50 - offset)).await;
            Ok((offset..offset + 10).collect::<Vec<u64>>())
        })
        .await
        .expect("fetch should succeed");
        assert_eq!(items, (0..50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_fetch_offset_pages_rejects_zero_page_size() {
        let result = fetch_offset_pages(10, 0, 2, |_| async { Ok(Vec::<u8>::new()) }).await;
        assert!(matches!(result, Err(LoaderError::InvalidArgument { .. })));
    }

    #[test]
    fn test_cursor_key_arg() {
        assert_eq!(PageCursor::Offset(25).as_key_arg(), "25");
        assert_eq!(PageCursor::Token("abc".to_string()).as_key_arg(), "abc");
        assert!(PageCursor::Token(String::new()).is_exhausted());
        assert!(!PageCursor::first_token().is_exhausted());
        assert!(!PageCursor::Offset(0).is_exhausted());
    }
}
