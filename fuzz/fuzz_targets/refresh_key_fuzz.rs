//! Fuzz test for refresh signal matching
//!
//! Feeds arbitrary storage keys through the resource refresh patterns to find:
//! - Panics in key parsing
//! - Parsed keys that do not render back to the signal they came from
//!
//! Run with: cargo +nightly fuzz run refresh_key_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_cache::{CacheKey, Resource};
use satchel_core::{data_key_of, is_refresh_key};

fuzz_target!(|data: &[u8]| {
    if let Ok(signal) = std::str::from_utf8(data) {
        let Some(key) = Resource::parse_refresh_key(signal) else {
            return;
        };

        // Only well-formed signals can match.
        assert!(is_refresh_key(signal), "non-signal {signal:?} matched");
        assert_eq!(key.args().len(), key.resource().arity());

        // Decoded arguments re-encode to the exact signal.
        assert_eq!(key.refresh_key(), signal);
        assert_eq!(data_key_of(signal), Some(key.data_key().as_str()));

        // Rebuilding from the parts gives the same key.
        let rebuilt = CacheKey::new(key.resource(), key.args().to_vec())
            .expect("arity was checked above");
        assert_eq!(rebuilt, key);
    }
});
