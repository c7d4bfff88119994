//! Fuzz test for background command decoding
//!
//! Decodes arbitrary JSON as a cache command. Decoding may fail, but must
//! not panic, and a decoded command must survive an encode/decode cycle.
//!
//! Run with: cargo +nightly fuzz run command_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use satchel_cache::CacheCommand;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(command) = serde_json::from_value::<CacheCommand>(message) else {
        return;
    };

    let encoded = serde_json::to_value(&command).expect("decoded command should encode");
    let decoded: CacheCommand =
        serde_json::from_value(encoded).expect("encoded command should decode");
    assert_eq!(decoded.kind(), command.kind());
});
