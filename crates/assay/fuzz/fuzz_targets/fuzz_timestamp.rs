//! Fuzz target for timestamp parsing and value ordering.
//!
//! Parsing must never panic, and a parsed value must normalize to a
//! string that parses back to the same instant.

#![no_main]

use assay::table::{compare_values, normalize_timestamp, parse_timestamp};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000 {
        return;
    }
    let Ok(value) = std::str::from_utf8(data) else {
        return;
    };

    // Four-digit years render in a layout that parses back unchanged.
    if let Some(normalized) = normalize_timestamp(value) {
        if normalized.as_bytes().get(4) == Some(&b'-') {
            assert_eq!(normalize_timestamp(&normalized), Some(normalized.clone()));
        }
    }
    let _ = parse_timestamp(value);
    assert_eq!(compare_values(value, value), std::cmp::Ordering::Equal);
});
