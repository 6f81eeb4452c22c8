//! Fuzz target for delimited parsing.
//!
//! Malformed input must produce an error, never a panic, and every parsed
//! row must be addressable through the table accessors.

#![no_main]

use assay::TableReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 100_000 {
        return;
    }

    let reader = TableReader::new();
    for delimiter in [b',', b'\t'] {
        if let Ok(table) = reader.parse_bytes(data, delimiter) {
            for row in 0..table.row_count() {
                for col in 0..table.column_count() {
                    let _ = table.get(row, col);
                }
            }
        }
    }
});
