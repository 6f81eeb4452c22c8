//! Fuzz target for join filter expressions.
//!
//! Arbitrary expressions must either parse or fail cleanly, and a parsed
//! filter must evaluate any cell value without panicking.

#![no_main]

use assay::RecordTable;
use assay::join::{Filter, FilterOp};
use assay::table::is_null_value;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000 {
        return;
    }
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let (expression, value) = input.split_once('\n').unwrap_or((input, ""));

    if let Ok(filter) = Filter::parse(expression) {
        let matched = filter.matches(value);
        match &filter.op {
            FilterOp::IsNull => assert_eq!(matched, is_null_value(value)),
            FilterOp::IsNotNull => assert_eq!(matched, !is_null_value(value)),
            _ => {}
        }
        let table = RecordTable::new(vec![filter.column.clone()], vec![vec![value.to_string()]]);
        let kept = filter.apply(table).map(|t| t.row_count()).unwrap_or(0);
        assert_eq!(kept, usize::from(matched));
    }
});
