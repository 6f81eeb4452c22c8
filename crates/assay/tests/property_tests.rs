//! Property-based tests for the curation handlers and the joiner.
//!
//! These tests use proptest to generate random snapshot tables and verify
//! that the structural invariants of the outputs hold for every input.
//!
//! # Running Property Tests
//!
//! ```bash
//! cargo test -p assay --test property_tests
//!
//! # More cases (slower but more thorough)
//! PROPTEST_CASES=10000 cargo test -p assay --test property_tests
//! ```

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use proptest::prelude::*;

use assay::join::{JoinConfig, JoinKey, JoinSource, JoinType};
use assay::patterns::{
    CHANGE_TYPE_COLUMN, CHANGED_COLUMNS_COLUMN, DERIVED_EVENTS_LABEL, EFFECTIVE_FROM_COLUMN,
    EFFECTIVE_TO_COLUMN, IS_CURRENT_COLUMN, STATE_HISTORY_LABEL,
};
use assay::{
    DatasetDescriptor, EntityKind, HandlerRegistry, HistoryMode, MultiSourceJoiner, RecordTable,
};

// =============================================================================
// Test Strategies
// =============================================================================

/// Key spellings, including values that compare numerically equal but
/// differ as text.
const KEYS: &[&str] = &["7", "07", "007", "12", "012", "2134", "02134"];

/// One snapshot row: (key index, day of month, attribute).
fn snapshot_row() -> impl Strategy<Value = (usize, u8, String)> {
    (0..KEYS.len(), 1u8..29, "[a-c]")
}

/// Snapshot tables with unique (key, ts) pairs, as the preparer leaves them.
fn snapshot_table() -> impl Strategy<Value = RecordTable> {
    prop::collection::vec(snapshot_row(), 1..40).prop_map(|rows| {
        let mut seen = HashSet::new();
        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .filter(|(key, day, _)| seen.insert((*key, *day)))
            .map(|(key, day, attr)| {
                vec![KEYS[key].to_string(), attr, format!("2025-01-{:02}", day)]
            })
            .collect();
        RecordTable::new(vec!["id".into(), "attr".into(), "ts".into()], rows)
    })
}

/// Join key values, with empty cells standing in for nulls.
fn join_keys() -> impl Strategy<Value = Vec<String>> {
    let key = prop_oneof![
        4 => (0u8..4).prop_map(|k| k.to_string()),
        1 => Just(String::new()),
    ];
    prop::collection::vec(key, 0..25)
}

fn keyed_table(key: &str, value: &str, keys: &[String]) -> RecordTable {
    let rows = keys
        .iter()
        .enumerate()
        .map(|(i, k)| vec![k.clone(), format!("{}{}", value, i)])
        .collect();
    RecordTable::new(vec![key.into(), value.into()], rows)
}

fn descriptor(kind: EntityKind) -> DatasetDescriptor {
    DatasetDescriptor::new("prop", "test", "entity", kind)
        .with_natural_keys(["id"])
        .with_change_ts("ts")
}

// =============================================================================
// SCD2 History Properties
// =============================================================================

mod scd2_properties {
    use super::*;

    proptest! {
        /// Every key has exactly one current row.
        #[test]
        fn one_current_row_per_key(table in snapshot_table()) {
            let desc = descriptor(EntityKind::State).with_history_mode(HistoryMode::Scd2);
            let outputs = HandlerRegistry::standard().dispatch(&desc, table.clone()).unwrap();
            let history = &outputs[STATE_HISTORY_LABEL];
            prop_assert_eq!(history.row_count(), table.row_count());

            let mut current: HashMap<&str, usize> = HashMap::new();
            for row in 0..history.row_count() {
                if history.value(row, IS_CURRENT_COLUMN) == Some("1") {
                    *current.entry(history.value(row, "id").unwrap()).or_default() += 1;
                }
            }
            let keys: HashSet<&str> = table.column_by_name("id").unwrap().into_iter().collect();
            prop_assert_eq!(current.len(), keys.len());
            prop_assert!(current.values().all(|&n| n == 1));
        }

        /// Within a key, each version closes where the next one opens and
        /// only the last version stays open.
        #[test]
        fn effective_ranges_are_contiguous(table in snapshot_table()) {
            let desc = descriptor(EntityKind::State).with_history_mode(HistoryMode::Scd2);
            let outputs = HandlerRegistry::standard().dispatch(&desc, table).unwrap();
            let history = &outputs[STATE_HISTORY_LABEL];

            let groups = history.group_indices(&[history.column_index("id").unwrap()]);
            for rows in groups.values() {
                for pair in rows.windows(2) {
                    prop_assert_eq!(
                        history.value(pair[0], EFFECTIVE_TO_COLUMN),
                        history.value(pair[1], EFFECTIVE_FROM_COLUMN)
                    );
                    prop_assert!(
                        history.value(pair[0], EFFECTIVE_FROM_COLUMN)
                            < history.value(pair[1], EFFECTIVE_FROM_COLUMN)
                    );
                }
                let last = *rows.last().unwrap();
                prop_assert_eq!(history.value(last, EFFECTIVE_TO_COLUMN), Some(""));
                prop_assert_eq!(history.value(last, IS_CURRENT_COLUMN), Some("1"));
            }
        }
    }
}

// =============================================================================
// Derived Event Properties
// =============================================================================

mod derived_event_properties {
    use super::*;

    fn change_types(events: &RecordTable) -> Vec<&str> {
        events.column_by_name(CHANGE_TYPE_COLUMN).unwrap()
    }

    proptest! {
        /// The first event for each key is an upsert and no noops are
        /// emitted unless retention is on.
        #[test]
        fn first_event_per_key_is_upsert(table in snapshot_table()) {
            let desc = descriptor(EntityKind::DerivedEvent);
            let outputs = HandlerRegistry::standard().dispatch(&desc, table).unwrap();
            let events = &outputs[DERIVED_EVENTS_LABEL];

            prop_assert!(!change_types(events).contains(&"noop"));
            let groups = events.group_indices(&[events.column_index("id").unwrap()]);
            for rows in groups.values() {
                prop_assert_eq!(events.value(rows[0], CHANGE_TYPE_COLUMN), Some("upsert"));
                for &row in &rows[1..] {
                    prop_assert_eq!(events.value(row, CHANGE_TYPE_COLUMN), Some("update"));
                }
            }
        }

        /// With retention, every input row yields exactly one event and
        /// noops name no changed columns.
        #[test]
        fn retained_noops_cover_every_row(table in snapshot_table()) {
            let desc = descriptor(EntityKind::DerivedEvent).with_noop_retention(true);
            let input_rows = table.row_count();
            let outputs = HandlerRegistry::standard().dispatch(&desc, table).unwrap();
            let events = &outputs[DERIVED_EVENTS_LABEL];

            prop_assert_eq!(events.row_count(), input_rows);
            for row in 0..events.row_count() {
                if events.value(row, CHANGE_TYPE_COLUMN) == Some("noop") {
                    prop_assert_eq!(events.value(row, CHANGED_COLUMNS_COLUMN), Some(""));
                }
            }
        }
    }
}

// =============================================================================
// Join Properties
// =============================================================================

mod join_properties {
    use super::*;

    proptest! {
        /// An inner join never grows past primary rows times the worst
        /// duplicate factor, and every result key exists on both sides.
        #[test]
        fn inner_join_is_bounded(left in join_keys(), right in join_keys()) {
            let config = JoinConfig::new(
                vec![
                    JoinSource::new("left", "left.csv"),
                    JoinSource::new("right", "right.csv").with_keys(vec![JoinKey::same("k")]),
                ],
                JoinType::Inner,
            );
            let mut tables = IndexMap::new();
            tables.insert("left".to_string(), keyed_table("k", "a", &left));
            tables.insert("right".to_string(), keyed_table("k", "b", &right));

            let result = MultiSourceJoiner::new().join_tables(&config, tables).unwrap();

            let mut right_counts: HashMap<&str, usize> = HashMap::new();
            for key in right.iter().filter(|k| !k.is_empty()) {
                *right_counts.entry(key.as_str()).or_default() += 1;
            }
            let max_dup = right_counts.values().copied().max().unwrap_or(0);
            prop_assert!(result.table.row_count() <= left.len() * max_dup);

            let expected: usize = left
                .iter()
                .map(|k| right_counts.get(k.as_str()).copied().unwrap_or(0))
                .sum();
            prop_assert_eq!(result.table.row_count(), expected);

            for key in result.table.column_by_name("k").unwrap() {
                prop_assert!(!key.is_empty());
                prop_assert!(left.iter().any(|k| k == key));
                prop_assert!(right_counts.contains_key(key));
            }
        }
    }
}
