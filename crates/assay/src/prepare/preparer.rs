//! Schema enforcement, timestamp normalization, and key deduplication.

use tracing::{debug, warn};

use crate::descriptor::{DatasetDescriptor, SchemaMode};
use crate::error::{AssayError, Result};
use crate::table::{RecordTable, is_null_value, normalize_timestamp};

/// Ingestion metadata columns always allowed through.
pub const METADATA_COLUMNS: &[&str] = &[
    "_load_date",
    "_ingested_at",
    "_source_system",
    "_source_file",
    "_run_id",
    "_batch_id",
];

/// Prefix reserved for additional ingestion metadata.
pub const METADATA_PREFIX: &str = "_meta";

/// Deletion flag names recognized without configuration.
pub const DEFAULT_DELETE_FLAGS: &[&str] = &["is_deleted", "_deleted", "deleted"];

/// A table that satisfies its descriptor's schema, ready for a handler.
#[derive(Debug, Clone)]
pub struct PreparedTable {
    pub table: RecordTable,
    /// Column rows were ordered by, if any.
    pub sort_column: Option<String>,
    pub dropped_columns: Vec<String>,
    pub duplicates_removed: usize,
    pub unparsable_timestamps: usize,
}

/// Validates and normalizes raw tables against a descriptor.
#[derive(Debug, Clone, Copy)]
pub struct DataPreparer<'a> {
    descriptor: &'a DatasetDescriptor,
}

impl<'a> DataPreparer<'a> {
    pub fn new(descriptor: &'a DatasetDescriptor) -> Self {
        Self { descriptor }
    }

    /// Validate, prune, normalize, and deduplicate.
    pub fn prepare(&self, table: RecordTable) -> Result<PreparedTable> {
        let mut prepared = self.prepare_chunk(table)?;
        let sort_column = self.sort_column(&prepared.table);

        let mut dedupe_columns = self.descriptor.natural_keys.clone();
        if dedupe_columns.is_empty() {
            debug!(dataset = %self.descriptor.qualified_name(), "no natural keys, skipping dedupe");
            prepared.sort_column = sort_column;
            return Ok(prepared);
        }

        let table = std::mem::take(&mut prepared.table);
        let table = match &sort_column {
            Some(column) => {
                if !dedupe_columns.contains(column) {
                    dedupe_columns.push(column.clone());
                }
                let indices = table.require_columns(&dedupe_columns, "dedupe")?;
                table.sort_by_columns(&indices)
            }
            None => {
                warn!(
                    dataset = %self.descriptor.qualified_name(),
                    "no sort column available, deduplicating in arrival order"
                );
                table
            }
        };

        let indices = table.require_columns(&dedupe_columns, "dedupe")?;
        let (table, removed) = table.dedupe_keep_last(&indices);
        if removed > 0 {
            debug!(
                dataset = %self.descriptor.qualified_name(),
                removed,
                "removed duplicate rows"
            );
        }

        prepared.table = table;
        prepared.sort_column = sort_column;
        prepared.duplicates_removed = removed;
        Ok(prepared)
    }

    /// Validate, prune, and normalize without deduplicating.
    pub fn prepare_chunk(&self, table: RecordTable) -> Result<PreparedTable> {
        let context = self.descriptor.qualified_name();
        let expected = self.expected_columns(&table);
        table.require_columns(&expected, &context)?;

        let extras: Vec<String> = table
            .headers
            .iter()
            .filter(|h| !expected.contains(h) && !self.is_allowed_extra(h))
            .cloned()
            .collect();

        let mut dropped_columns = Vec::new();
        let table = if extras.is_empty() {
            table
        } else {
            match self.descriptor.schema_mode {
                SchemaMode::Strict => {
                    return Err(AssayError::UnexpectedColumns {
                        context,
                        columns: extras,
                    });
                }
                SchemaMode::Standard => {
                    warn!(dataset = %context, columns = ?extras, "dropping undeclared columns");
                    dropped_columns = extras;
                    table.drop_columns(&dropped_columns)
                }
                SchemaMode::Permissive => table,
            }
        };

        let (table, unparsable_timestamps) = self.normalize_timestamps(table);

        Ok(PreparedTable {
            table,
            sort_column: None,
            dropped_columns,
            duplicates_removed: 0,
            unparsable_timestamps,
        })
    }

    /// Natural keys, kind-specific timestamps, and declared attributes.
    fn expected_columns(&self, table: &RecordTable) -> Vec<String> {
        let mut expected = self.descriptor.natural_keys.clone();
        for column in self.descriptor.timestamp_columns() {
            if !expected.contains(&column) {
                expected.push(column);
            }
        }
        if self.descriptor.attributes.is_empty() {
            // Without an allow-list every present column is an attribute.
            for header in &table.headers {
                if !expected.contains(header) {
                    expected.push(header.clone());
                }
            }
        } else {
            for attribute in &self.descriptor.attributes {
                if !expected.contains(attribute) {
                    expected.push(attribute.clone());
                }
            }
        }
        expected
    }

    fn is_allowed_extra(&self, column: &str) -> bool {
        self.descriptor.order_column.as_deref() == Some(column)
            || self.descriptor.delete_flag_column.as_deref() == Some(column)
            || DEFAULT_DELETE_FLAGS.contains(&column)
            || METADATA_COLUMNS.contains(&column)
            || column.starts_with(METADATA_PREFIX)
    }

    /// Canonicalize timestamp columns; unparsable values become missing.
    fn normalize_timestamps(&self, mut table: RecordTable) -> (RecordTable, usize) {
        let mut unparsable = 0;
        for column in self.descriptor.timestamp_columns() {
            let Some(idx) = table.column_index(&column) else {
                continue;
            };
            let mut column_failures = 0;
            for row in &mut table.rows {
                let cell = &mut row[idx];
                if is_null_value(cell) {
                    cell.clear();
                    continue;
                }
                match normalize_timestamp(cell) {
                    Some(canonical) => *cell = canonical,
                    None => {
                        cell.clear();
                        column_failures += 1;
                    }
                }
            }
            if column_failures > 0 {
                warn!(
                    dataset = %self.descriptor.qualified_name(),
                    column = %column,
                    count = column_failures,
                    "unparsable timestamps set to missing"
                );
            }
            unparsable += column_failures;
        }
        (table, unparsable)
    }

    /// Order column, then event timestamp for event-like kinds, then change
    /// timestamp.
    fn sort_column(&self, table: &RecordTable) -> Option<String> {
        let descriptor = self.descriptor;
        let event_ts = descriptor
            .event_ts_column
            .as_ref()
            .filter(|_| descriptor.entity_kind.is_event_like());
        [
            descriptor.order_column.as_ref(),
            event_ts,
            descriptor.change_ts_column.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|column| table.has_column(column))
        .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EntityKind;

    fn descriptor() -> DatasetDescriptor {
        DatasetDescriptor::new("crm", "sales", "accounts", EntityKind::State)
            .with_natural_keys(["id"])
            .with_change_ts("ts")
            .with_attributes(["region"])
    }

    #[test]
    fn test_missing_columns_named() {
        let table = RecordTable::from_rows(&["id", "region"], &[&["1", "east"]]);
        let err = DataPreparer::new(&descriptor()).prepare(table).unwrap_err();
        match err {
            AssayError::MissingColumns { columns, .. } => assert_eq!(columns, vec!["ts"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_extra_columns_by_schema_mode() {
        let table = RecordTable::from_rows(
            &["id", "region", "ts", "junk", "_run_id", "_meta_source"],
            &[&["1", "east", "2025-01-01", "x", "r1", "s"]],
        );

        let prepared = DataPreparer::new(&descriptor()).prepare(table.clone()).unwrap();
        assert_eq!(prepared.dropped_columns, vec!["junk"]);
        assert_eq!(
            prepared.table.headers,
            vec!["id", "region", "ts", "_run_id", "_meta_source"]
        );

        let strict = descriptor().with_schema_mode(SchemaMode::Strict);
        let err = DataPreparer::new(&strict).prepare(table.clone()).unwrap_err();
        assert!(matches!(err, AssayError::UnexpectedColumns { .. }));

        let permissive = descriptor().with_schema_mode(SchemaMode::Permissive);
        let prepared = DataPreparer::new(&permissive).prepare(table).unwrap();
        assert!(prepared.table.has_column("junk"));
    }

    #[test]
    fn test_timestamps_normalized_and_counted() {
        let table = RecordTable::from_rows(
            &["id", "region", "ts"],
            &[
                &["1", "east", "2025/01/02"],
                &["2", "west", "garbage"],
                &["3", "north", ""],
            ],
        );
        let prepared = DataPreparer::new(&descriptor()).prepare(table).unwrap();
        assert_eq!(prepared.unparsable_timestamps, 1);
        let ts = prepared.table.column_by_name("ts").unwrap();
        assert!(ts.contains(&"2025-01-02"));
        assert_eq!(ts.iter().filter(|v| v.is_empty()).count(), 2);
    }

    #[test]
    fn test_dedupe_keeps_history_but_drops_exact_repeats() {
        let table = RecordTable::from_rows(
            &["id", "region", "ts"],
            &[
                &["1", "west", "2025-01-03"],
                &["1", "east", "2025-01-01"],
                &["1", "east-fixed", "2025-01-01"],
            ],
        );
        let prepared = DataPreparer::new(&descriptor()).prepare(table).unwrap();
        assert_eq!(prepared.sort_column.as_deref(), Some("ts"));
        assert_eq!(prepared.duplicates_removed, 1);
        assert_eq!(
            prepared.table.rows,
            vec![
                vec!["1", "east-fixed", "2025-01-01"],
                vec!["1", "west", "2025-01-03"],
            ]
        );
    }

    #[test]
    fn test_order_column_wins() {
        let desc = descriptor().with_order_column("seq");
        let table = RecordTable::from_rows(
            &["id", "region", "ts", "seq"],
            &[&["1", "a", "2025-01-02", "2"], &["1", "b", "2025-01-01", "10"]],
        );
        let prepared = DataPreparer::new(&desc).prepare(table).unwrap();
        assert_eq!(prepared.sort_column.as_deref(), Some("seq"));
        assert_eq!(prepared.table.value(1, "region"), Some("b"));
    }
}
