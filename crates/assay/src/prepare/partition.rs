//! Partition column resolution.

use crate::descriptor::DatasetDescriptor;
use crate::table::{RecordTable, date_part};

/// Column derived from the event timestamp for auto-partitioned events.
pub const EVENT_DATE_COLUMN: &str = "event_date";

/// Partition columns for a dataset, plus any column that must be derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionPlan {
    pub columns: Vec<String>,
    /// `(source timestamp column, derived date column)`.
    pub derived: Option<(String, String)>,
}

impl PartitionPlan {
    /// Resolve partition columns.
    ///
    /// Configured columns win. Otherwise event-like datasets with a
    /// timestamp partition by its date; state-like datasets are not
    /// partitioned.
    pub fn resolve(descriptor: &DatasetDescriptor) -> Self {
        if !descriptor.partition_by.is_empty() {
            return Self {
                columns: descriptor.partition_by.clone(),
                derived: None,
            };
        }
        if !descriptor.auto_partition || !descriptor.entity_kind.is_event_like() {
            return Self::default();
        }
        let source = descriptor
            .event_ts_column
            .as_deref()
            .or(descriptor.resolved_ts_column());
        match source {
            Some(source) => Self {
                columns: vec![EVENT_DATE_COLUMN.to_string()],
                derived: Some((source.to_string(), EVENT_DATE_COLUMN.to_string())),
            },
            None => Self::default(),
        }
    }

    /// Add the derived column to a table that carries the source timestamp.
    pub fn apply(&self, table: RecordTable) -> RecordTable {
        let Some((source, target)) = &self.derived else {
            return table;
        };
        let Some(idx) = table.column_index(source) else {
            return table;
        };
        if table.has_column(target) {
            return table;
        }
        let values = table
            .column_values(idx)
            .map(|ts| date_part(ts).unwrap_or_default())
            .collect();
        table.with_column(target, values)
    }
}
