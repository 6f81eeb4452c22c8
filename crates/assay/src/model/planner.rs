//! Maps a Silver curation model to its named output tables.

use std::collections::HashSet;

use crate::descriptor::SilverModel;
use crate::error::{AssayError, Result};
use crate::patterns::{IS_CURRENT_COLUMN, NamedTables};
use crate::table::RecordTable;

pub const FULL_SNAPSHOT_LABEL: &str = "full_snapshot";
pub const CDC_LABEL: &str = "cdc";
pub const CURRENT_LABEL: &str = "current";
pub const HISTORY_LABEL: &str = "history";

/// Builds named tables for a Silver model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPlanner<'a> {
    primary_keys: &'a [String],
    order_column: Option<&'a str>,
}

impl<'a> ModelPlanner<'a> {
    pub fn new(primary_keys: &'a [String], order_column: Option<&'a str>) -> Self {
        Self {
            primary_keys,
            order_column,
        }
    }

    /// Labels a model emits, in emission order.
    pub fn labels(model: SilverModel) -> &'static [&'static str] {
        match model {
            SilverModel::PeriodicSnapshot | SilverModel::FullMergeDedupe => &[FULL_SNAPSHOT_LABEL],
            SilverModel::IncrementalMerge => &[CDC_LABEL],
            SilverModel::ScdType1 => &[CURRENT_LABEL],
            SilverModel::ScdType2 => &[HISTORY_LABEL, CURRENT_LABEL],
        }
    }

    pub fn plan(&self, table: RecordTable, model: SilverModel) -> Result<NamedTables> {
        let mut outputs = NamedTables::new();
        match model {
            SilverModel::PeriodicSnapshot => {
                outputs.insert(FULL_SNAPSHOT_LABEL.to_string(), table);
            }
            SilverModel::IncrementalMerge => {
                outputs.insert(CDC_LABEL.to_string(), table);
            }
            SilverModel::FullMergeDedupe => {
                let (current, _) = self.latest_per_key(table, model)?;
                outputs.insert(FULL_SNAPSHOT_LABEL.to_string(), current);
            }
            SilverModel::ScdType1 => {
                let (current, _) = self.latest_per_key(table, model)?;
                outputs.insert(CURRENT_LABEL.to_string(), current);
            }
            SilverModel::ScdType2 => {
                let (current, sorted) = self.latest_per_key(table, model)?;
                let history = self.mark_current(sorted, &current)?;
                outputs.insert(HISTORY_LABEL.to_string(), history);
                outputs.insert(CURRENT_LABEL.to_string(), current);
            }
        }
        Ok(outputs)
    }

    /// Key + order column indices, failing when either is undeclared.
    fn dedupe_columns(&self, table: &RecordTable, model: SilverModel) -> Result<Vec<usize>> {
        if self.primary_keys.is_empty() {
            return Err(AssayError::Config(format!(
                "model '{}' requires primary keys",
                model
            )));
        }
        let Some(order) = self.order_column else {
            return Err(AssayError::Config(format!(
                "model '{}' requires an order column",
                model
            )));
        };
        let mut columns = self.primary_keys.to_vec();
        columns.push(order.to_string());
        table.require_columns(&columns, model.as_str())
    }

    /// Returns (deduplicated current rows, full table sorted by keys and order).
    fn latest_per_key(
        &self,
        table: RecordTable,
        model: SilverModel,
    ) -> Result<(RecordTable, RecordTable)> {
        let columns = self.dedupe_columns(&table, model)?;
        let sorted = table.sort_by_columns(&columns);
        let key_count = self.primary_keys.len();
        let (current, _) = sorted.clone().dedupe_keep_last(&columns[..key_count]);
        Ok((current, sorted))
    }

    /// Flag history rows whose (keys, order value) survived deduplication.
    fn mark_current(&self, history: RecordTable, current: &RecordTable) -> Result<RecordTable> {
        let columns = self.dedupe_columns(&history, SilverModel::ScdType2)?;
        let survivors: HashSet<Vec<String>> = (0..current.row_count())
            .map(|row| current.key_of(row, &columns))
            .collect();
        let flags = (0..history.row_count())
            .map(|row| {
                if survivors.contains(&history.key_of(row, &columns)) {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            })
            .collect();
        Ok(history.with_column(IS_CURRENT_COLUMN, flags))
    }
}
