use tracing::debug;

use crate::descriptor::{DatasetDescriptor, EntityKind, HistoryMode};
use crate::error::Result;
use crate::table::RecordTable;

use super::{
    NamedTables, PatternHandler, STATE_CURRENT_LABEL, STATE_HISTORY_LABEL, contiguous_groups,
    require_keys_and_ts, resolve_ts_column,
};

pub const EFFECTIVE_FROM_COLUMN: &str = "effective_from";
pub const EFFECTIVE_TO_COLUMN: &str = "effective_to";
pub const IS_CURRENT_COLUMN: &str = "is_current";

/// Mutable entities, as current state or SCD2 history.
///
/// Shared by STATE and DERIVED_STATE; `derived` only marks provenance.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateHandler {
    derived: bool,
}

impl StateHandler {
    pub fn new() -> Self {
        Self { derived: false }
    }

    pub fn derived() -> Self {
        Self { derived: true }
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }
}

impl PatternHandler for StateHandler {
    fn kind(&self) -> EntityKind {
        if self.derived {
            EntityKind::DerivedState
        } else {
            EntityKind::State
        }
    }

    fn validate(&self, descriptor: &DatasetDescriptor, table: &RecordTable) -> Result<()> {
        let ts = resolve_ts_column(descriptor)?;
        require_keys_and_ts(descriptor, table, &ts)
    }

    fn process(&self, descriptor: &DatasetDescriptor, table: RecordTable) -> Result<NamedTables> {
        let ts = resolve_ts_column(descriptor)?;
        let mut order = descriptor.natural_keys.clone();
        order.push(ts.clone());
        let indices = table.require_columns(&order, &descriptor.qualified_name())?;
        let (key_idx, ts_idx) = indices.split_at(descriptor.natural_keys.len());
        let ts_idx = ts_idx[0];
        let table = table.sort_by_columns(&indices);

        debug!(
            dataset = %descriptor.qualified_name(),
            derived = self.derived,
            mode = ?descriptor.history_mode,
            rows = table.row_count(),
            "building state"
        );

        let mut outputs = NamedTables::new();
        match descriptor.history_mode {
            HistoryMode::Scd1 | HistoryMode::LatestOnly => {
                let (current, _) = table.dedupe_keep_last(key_idx);
                outputs.insert(STATE_CURRENT_LABEL.to_string(), current);
            }
            HistoryMode::Scd2 => {
                let history = build_history(table, key_idx, ts_idx);
                let current_idx = history
                    .column_index(IS_CURRENT_COLUMN)
                    .unwrap_or(history.column_count());
                let current = history.clone().filter(|row| {
                    row.get(current_idx).map(String::as_str) == Some("1")
                });
                outputs.insert(STATE_HISTORY_LABEL.to_string(), history);
                outputs.insert(STATE_CURRENT_LABEL.to_string(), current);
            }
        }
        Ok(outputs)
    }
}

/// Stamp effective ranges onto a table sorted by (keys, ts).
fn build_history(mut table: RecordTable, key_idx: &[usize], ts_idx: usize) -> RecordTable {
    let from_idx = table.add_column(EFFECTIVE_FROM_COLUMN, "");
    let to_idx = table.add_column(EFFECTIVE_TO_COLUMN, "");
    let current_idx = table.add_column(IS_CURRENT_COLUMN, "");

    for group in contiguous_groups(&table, key_idx) {
        for row in group.clone() {
            let from = table.rows[row][ts_idx].clone();
            let last = row + 1 == group.end;
            let to = if last {
                String::new()
            } else {
                table.rows[row + 1][ts_idx].clone()
            };
            let current = if last { "1" } else { "0" };
            let cells = &mut table.rows[row];
            cells[from_idx] = from;
            cells[to_idx] = to;
            cells[current_idx] = current.to_string();
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::HandlerRegistry;

    fn descriptor(mode: HistoryMode) -> DatasetDescriptor {
        DatasetDescriptor::new("crm", "sales", "accounts", EntityKind::State)
            .with_natural_keys(["id"])
            .with_change_ts("ts")
            .with_history_mode(mode)
    }

    #[test]
    fn test_scd2_two_versions() {
        let table = RecordTable::from_rows(
            &["id", "region", "ts"],
            &[&["1", "east", "2025-01-01"], &["1", "east", "2025-01-03"]],
        );
        let out = HandlerRegistry::standard()
            .dispatch(&descriptor(HistoryMode::Scd2), table)
            .unwrap();
        assert_eq!(
            out.keys().collect::<Vec<_>>(),
            vec![STATE_HISTORY_LABEL, STATE_CURRENT_LABEL]
        );

        let history = &out[STATE_HISTORY_LABEL];
        assert_eq!(history.row_count(), 2);
        assert_eq!(history.value(0, EFFECTIVE_TO_COLUMN), Some("2025-01-03"));
        assert_eq!(history.value(0, IS_CURRENT_COLUMN), Some("0"));
        assert_eq!(history.value(1, EFFECTIVE_TO_COLUMN), Some(""));
        assert_eq!(history.value(1, IS_CURRENT_COLUMN), Some("1"));

        let current = &out[STATE_CURRENT_LABEL];
        assert_eq!(current.row_count(), 1);
        assert_eq!(current.value(0, "ts"), Some("2025-01-03"));
    }

    #[test]
    fn test_scd2_leading_zero_keys_stay_distinct() {
        let table = RecordTable::from_rows(
            &["id", "region", "ts"],
            &[
                &["2134", "a", "2025-01-01"],
                &["02134", "b", "2025-01-02"],
                &["2134", "c", "2025-01-03"],
            ],
        );
        let out = HandlerRegistry::standard()
            .dispatch(&descriptor(HistoryMode::Scd2), table)
            .unwrap();

        let current = &out[STATE_CURRENT_LABEL];
        assert_eq!(current.column_by_name("id").unwrap(), vec!["02134", "2134"]);
        assert_eq!(current.column_by_name("region").unwrap(), vec!["b", "c"]);

        let history = &out[STATE_HISTORY_LABEL];
        assert_eq!(history.value(1, "id"), Some("2134"));
        assert_eq!(history.value(1, EFFECTIVE_TO_COLUMN), Some("2025-01-03"));
        assert_eq!(history.value(1, IS_CURRENT_COLUMN), Some("0"));
    }

    #[test]
    fn test_scd1_keeps_latest_per_key() {
        let table = RecordTable::from_rows(
            &["id", "region", "ts"],
            &[
                &["2", "north", "2025-01-01"],
                &["1", "west", "2025-01-05"],
                &["1", "east", "2025-01-02"],
            ],
        );
        let out = StateHandler::new()
            .process(&descriptor(HistoryMode::Scd1), table)
            .unwrap();
        let current = &out[STATE_CURRENT_LABEL];
        assert_eq!(out.len(), 1);
        assert_eq!(current.column_by_name("region").unwrap(), vec!["west", "north"]);
    }

    #[test]
    fn test_derived_state_falls_back_to_event_ts() {
        let desc = DatasetDescriptor::new("crm", "sales", "accounts", EntityKind::DerivedState)
            .with_natural_keys(["id"])
            .with_event_ts("seen_at")
            .with_history_mode(HistoryMode::Scd2);
        let table = RecordTable::from_rows(&["id", "seen_at"], &[&["1", "2025-01-01"]]);
        let handler = StateHandler::derived();
        assert_eq!(handler.kind(), EntityKind::DerivedState);
        handler.validate(&desc, &table).unwrap();
        let out = handler.process(&desc, table).unwrap();
        assert_eq!(out[STATE_CURRENT_LABEL].row_count(), 1);
    }

    #[test]
    fn test_requires_natural_keys() {
        let desc = DatasetDescriptor::new("crm", "sales", "accounts", EntityKind::State)
            .with_change_ts("ts");
        let table = RecordTable::from_rows(&["ts"], &[&["2025-01-01"]]);
        assert!(StateHandler::new().validate(&desc, &table).is_err());
    }
}
