use tracing::debug;

use crate::descriptor::{DatasetDescriptor, DeleteMode, EntityKind};
use crate::error::Result;
use crate::prepare::{DEFAULT_DELETE_FLAGS, METADATA_COLUMNS, METADATA_PREFIX};
use crate::table::{RecordTable, is_truthy};

use super::{
    DERIVED_EVENTS_LABEL, NamedTables, PatternHandler, contiguous_groups, require_keys_and_ts,
    resolve_ts_column,
};

pub const CHANGE_TYPE_COLUMN: &str = "change_type";
pub const CHANGED_COLUMNS_COLUMN: &str = "changed_columns";

/// Change events synthesized by diffing successive states per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedEventHandler;

/// Kind of a synthesized change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeType {
    Upsert,
    Update,
    Noop,
    Delete,
}

impl ChangeType {
    fn as_str(self) -> &'static str {
        match self {
            ChangeType::Upsert => "upsert",
            ChangeType::Update => "update",
            ChangeType::Noop => "noop",
            ChangeType::Delete => "delete",
        }
    }
}

impl DerivedEventHandler {
    /// Declared attributes, or every column that is not a key, timestamp,
    /// ordering, deletion, or metadata column.
    fn attributes(descriptor: &DatasetDescriptor, table: &RecordTable) -> Vec<String> {
        if !descriptor.attributes.is_empty() {
            return descriptor
                .attributes
                .iter()
                .filter(|a| table.has_column(a))
                .cloned()
                .collect();
        }
        let mut excluded: Vec<&str> = descriptor.natural_keys.iter().map(String::as_str).collect();
        excluded.extend(descriptor.event_ts_column.as_deref());
        excluded.extend(descriptor.change_ts_column.as_deref());
        excluded.extend(descriptor.order_column.as_deref());
        excluded.extend(descriptor.delete_flag_column.as_deref());
        table
            .headers
            .iter()
            .filter(|h| {
                !excluded.contains(&h.as_str())
                    && !DEFAULT_DELETE_FLAGS.contains(&h.as_str())
                    && !METADATA_COLUMNS.contains(&h.as_str())
                    && !h.starts_with(METADATA_PREFIX)
            })
            .cloned()
            .collect()
    }

    fn delete_flag_index(descriptor: &DatasetDescriptor, table: &RecordTable) -> Option<usize> {
        if descriptor.delete_mode != DeleteMode::TombstoneEvent {
            return None;
        }
        match descriptor.delete_flag_column.as_deref() {
            Some(column) => table.column_index(column),
            None => DEFAULT_DELETE_FLAGS
                .iter()
                .find_map(|name| table.column_index(name)),
        }
    }
}

impl PatternHandler for DerivedEventHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::DerivedEvent
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
        let key_count = descriptor.natural_keys.len();
        let ts_idx = indices[key_count];
        let table = table.sort_by_columns(&indices);

        let attributes = Self::attributes(descriptor, &table);
        let attr_idx = table.require_columns(&attributes, "derived events")?;
        let delete_idx = Self::delete_flag_index(descriptor, &table);
        let ts_output = descriptor
            .event_ts_column
            .clone()
            .unwrap_or_else(|| ts.clone());

        let mut headers = descriptor.natural_keys.clone();
        headers.extend(attributes.iter().cloned());
        headers.push(ts_output);
        headers.push(CHANGE_TYPE_COLUMN.to_string());
        headers.push(CHANGED_COLUMNS_COLUMN.to_string());

        let mut rows = Vec::new();
        let mut noops = 0usize;
        for group in contiguous_groups(&table, &indices[..key_count]) {
            for row in group.clone() {
                let current = &table.rows[row];
                let (mut change, changed) = if row == group.start {
                    (ChangeType::Upsert, attributes.clone())
                } else {
                    let previous = &table.rows[row - 1];
                    let changed: Vec<String> = attributes
                        .iter()
                        .zip(&attr_idx)
                        .filter(|&(_, &i)| current[i] != previous[i])
                        .map(|(name, _)| name.clone())
                        .collect();
                    let change = if changed.is_empty() {
                        ChangeType::Noop
                    } else {
                        ChangeType::Update
                    };
                    (change, changed)
                };

                // A tombstone is emitted even when its attributes are unchanged.
                if delete_idx.is_some_and(|i| is_truthy(&current[i])) {
                    change = ChangeType::Delete;
                }
                if change == ChangeType::Noop && !descriptor.retain_noop_events {
                    noops += 1;
                    continue;
                }

                let mut out: Vec<String> =
                    indices[..key_count].iter().map(|&i| current[i].clone()).collect();
                out.extend(attr_idx.iter().map(|&i| current[i].clone()));
                out.push(current[ts_idx].clone());
                out.push(change.as_str().to_string());
                out.push(changed.join(","));
                rows.push(out);
            }
        }

        debug!(
            dataset = %descriptor.qualified_name(),
            events = rows.len(),
            suppressed_noops = noops,
            "derived events"
        );

        let mut outputs = NamedTables::new();
        outputs.insert(
            DERIVED_EVENTS_LABEL.to_string(),
            RecordTable::new(headers, rows),
        );
        Ok(outputs)
    }
}
