use tracing::debug;

use crate::descriptor::{DatasetDescriptor, EntityKind, InputMode};
use crate::error::{AssayError, Result};
use crate::table::{RecordTable, date_part};

use super::{EVENTS_LABEL, NamedTables, PatternHandler};

const EVENT_DAY_COLUMN: &str = "__assay_event_day";

/// Immutable events, ordered by event time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventHandler;

impl EventHandler {
    fn event_ts(descriptor: &DatasetDescriptor) -> Result<&str> {
        descriptor.event_ts_column.as_deref().ok_or_else(|| {
            AssayError::Config(format!(
                "{}: events require an event timestamp column",
                descriptor.qualified_name()
            ))
        })
    }
}

impl PatternHandler for EventHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Event
    }

    fn validate(&self, descriptor: &DatasetDescriptor, table: &RecordTable) -> Result<()> {
        let ts = Self::event_ts(descriptor)?;
        let mut required = descriptor.natural_keys.clone();
        required.push(ts.to_string());
        table.require_columns(&required, &descriptor.qualified_name())?;
        Ok(())
    }

    fn process(&self, descriptor: &DatasetDescriptor, table: RecordTable) -> Result<NamedTables> {
        let ts = Self::event_ts(descriptor)?;
        let ts_idx = table.require_columns(&[ts.to_string()], "events")?[0];
        let mut table = table.sort_by_columns(&[ts_idx]);

        if descriptor.input_mode == InputMode::ReplaceDaily && !descriptor.natural_keys.is_empty() {
            let days = table
                .column_values(ts_idx)
                .map(|value| date_part(value).unwrap_or_default())
                .collect();
            let with_day = table.with_column(EVENT_DAY_COLUMN, days);
            let mut dedupe = descriptor.natural_keys.clone();
            dedupe.push(EVENT_DAY_COLUMN.to_string());
            let indices = with_day.require_columns(&dedupe, "events")?;
            let (deduped, removed) = with_day.dedupe_keep_last(&indices);
            debug!(
                dataset = %descriptor.qualified_name(),
                removed,
                "replace-daily dedupe"
            );
            table = deduped.drop_columns(&[EVENT_DAY_COLUMN.to_string()]);
        }

        let mut outputs = NamedTables::new();
        outputs.insert(EVENTS_LABEL.to_string(), table);
        Ok(outputs)
    }
}
