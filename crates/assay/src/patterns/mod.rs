//! Pattern handlers: the per-entity-kind curation algorithms.
//!
//! Every [`EntityKind`] maps to exactly one [`PatternHandler`]. The standard
//! registry is built from an exhaustive match over the kinds, so adding a
//! kind without a handler does not compile.

mod derived_event;
mod event;
mod state;

use indexmap::IndexMap;

use crate::descriptor::{DatasetDescriptor, EntityKind};
use crate::error::{AssayError, Result};
use crate::table::RecordTable;

pub use derived_event::{CHANGE_TYPE_COLUMN, CHANGED_COLUMNS_COLUMN, DerivedEventHandler};
pub use event::EventHandler;
pub use state::{EFFECTIVE_FROM_COLUMN, EFFECTIVE_TO_COLUMN, IS_CURRENT_COLUMN, StateHandler};

/// Label -> table, in emission order.
pub type NamedTables = IndexMap<String, RecordTable>;

pub const EVENTS_LABEL: &str = "events";
pub const STATE_CURRENT_LABEL: &str = "state_current";
pub const STATE_HISTORY_LABEL: &str = "state_history";
pub const DERIVED_EVENTS_LABEL: &str = "derived_events";

/// Curation algorithm for one entity kind.
pub trait PatternHandler: Send + Sync {
    /// The kind this handler curates.
    fn kind(&self) -> EntityKind;

    /// Check that a prepared table can be processed. Failures are fatal.
    fn validate(&self, descriptor: &DatasetDescriptor, table: &RecordTable) -> Result<()>;

    /// Produce the named output tables.
    fn process(&self, descriptor: &DatasetDescriptor, table: RecordTable) -> Result<NamedTables>;
}

/// Entity kind -> handler dispatch table.
pub struct HandlerRegistry {
    handlers: IndexMap<EntityKind, Box<dyn PatternHandler>>,
}

impl HandlerRegistry {
    /// A registry with no handlers.
    pub fn empty() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }

    /// A registry with the built-in handler for every kind.
    pub fn standard() -> Self {
        Self {
            handlers: EntityKind::ALL
                .into_iter()
                .map(|kind| (kind, builtin_handler(kind)))
                .collect(),
        }
    }

    /// Register a handler; a second handler for the same kind is rejected.
    pub fn register(&mut self, handler: Box<dyn PatternHandler>) -> Result<()> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(AssayError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: EntityKind) -> Result<&dyn PatternHandler> {
        self.handlers
            .get(&kind)
            .map(|handler| handler.as_ref())
            .ok_or(AssayError::UnregisteredKind(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.handlers.keys().copied()
    }

    /// Validate then process with the handler for the descriptor's kind.
    pub fn dispatch(
        &self,
        descriptor: &DatasetDescriptor,
        table: RecordTable,
    ) -> Result<NamedTables> {
        let handler = self.get(descriptor.entity_kind)?;
        handler.validate(descriptor, &table)?;
        handler.process(descriptor, table)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn builtin_handler(kind: EntityKind) -> Box<dyn PatternHandler> {
    match kind {
        EntityKind::Event => Box::new(EventHandler),
        EntityKind::State => Box::new(StateHandler::new()),
        EntityKind::DerivedState => Box::new(StateHandler::derived()),
        EntityKind::DerivedEvent => Box::new(DerivedEventHandler),
    }
}

/// Change timestamp, falling back to the event timestamp.
fn resolve_ts_column(descriptor: &DatasetDescriptor) -> Result<String> {
    descriptor
        .resolved_ts_column()
        .map(str::to_string)
        .ok_or_else(|| {
            AssayError::Config(format!(
                "{}: entity kind '{}' requires a change or event timestamp column",
                descriptor.qualified_name(),
                descriptor.entity_kind
            ))
        })
}

/// Resolve natural keys and the timestamp, requiring non-empty keys.
fn require_keys_and_ts(
    descriptor: &DatasetDescriptor,
    table: &RecordTable,
    ts_column: &str,
) -> Result<()> {
    if descriptor.natural_keys.is_empty() {
        return Err(AssayError::Config(format!(
            "{}: entity kind '{}' requires natural keys",
            descriptor.qualified_name(),
            descriptor.entity_kind
        )));
    }
    let mut required = descriptor.natural_keys.clone();
    required.push(ts_column.to_string());
    table.require_columns(&required, &descriptor.qualified_name())?;
    Ok(())
}

/// Half-open row ranges of consecutive rows sharing a key tuple.
fn contiguous_groups(table: &RecordTable, key_columns: &[usize]) -> Vec<std::ops::Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    for row in 1..=table.row_count() {
        let boundary = row == table.row_count()
            || key_columns
                .iter()
                .any(|&c| table.rows[row][c] != table.rows[start][c]);
        if boundary {
            groups.push(start..row);
            start = row;
        }
    }
    groups
}
