//! Schema snapshots reported alongside curated output.

mod snapshot;
mod types;

pub use snapshot::{SchemaField, infer_schema};
pub use types::ColumnType;
