//! Tabular batches and the readers that load them.

mod reader;
mod record;
mod value;

pub use reader::{ReaderConfig, TableReader, list_data_files};
pub use record::RecordTable;
pub use value::{
    Timestamp, compare_values, date_part, is_null_value, is_truthy, normalize_timestamp,
    parse_timestamp, sanitize_path_token,
};
