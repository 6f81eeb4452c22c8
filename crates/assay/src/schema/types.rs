//! Column type vocabulary for schema snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Narrowest type every non-null value of a column fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    DateTime,
    /// Calendar date with no time of day.
    Date,
    /// Column holds only nulls.
    #[default]
    Unknown,
}

impl ColumnType {
    /// Catalog-facing type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::DateTime => "date_time",
            ColumnType::Date => "date",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
