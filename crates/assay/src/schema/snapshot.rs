//! Ordered schema snapshot of a curated table.

use serde::{Deserialize, Serialize};

use crate::table::{RecordTable, is_null_value, parse_timestamp};

use super::types::ColumnType;

/// One column of a schema snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Infer an ordered `{name, type}` list from a table's values.
pub fn infer_schema(table: &RecordTable) -> Vec<SchemaField> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(idx, name)| SchemaField {
            name: name.clone(),
            column_type: infer_column_type(table.column_values(idx)),
        })
        .collect()
}

/// Narrowest type every non-null value fits.
fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut integer = true;
    let mut float = true;
    let mut boolean = true;
    let mut date = true;
    let mut datetime = true;
    let mut seen = false;

    for value in values.map(str::trim).filter(|v| !is_null_value(v)) {
        seen = true;
        integer &= value.parse::<i64>().is_ok();
        float &= value.parse::<f64>().is_ok();
        boolean &= matches!(value.to_ascii_lowercase().as_str(), "true" | "false");
        if date || datetime {
            match parse_timestamp(value) {
                Some(ts) if ts.date_only => datetime = false,
                Some(_) => date = false,
                None => {
                    date = false;
                    datetime = false;
                }
            }
        }
        if !(integer || float || boolean || date || datetime) {
            return ColumnType::String;
        }
    }

    if !seen {
        ColumnType::Unknown
    } else if integer {
        ColumnType::Integer
    } else if float {
        ColumnType::Float
    } else if boolean {
        ColumnType::Boolean
    } else if date {
        ColumnType::Date
    } else if datetime {
        ColumnType::DateTime
    } else {
        ColumnType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_schema() {
        let table = RecordTable::from_rows(
            &["id", "amount", "active", "day", "at", "name", "empty"],
            &[
                &["1", "1.5", "true", "2025-01-01", "2025-01-01T10:00:00", "a", ""],
                &["2", "2", "false", "2025-01-02", "2025-01-02 11:00:00", "b", "NA"],
            ],
        );
        let types: Vec<ColumnType> = infer_schema(&table)
            .into_iter()
            .map(|f| f.column_type)
            .collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::Boolean,
                ColumnType::Date,
                ColumnType::DateTime,
                ColumnType::String,
                ColumnType::Unknown,
            ]
        );
    }
}
