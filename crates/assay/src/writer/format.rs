//! Output file formats.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AssayError, Result};
use crate::table::RecordTable;

/// File format a named table is persisted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    /// Newline-delimited JSON objects; missing values become `null`.
    Jsonl,
    #[cfg(feature = "parquet")]
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
            #[cfg(feature = "parquet")]
            OutputFormat::Parquet => "parquet",
        }
    }

    /// Write a table to `path`, replacing any existing file.
    pub fn write(&self, table: &RecordTable, path: &Path) -> Result<()> {
        match self {
            OutputFormat::Csv => write_csv(table, path),
            OutputFormat::Jsonl => write_jsonl(table, path),
            #[cfg(feature = "parquet")]
            OutputFormat::Parquet => write_parquet(table, path),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = AssayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" | "ndjson" => Ok(OutputFormat::Jsonl),
            #[cfg(feature = "parquet")]
            "parquet" => Ok(OutputFormat::Parquet),
            #[cfg(not(feature = "parquet"))]
            "parquet" => Err(AssayError::UnsupportedFormat(
                "parquet support not enabled, rebuild with --features parquet".to_string(),
            )),
            _ => Err(AssayError::UnsupportedFormat(format!(
                "Unknown format: {}. Use csv or jsonl.",
                s
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

fn write_csv(table: &RecordTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush().map_err(|e| AssayError::io(path, e))?;
    Ok(())
}

fn write_jsonl(table: &RecordTable, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| AssayError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for row in &table.rows {
        let record: IndexMap<&str, Option<&str>> = table
            .headers
            .iter()
            .zip(row)
            .map(|(h, v)| (h.as_str(), (!v.is_empty()).then_some(v.as_str())))
            .collect();
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n").map_err(|e| AssayError::io(path, e))?;
    }
    writer.flush().map_err(|e| AssayError::io(path, e))?;
    Ok(())
}

/// All columns are written as nullable UTF-8.
#[cfg(feature = "parquet")]
fn write_parquet(table: &RecordTable, path: &Path) -> Result<()> {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    let schema = Arc::new(Schema::new(
        table
            .headers
            .iter()
            .map(|h| Field::new(h, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let columns: Vec<ArrayRef> = (0..table.column_count())
        .map(|c| {
            let values: Vec<Option<&str>> = table
                .column_values(c)
                .map(|v| (!v.is_empty()).then_some(v))
                .collect();
            Arc::new(StringArray::from(values)) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| AssayError::Columnar(e.to_string()))?;

    let file = File::create(path).map_err(|e| AssayError::io(path, e))?;
    let mut writer =
        ArrowWriter::try_new(file, schema, None).map_err(|e| AssayError::Columnar(e.to_string()))?;
    writer
        .write(&batch)
        .map_err(|e| AssayError::Columnar(e.to_string()))?;
    writer
        .close()
        .map_err(|e| AssayError::Columnar(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableReader;
    use tempfile::TempDir;

    #[test]
    fn test_csv_and_jsonl_read_back() {
        let dir = TempDir::new().unwrap();
        let table = RecordTable::from_rows(&["id", "note"], &[&["1", "a, b"], &["2", ""]]);

        let csv_path = dir.path().join("t.csv");
        OutputFormat::Csv.write(&table, &csv_path).unwrap();
        assert_eq!(TableReader::new().read_file(&csv_path).unwrap(), table);

        let jsonl_path = dir.path().join("t.jsonl");
        OutputFormat::Jsonl.write(&table, &jsonl_path).unwrap();
        let text = std::fs::read_to_string(&jsonl_path).unwrap();
        assert_eq!(text.lines().nth(1), Some(r#"{"id":"2","note":null}"#));
        assert_eq!(TableReader::new().read_file(&jsonl_path).unwrap(), table);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("ndjson".parse::<OutputFormat>().unwrap(), OutputFormat::Jsonl);
        assert!("xlsx".parse::<OutputFormat>().is_err());
    }
}
