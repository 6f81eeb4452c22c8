//! Readers for raw partition files: delimited text, JSON lines, parquet.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{AssayError, Result};

use super::record::RecordTable;

/// Delimiters to try when auto-detecting.
const DELIMITERS: &[u8] = &[b'\t', b',', b';', b'|'];

/// Extensions recognized as data files inside a partition directory.
const DATA_EXTENSIONS: &[&str] = &["csv", "tsv", "psv", "txt", "jsonl", "ndjson", "parquet"];

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Delimiter to use (None = auto-detect).
    pub delimiter: Option<u8>,
    /// Whether the file has a header row.
    pub has_header: bool,
    /// Quote character.
    pub quote: u8,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            has_header: true,
            quote: b'"',
        }
    }
}

/// Reads raw files into [`RecordTable`]s.
#[derive(Debug, Clone, Default)]
pub struct TableReader {
    config: ReaderConfig,
}

impl TableReader {
    /// Create a reader with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reader with custom configuration.
    pub fn with_config(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Read a single file or every data file of a directory.
    pub fn read_path(&self, path: impl AsRef<Path>) -> Result<RecordTable> {
        let path = path.as_ref();
        if path.is_dir() {
            let mut table = RecordTable::default();
            for file in list_data_files(path)? {
                table = table.concat(self.read_file(&file)?);
            }
            Ok(table)
        } else {
            self.read_file(path)
        }
    }

    /// Read one data file, choosing the decoder from its extension.
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<RecordTable> {
        let path = path.as_ref();
        match extension(path).as_str() {
            "jsonl" | "ndjson" => read_json_lines(path),
            "parquet" => read_parquet(path),
            _ => {
                let contents = fs::read(path).map_err(|e| AssayError::io(path, e))?;
                let delimiter = match self.config.delimiter {
                    Some(d) => d,
                    None if extension(path) == "tsv" => b'\t',
                    None => detect_delimiter(&contents).unwrap_or(b','),
                };
                self.parse_bytes(&contents, delimiter)
            }
        }
    }

    /// Parse delimited bytes directly.
    pub fn parse_bytes(&self, bytes: &[u8], delimiter: u8) -> Result<RecordTable> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(self.config.has_header)
            .quote(self.config.quote)
            .flexible(true)
            .from_reader(bytes);

        let mut headers: Vec<String> = if self.config.has_header {
            reader.headers()?.iter().map(|s| s.trim().to_string()).collect()
        } else {
            Vec::new()
        };

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            if !self.config.has_header && headers.is_empty() {
                headers = (0..record.len())
                    .map(|i| format!("column_{}", i + 1))
                    .collect();
            }
            rows.push(record.iter().map(|s| s.to_string()).collect());
        }

        if headers.iter().all(|h| h.is_empty()) && rows.is_empty() {
            return Ok(RecordTable::default());
        }

        Ok(RecordTable::new(headers, rows))
    }
}

/// List data files of a partition directory in name order.
///
/// Names starting with `_` or `.` are reserved for manifests, metadata,
/// quarantine, and locks, and are skipped.
pub fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| AssayError::io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            !name.starts_with('_') && !name.starts_with('.')
        })
        .filter(|path| DATA_EXTENSIONS.contains(&extension(path).as_str()))
        .collect();
    files.sort();
    Ok(files)
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Read newline-delimited JSON objects; columns are unioned in first-seen order.
fn read_json_lines(path: &Path) -> Result<RecordTable> {
    let file = File::open(path).map_err(|e| AssayError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut headers: Vec<String> = Vec::new();
    let mut records: Vec<serde_json::Map<String, Value>> = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| AssayError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)?;
        let Value::Object(object) = value else {
            return Err(AssayError::UnsupportedFormat(format!(
                "'{}' contains a non-object JSON line",
                path.display()
            )));
        };
        for key in object.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
        records.push(object);
    }

    let rows = records
        .iter()
        .map(|object| {
            headers
                .iter()
                .map(|h| object.get(h).map(json_cell).unwrap_or_default())
                .collect()
        })
        .collect();
    Ok(RecordTable::new(headers, rows))
}

/// Render a JSON value as a cell.
fn json_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(feature = "parquet")]
fn read_parquet(path: &Path) -> Result<RecordTable> {
    use arrow::array::Array;
    use arrow::util::display::array_value_to_string;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path).map_err(|e| AssayError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| AssayError::Columnar(e.to_string()))?;
    let headers: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder
        .build()
        .map_err(|e| AssayError::Columnar(e.to_string()))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| AssayError::Columnar(e.to_string()))?;
        for row in 0..batch.num_rows() {
            let mut cells = Vec::with_capacity(batch.num_columns());
            for column in batch.columns() {
                if column.is_null(row) {
                    cells.push(String::new());
                } else {
                    cells.push(
                        array_value_to_string(column, row)
                            .map_err(|e| AssayError::Columnar(e.to_string()))?,
                    );
                }
            }
            rows.push(cells);
        }
    }
    Ok(RecordTable::new(headers, rows))
}

#[cfg(not(feature = "parquet"))]
fn read_parquet(path: &Path) -> Result<RecordTable> {
    Err(AssayError::UnsupportedFormat(format!(
        "'{}': parquet support not enabled, rebuild with --features parquet",
        path.display()
    )))
}

/// Detect the delimiter by analyzing the first few lines.
fn detect_delimiter(bytes: &[u8]) -> Result<u8> {
    let sample = &bytes[..bytes.len().min(64 * 1024)];
    let reader = BufReader::new(sample);
    let lines: Vec<String> = reader
        .lines()
        .take(10)
        .filter_map(|l| l.ok())
        .filter(|l| !l.trim().is_empty())
        .collect();

    if lines.is_empty() {
        return Err(AssayError::EmptyData("No lines to analyze".to_string()));
    }

    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in DELIMITERS {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_delimiter_in_line(line, delim))
            .collect();

        let first_count = counts[0];
        if first_count == 0 {
            continue;
        }

        // Consistent counts across lines beat a higher but ragged count.
        let consistent = counts.iter().all(|&c| c == first_count);
        let score = if consistent {
            first_count * 1000 + usize::from(delim == b'\t') * 100
        } else {
            first_count
        };

        if score > best_score {
            best_score = score;
            best_delimiter = delim;
        }
    }

    Ok(best_delimiter)
}

/// Count delimiter occurrences in a line, respecting quotes.
fn count_delimiter_in_line(line: &str, delimiter: u8) -> usize {
    let delim_char = delimiter as char;
    let mut count = 0;
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == delim_char && !in_quotes => count += 1,
            _ => {}
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(b"a,b,c\n1,2,3\n4,5,6").unwrap(), b',');
        assert_eq!(detect_delimiter(b"a\tb\tc\n1\t2\t3").unwrap(), b'\t');
        assert_eq!(detect_delimiter(b"a|b\n\"x|y\"|2").unwrap(), b'|');
    }

    #[test]
    fn test_parse_csv_pads_short_rows() {
        let reader = TableReader::new();
        let table = reader.parse_bytes(b"id,name,city\n1,Alice\n2,Bob,LA", b',').unwrap();
        assert_eq!(table.headers, vec!["id", "name", "city"]);
        assert_eq!(table.rows[0], vec!["1", "Alice", ""]);
        assert_eq!(table.get(1, 2), Some("LA"));
    }

    #[test]
    fn test_header_only_file_is_empty_table() {
        let table = TableReader::new().parse_bytes(b"id,name\n", b',').unwrap();
        assert_eq!(table.column_count(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_read_directory_skips_reserved_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("part-0002.csv"), "id,v\n2,b\n").unwrap();
        fs::write(dir.path().join("part-0001.csv"), "id,v\n1,a\n").unwrap();
        fs::write(dir.path().join("_checksums.json"), "{}").unwrap();
        fs::write(
            dir.path().join("part-0003.jsonl"),
            "{\"id\": 3, \"v\": \"c\", \"extra\": null}\n",
        )
        .unwrap();

        let files = list_data_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);

        let table = TableReader::new().read_path(dir.path()).unwrap();
        assert_eq!(table.headers, vec!["id", "v", "extra"]);
        let ids: Vec<&str> = table.column_values(0).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
