//! Partitioned, validated persistence of named tables.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ErrorHandlingConfig;
use crate::error::{AssayError, Result};
use crate::table::{RecordTable, is_null_value, sanitize_path_token};

use super::format::OutputFormat;

/// Directory receiving rows with null primary keys.
pub const ERRORS_DIR: &str = "_errors";

/// Directory receiving chunk metadata records.
pub const CHUNKS_DIR: &str = "_chunks";

/// Extensions of data files any output format may have produced.
const DATA_EXTENSIONS: &[&str] = &["csv", "jsonl", "parquet"];

/// Files produced by one write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub files: Vec<PathBuf>,
    pub error_files: Vec<PathBuf>,
    pub rows_written: usize,
    pub invalid_rows: usize,
}

impl WriteOutcome {
    pub fn merge(&mut self, other: WriteOutcome) {
        self.files.extend(other.files);
        self.error_files.extend(other.error_files);
        self.rows_written += other.rows_written;
        self.invalid_rows += other.invalid_rows;
    }
}

/// Record of one chunk write, consumed by a later consolidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_tag: String,
    pub labels: Vec<String>,
    pub files: Vec<String>,
    pub record_count: usize,
    pub written_at: String,
}

/// One partition's slice of a table.
struct PartitionSlice {
    dir: PathBuf,
    valid: RecordTable,
    invalid: RecordTable,
}

/// Writes named tables under a dataset's output directory.
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    base: PathBuf,
    partition_columns: Vec<String>,
    primary_keys: Vec<String>,
    formats: Vec<OutputFormat>,
    error_handling: ErrorHandlingConfig,
}

impl DatasetWriter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            partition_columns: Vec::new(),
            primary_keys: Vec::new(),
            formats: vec![OutputFormat::Csv],
            error_handling: ErrorHandlingConfig::default(),
        }
    }

    pub fn with_partition_columns(mut self, columns: Vec<String>) -> Self {
        self.partition_columns = columns;
        self
    }

    pub fn with_primary_keys(mut self, keys: Vec<String>) -> Self {
        self.primary_keys = keys;
        self
    }

    pub fn with_formats(mut self, formats: Vec<OutputFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_error_handling(mut self, error_handling: ErrorHandlingConfig) -> Self {
        self.error_handling = error_handling;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Write a named table, replacing the same label's previous files.
    pub fn write_dataset(&self, label: &str, table: &RecordTable) -> Result<WriteOutcome> {
        self.write(label, table, None)
    }

    /// Write one chunk of a named table as `<label>-<tag>.<ext>`.
    pub fn write_dataset_chunk(
        &self,
        label: &str,
        table: &RecordTable,
        chunk_tag: &str,
    ) -> Result<WriteOutcome> {
        self.write(label, table, Some(chunk_tag))
    }

    /// Persist `_chunks/<tag>.json`.
    pub fn write_chunk_metadata(
        &self,
        chunk_tag: &str,
        labels: &[String],
        files: &[PathBuf],
        record_count: usize,
    ) -> Result<PathBuf> {
        let dir = self.base.join(CHUNKS_DIR);
        fs::create_dir_all(&dir).map_err(|e| AssayError::io(&dir, e))?;
        let record = ChunkMetadata {
            chunk_tag: chunk_tag.to_string(),
            labels: labels.to_vec(),
            files: files
                .iter()
                .map(|f| {
                    f.strip_prefix(&self.base)
                        .unwrap_or(f)
                        .to_string_lossy()
                        .into_owned()
                })
                .collect(),
            record_count,
            written_at: Utc::now().to_rfc3339(),
        };
        let path = dir.join(format!("{}.json", chunk_tag));
        let file = File::create(&path).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to create file '{}': {}",
                path.display(),
                e
            ))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &record).map_err(|e| {
            AssayError::Persistence(format!("Failed to serialize chunk metadata: {}", e))
        })?;
        Ok(path)
    }

    fn write(
        &self,
        label: &str,
        table: &RecordTable,
        chunk_tag: Option<&str>,
    ) -> Result<WriteOutcome> {
        let columns: Vec<String> = self
            .partition_columns
            .iter()
            .filter(|column| {
                let present = table.has_column(column);
                if !present {
                    warn!(label, column = %column, "partition column absent, skipping");
                }
                present
            })
            .cloned()
            .collect();

        let mut slices = Vec::new();
        for (dir, part) in partition(table.clone(), &columns, self.base.clone()) {
            let (valid, invalid) = self.split_invalid(part)?;
            slices.push(PartitionSlice { dir, valid, invalid });
        }

        // Every partition is checked before the first file is written.
        for slice in &slices {
            let invalid = slice.invalid.row_count();
            let total = invalid + slice.valid.row_count();
            if !self.error_handling.allows(invalid, total) {
                warn!(
                    label,
                    partition = %slice.dir.display(),
                    invalid,
                    total,
                    "bad record threshold exceeded"
                );
                return Err(AssayError::BadRecordThreshold {
                    label: label.to_string(),
                    invalid,
                    total,
                });
            }
        }

        let file_stem = match chunk_tag {
            Some(tag) => format!("{}-{}", label, tag),
            None => label.to_string(),
        };

        // A full write supersedes every earlier file of the label, including
        // partitions the new data no longer produces.
        if chunk_tag.is_none() {
            remove_label_files(&self.base, label)?;
        }

        let mut outcome = WriteOutcome::default();
        for slice in slices {
            fs::create_dir_all(&slice.dir).map_err(|e| AssayError::io(&slice.dir, e))?;
            if !slice.invalid.is_empty() {
                let errors_dir = slice.dir.join(ERRORS_DIR);
                fs::create_dir_all(&errors_dir).map_err(|e| AssayError::io(&errors_dir, e))?;
                let path = errors_dir.join(format!("{}.csv", file_stem));
                OutputFormat::Csv.write(&slice.invalid, &path)?;
                outcome.invalid_rows += slice.invalid.row_count();
                outcome.error_files.push(path);
            }
            for format in &self.formats {
                let path = slice
                    .dir
                    .join(format!("{}.{}", file_stem, format.extension()));
                format.write(&slice.valid, &path)?;
                debug!(
                    label,
                    file = %path.display(),
                    rows = slice.valid.row_count(),
                    "wrote table"
                );
                outcome.files.push(path);
            }
            outcome.rows_written += slice.valid.row_count();
        }

        info!(
            label,
            chunk = chunk_tag.unwrap_or(""),
            rows = outcome.rows_written,
            invalid = outcome.invalid_rows,
            files = outcome.files.len(),
            "dataset written"
        );
        Ok(outcome)
    }

    /// Split rows with a null primary key out of the table.
    fn split_invalid(&self, table: RecordTable) -> Result<(RecordTable, RecordTable)> {
        if !self.error_handling.enabled || self.primary_keys.is_empty() {
            let headers = table.headers.clone();
            return Ok((table, RecordTable::empty(headers)));
        }
        let key_idx = table.require_columns(&self.primary_keys, "primary key validation")?;
        let headers = table.headers.clone();
        let (invalid, valid): (Vec<_>, Vec<_>) = table
            .rows
            .into_iter()
            .partition(|row| key_idx.iter().any(|&i| is_null_value(&row[i])));
        Ok((
            RecordTable::new(headers.clone(), valid),
            RecordTable::new(headers, invalid),
        ))
    }
}

/// Split a table by partition column values, one level per column.
fn partition(table: RecordTable, columns: &[String], dir: PathBuf) -> Vec<(PathBuf, RecordTable)> {
    let Some((column, rest)) = columns.split_first() else {
        return vec![(dir, table)];
    };
    let Some(idx) = table.column_index(column) else {
        return vec![(dir, table)];
    };
    table
        .group_indices(&[idx])
        .into_iter()
        .flat_map(|(key, rows)| {
            let token = format!("{}={}", column, sanitize_path_token(&key[0]));
            partition(table.take(&rows), rest, dir.join(token))
        })
        .collect()
}

/// Remove a label's data and error files under `dir`, pruning partition
/// directories left empty. Reserved `_`/`.` entries other than the errors
/// directory are never touched.
fn remove_label_files(dir: &Path, label: &str) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(AssayError::io(dir, e)),
    };
    for entry in entries {
        let path = entry.map_err(|e| AssayError::io(dir, e))?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.is_dir() {
            if name == ERRORS_DIR {
                let error_file = path.join(format!("{}.csv", label));
                if error_file.exists() {
                    fs::remove_file(&error_file).map_err(|e| AssayError::io(&error_file, e))?;
                }
                prune_if_empty(&path);
            } else if !name.starts_with('_') && !name.starts_with('.') {
                remove_label_files(&path, label)?;
                prune_if_empty(&path);
            }
        } else if is_label_file(&path, label) {
            fs::remove_file(&path).map_err(|e| AssayError::io(&path, e))?;
            debug!(label, file = %path.display(), "removed superseded file");
        }
    }
    Ok(())
}

fn is_label_file(path: &Path, label: &str) -> bool {
    let stem = path.file_stem().and_then(|s| s.to_str());
    let ext = path.extension().and_then(|e| e.to_str());
    stem == Some(label) && ext.is_some_and(|e| DATA_EXTENSIONS.contains(&e))
}

fn prune_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty {
        let _ = fs::remove_dir(dir);
    }
}
