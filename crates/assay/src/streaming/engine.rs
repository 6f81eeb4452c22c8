//! Bounded-memory, resumable promotion over a chunked raw partition.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::thread;

use indexmap::IndexMap;
use serde_json::json;
use tracing::{debug, info};

use crate::checkpoint::{CheckpointManager, CheckpointRecord};
use crate::descriptor::{DatasetDescriptor, SilverModel};
use crate::error::{AssayError, Result};
use crate::model::{CDC_LABEL, CURRENT_LABEL, FULL_SNAPSHOT_LABEL, HISTORY_LABEL};
use crate::prepare::{DataPreparer, PartitionPlan};
use crate::table::{RecordTable, TableReader, compare_values};
use crate::writer::{DatasetWriter, WriteOutcome};

use super::chunks::{Chunk, list_chunks, prefetch};

/// Summary of one streaming invocation.
#[derive(Debug, Clone, Default)]
pub struct StreamingReport {
    pub chunks_total: usize,
    pub chunks_processed: usize,
    pub chunks_skipped: usize,
    pub rows_read: usize,
    pub rows_written: usize,
    pub files: Vec<PathBuf>,
    /// False when the run stopped at its chunk budget; a later run resumes.
    pub completed: bool,
    /// Checkpoint left behind by an incomplete run.
    pub checkpoint: Option<CheckpointRecord>,
}

/// Last-value-wins state per key tuple.
#[derive(Debug, Default)]
struct Accumulator {
    headers: Vec<String>,
    /// key tuple -> (order value, row aligned to a prefix of `headers`)
    latest: IndexMap<Vec<String>, (String, Vec<String>)>,
}

impl Accumulator {
    fn absorb(&mut self, table: &RecordTable, keys: &[String], order: Option<&str>) -> Result<()> {
        for header in &table.headers {
            if !self.headers.contains(header) {
                self.headers.push(header.clone());
            }
        }
        let table = table.clone().align_to(&self.headers);
        let key_idx = table.require_columns(keys, "streaming merge")?;
        let order_idx = order.and_then(|column| table.column_index(column));

        for row in table.rows {
            let key: Vec<String> = key_idx.iter().map(|&i| row[i].clone()).collect();
            let order_value = order_idx.map(|i| row[i].clone()).unwrap_or_default();
            // Later rows win ties; an earlier row only survives with a strictly
            // higher order value.
            let keep_existing = self
                .latest
                .get(&key)
                .is_some_and(|(existing, _)| {
                    compare_values(existing, &order_value) == Ordering::Greater
                });
            if !keep_existing {
                self.latest.insert(key, (order_value, row));
            }
        }
        Ok(())
    }

    fn into_table(self, keys: &[String]) -> Result<RecordTable> {
        let rows = self.latest.into_values().map(|(_, row)| row).collect();
        let table = RecordTable::new(self.headers, rows);
        let key_idx = table.require_columns(keys, "streaming merge")?;
        Ok(table.sort_by_columns(&key_idx))
    }
}

/// Streams a raw partition through a Silver model chunk by chunk.
pub struct StreamingPromoter<'a> {
    descriptor: &'a DatasetDescriptor,
    model: SilverModel,
    writer: DatasetWriter,
    checkpoints: CheckpointManager,
    partition_plan: PartitionPlan,
    reader: TableReader,
    prefetch: usize,
    max_chunks: Option<usize>,
}

impl<'a> StreamingPromoter<'a> {
    pub fn new(
        descriptor: &'a DatasetDescriptor,
        model: SilverModel,
        writer: DatasetWriter,
        checkpoints: CheckpointManager,
    ) -> Self {
        Self {
            descriptor,
            model,
            writer,
            checkpoints,
            partition_plan: PartitionPlan::default(),
            reader: TableReader::new(),
            prefetch: 2,
            max_chunks: None,
        }
    }

    pub fn with_partition_plan(mut self, plan: PartitionPlan) -> Self {
        self.partition_plan = plan;
        self
    }

    pub fn with_reader(mut self, reader: TableReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_prefetch(mut self, window: usize) -> Self {
        self.prefetch = window;
        self
    }

    /// Stop after writing this many new chunks, leaving the checkpoint in
    /// place for a later run.
    pub fn with_max_chunks(mut self, max: usize) -> Self {
        self.max_chunks = Some(max);
        self
    }

    /// Checkpoint artifact name for this dataset and model.
    pub fn artifact(&self) -> String {
        format!("{}.{}", self.descriptor.qualified_name(), self.model)
    }

    fn order_column(&self) -> Option<&str> {
        self.descriptor
            .order_column
            .as_deref()
            .or(self.descriptor.resolved_ts_column())
    }

    pub fn run(&self, partition: &Path) -> Result<StreamingReport> {
        let accumulates = self.model.accumulates();
        if accumulates && self.descriptor.natural_keys.is_empty() {
            return Err(AssayError::Config(format!(
                "{}: model '{}' requires natural keys",
                self.descriptor.qualified_name(),
                self.model
            )));
        }

        let artifact = self.artifact();
        let chunks = list_chunks(partition)?;
        let previous = self.checkpoints.load(&artifact)?;
        let resume_after = previous.as_ref().map_or(0, |record| record.last_chunk);
        if resume_after > 0 {
            info!(artifact = %artifact, resume_after, "resuming from checkpoint");
        }

        let mut report = StreamingReport {
            chunks_total: chunks.len(),
            ..StreamingReport::default()
        };

        // Completed chunks are only re-read when they feed the accumulator.
        let to_read: Vec<Chunk> = chunks
            .into_iter()
            .filter(|chunk| {
                let done = chunk.number <= resume_after;
                if done {
                    report.chunks_skipped += 1;
                }
                accumulates || !done
            })
            .collect();

        let mut accumulator = Accumulator::default();
        let mut total_records = previous.map_or(0, |record| record.total_records);
        let mut budget_hit = false;

        thread::scope(|scope| -> Result<()> {
            for (chunk, table) in prefetch(scope, &self.reader, to_read, self.prefetch) {
                let table = self.normalize(table?)?;
                let replay = chunk.number <= resume_after;
                if accumulates {
                    accumulator.absorb(&table, &self.descriptor.natural_keys, self.order_column())?;
                }
                if replay {
                    debug!(chunk = %chunk.tag(), "replayed completed chunk");
                    continue;
                }
                if self
                    .max_chunks
                    .is_some_and(|max| report.chunks_processed >= max)
                {
                    budget_hit = true;
                    break;
                }

                report.rows_read += table.row_count();
                total_records += table.row_count() as u64;
                let outcome = self.write_chunk(&chunk, &table)?;
                report.rows_written += outcome.rows_written;
                report.files.extend(outcome.files);
                report.chunks_processed += 1;

                let mut metadata = IndexMap::new();
                metadata.insert("chunk_tag".to_string(), json!(chunk.tag()));
                metadata.insert("model".to_string(), json!(self.model.as_str()));
                self.checkpoints
                    .save(&artifact, chunk.number, total_records, metadata)?;
            }
            Ok(())
        })?;

        if budget_hit {
            report.checkpoint = self.checkpoints.load(&artifact)?;
            info!(
                artifact = %artifact,
                processed = report.chunks_processed,
                "chunk budget reached, leaving checkpoint for resume"
            );
            return Ok(report);
        }

        if accumulates {
            let label = match self.model {
                SilverModel::FullMergeDedupe => FULL_SNAPSHOT_LABEL,
                _ => CURRENT_LABEL,
            };
            let current = accumulator.into_table(&self.descriptor.natural_keys)?;
            let outcome = self.writer.write_dataset(label, &current)?;
            report.rows_written += outcome.rows_written;
            report.files.extend(outcome.files);
        }

        self.checkpoints.clear(&artifact)?;
        report.completed = true;
        info!(
            artifact = %artifact,
            processed = report.chunks_processed,
            skipped = report.chunks_skipped,
            rows_read = report.rows_read,
            rows_written = report.rows_written,
            "streaming promotion complete"
        );
        Ok(report)
    }

    /// Apply renames, column order, normalization, and partition derivation.
    fn normalize(&self, table: RecordTable) -> Result<RecordTable> {
        let table = table
            .rename_columns(&self.descriptor.column_mapping)
            .reorder(&self.descriptor.column_order);
        let prepared = DataPreparer::new(self.descriptor).prepare_chunk(table)?;
        Ok(self.partition_plan.apply(prepared.table))
    }

    /// Write a chunk under the model's per-chunk label, if it has one.
    fn write_chunk(&self, chunk: &Chunk, table: &RecordTable) -> Result<WriteOutcome> {
        let label = match self.model {
            SilverModel::PeriodicSnapshot => FULL_SNAPSHOT_LABEL,
            SilverModel::IncrementalMerge => CDC_LABEL,
            SilverModel::ScdType2 => HISTORY_LABEL,
            SilverModel::ScdType1 | SilverModel::FullMergeDedupe => {
                return Ok(WriteOutcome::default());
            }
        };
        let tag = chunk.tag();
        let outcome = self.writer.write_dataset_chunk(label, table, &tag)?;
        self.writer.write_chunk_metadata(
            &tag,
            &[label.to_string()],
            &outcome.files,
            outcome.rows_written,
        )?;
        Ok(outcome)
    }
}
