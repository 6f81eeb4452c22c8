//! Promotion of one raw partition into the Silver layer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::PromotionConfig;
use crate::descriptor::{DatasetDescriptor, SilverModel};
use crate::error::Result;
use crate::model::ModelPlanner;
use crate::patterns::{DERIVED_EVENTS_LABEL, HandlerRegistry, NamedTables};
use crate::prepare::{DataPreparer, PartitionPlan};
use crate::schema::{SchemaField, infer_schema};
use crate::streaming::{StreamingPromoter, StreamingReport};
use crate::table::{RecordTable, TableReader, sanitize_path_token};
use crate::verify::{ChecksumVerifier, RunMetadata, VerificationResult};
use crate::writer::{DatasetWriter, PartitionLock, WriteOutcome};

/// Counters reported for one promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub rows_read: usize,
    pub rows_written: usize,
    /// Distinct natural-key tuples present in the prepared input.
    pub changed_keys: usize,
    pub derived_events: usize,
    pub invalid_rows: usize,
    pub duplicates_removed: usize,
    /// Labels written, in emission order.
    pub tables: Vec<String>,
    pub files: usize,
    pub duration_ms: u64,
}

/// Everything a caller learns from [`Processor::run`].
#[derive(Debug, Clone)]
pub struct PromotionReport {
    pub dataset: String,
    pub output_dir: PathBuf,
    /// Model used when the planner ran instead of a pattern handler.
    pub model: Option<SilverModel>,
    pub verification: VerificationResult,
    pub metrics: RunMetrics,
    pub schema: Vec<SchemaField>,
    pub files: Vec<PathBuf>,
    pub error_files: Vec<PathBuf>,
    /// Present for streaming promotions.
    pub streaming: Option<StreamingReport>,
}

/// Receives a summary of every successful promotion.
///
/// Implementations publish to a catalog or webhook. A sink error is logged
/// and never fails the promotion.
pub trait CatalogSink: Send + Sync {
    /// Report a completed promotion.
    ///
    /// # Arguments
    /// * `descriptor` - The dataset that was promoted
    /// * `report` - Output location, schema snapshot, and metrics
    fn report(&self, descriptor: &DatasetDescriptor, report: &PromotionReport) -> Result<()>;
}

/// Sink that discards reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCatalog;

impl CatalogSink for NoopCatalog {
    fn report(&self, _descriptor: &DatasetDescriptor, _report: &PromotionReport) -> Result<()> {
        Ok(())
    }
}

/// Runs lock, verify, load, prepare, curate, and write for one dataset.
pub struct Processor {
    descriptor: DatasetDescriptor,
    config: PromotionConfig,
    registry: Arc<HandlerRegistry>,
    catalog: Arc<dyn CatalogSink>,
    reader: TableReader,
}

impl Processor {
    /// Create a processor with the standard handlers and no catalog.
    pub fn new(descriptor: DatasetDescriptor, config: PromotionConfig) -> Self {
        Self {
            descriptor,
            config,
            registry: Arc::new(HandlerRegistry::standard()),
            catalog: Arc::new(NoopCatalog),
            reader: TableReader::new(),
        }
    }

    /// Use a custom handler registry, typically shared across processors.
    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogSink>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_reader(mut self, reader: TableReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    /// `<root>/<domain>/<entity>/v<version>/[pattern=<kind>/]load_date=<date>`
    pub fn output_dir(&self, load_date: &str) -> PathBuf {
        let d = &self.descriptor;
        let mut dir = self
            .config
            .output_root
            .join(&d.domain)
            .join(&d.entity)
            .join(format!("v{}", d.version));
        if self.config.pattern_folders {
            dir = dir.join(format!("pattern={}", d.entity_kind));
        }
        dir.join(format!("load_date={}", sanitize_path_token(load_date)))
    }

    /// Promote the raw partition at `partition` for `load_date`.
    pub fn run(&self, partition: &Path, load_date: &str) -> Result<PromotionReport> {
        let started = Instant::now();
        self.descriptor.validate()?;
        self.config.validate()?;

        let dataset = self.descriptor.qualified_name();
        let output_dir = self.output_dir(load_date);
        let _lock = PartitionLock::acquire(
            &output_dir,
            self.config.lock_timeout(),
            self.config.lock_poll(),
        )?;
        info!(
            dataset = %dataset,
            partition = %partition.display(),
            output = %output_dir.display(),
            "promotion started"
        );

        let verifier = ChecksumVerifier::new(self.config.checksums.clone());
        let verification = verifier.verify(partition, &self.descriptor)?;
        verification.ensure_valid(partition)?;

        let plan = PartitionPlan::resolve(&self.descriptor);
        let writer = DatasetWriter::new(&output_dir)
            .with_partition_columns(plan.columns.clone())
            .with_primary_keys(self.descriptor.natural_keys.clone())
            .with_formats(self.config.formats.clone())
            .with_error_handling(self.config.error_handling.clone());

        let mut report = if self.config.streaming.enabled {
            self.run_streaming(partition, &output_dir, writer, plan)?
        } else {
            self.run_batch(partition, &output_dir, writer, plan)?
        };
        report.verification = verification;
        report.metrics.duration_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = self.catalog.report(&self.descriptor, &report) {
            warn!(dataset = %dataset, error = %e, "catalog sink failed");
        }
        info!(
            dataset = %dataset,
            rows_read = report.metrics.rows_read,
            rows_written = report.metrics.rows_written,
            files = report.metrics.files,
            duration_ms = report.metrics.duration_ms,
            "promotion complete"
        );
        Ok(report)
    }

    fn run_batch(
        &self,
        partition: &Path,
        output_dir: &Path,
        writer: DatasetWriter,
        plan: PartitionPlan,
    ) -> Result<PromotionReport> {
        let d = &self.descriptor;
        let raw = self.reader.read_path(partition)?;
        let rows_read = raw.row_count();
        let raw = if d.column_mapping.is_empty() {
            raw
        } else {
            raw.rename_columns(&d.column_mapping)
        };

        let prepared = DataPreparer::new(d).prepare(raw)?;
        let changed_keys = distinct_keys(&prepared.table, &d.natural_keys);

        // Only an explicit model bypasses the entity-kind handler.
        let (model, outputs) = if let Some(model) = d.silver_model {
            debug!(dataset = %d.qualified_name(), model = %model, "planning silver model");
            let planner = ModelPlanner::new(&d.natural_keys, prepared.sort_column.as_deref());
            (Some(model), planner.plan(prepared.table, model)?)
        } else {
            (None, self.registry.dispatch(d, prepared.table)?)
        };

        let outputs: NamedTables = outputs
            .into_iter()
            .map(|(label, table)| (label, plan.apply(table)))
            .collect();

        let mut outcome = WriteOutcome::default();
        for (label, table) in &outputs {
            outcome.merge(writer.write_dataset(label, table)?);
        }

        let schema = outputs
            .values()
            .next()
            .map(infer_schema)
            .unwrap_or_default();
        let metrics = RunMetrics {
            rows_read,
            rows_written: outcome.rows_written,
            changed_keys,
            derived_events: outputs
                .get(DERIVED_EVENTS_LABEL)
                .map_or(0, RecordTable::row_count),
            invalid_rows: outcome.invalid_rows,
            duplicates_removed: prepared.duplicates_removed,
            tables: outputs.keys().cloned().collect(),
            files: outcome.files.len(),
            duration_ms: 0,
        };

        Ok(PromotionReport {
            dataset: d.qualified_name(),
            output_dir: output_dir.to_path_buf(),
            model,
            verification: VerificationResult::default(),
            metrics,
            schema,
            files: outcome.files,
            error_files: outcome.error_files,
            streaming: None,
        })
    }

    fn run_streaming(
        &self,
        partition: &Path,
        output_dir: &Path,
        writer: DatasetWriter,
        plan: PartitionPlan,
    ) -> Result<PromotionReport> {
        // Streaming has no handler path, so the load pattern picks the
        // default model when none is declared.
        let load_pattern = RunMetadata::load(partition)?.and_then(|m| m.pattern());
        let model = self.descriptor.resolve_model(load_pattern);
        let checkpoints = CheckpointManager::new(output_dir, self.config.streaming.checkpoints);
        let streaming = StreamingPromoter::new(&self.descriptor, model, writer, checkpoints)
            .with_partition_plan(plan)
            .with_reader(self.reader.clone())
            .with_prefetch(self.config.streaming.prefetch)
            .run(partition)?;

        // Output files carry every column, so the first one describes the schema.
        let schema = streaming
            .files
            .first()
            .and_then(|file| self.reader.read_file(file).ok())
            .map(|table| infer_schema(&table))
            .unwrap_or_default();
        let metrics = RunMetrics {
            rows_read: streaming.rows_read,
            rows_written: streaming.rows_written,
            tables: ModelPlanner::labels(model)
                .iter()
                .map(|label| label.to_string())
                .collect(),
            files: streaming.files.len(),
            ..RunMetrics::default()
        };

        Ok(PromotionReport {
            dataset: self.descriptor.qualified_name(),
            output_dir: output_dir.to_path_buf(),
            model: Some(model),
            verification: VerificationResult::default(),
            metrics,
            schema,
            files: streaming.files.clone(),
            error_files: Vec::new(),
            streaming: Some(streaming),
        })
    }
}

fn distinct_keys(table: &RecordTable, keys: &[String]) -> usize {
    let Ok(idx) = table.require_columns(keys, "metrics") else {
        return 0;
    };
    if idx.is_empty() {
        return 0;
    }
    (0..table.row_count())
        .map(|row| table.key_of(row, &idx))
        .collect::<HashSet<_>>()
        .len()
}
