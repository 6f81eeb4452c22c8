//! Fan-out of independent dataset promotions over a fixed-size thread pool.
//!
//! Each job is one [`Processor::run`]; jobs share nothing but the filesystem.
//! Two jobs writing the same output partition serialize on its lock.

use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{AssayError, Result};
use crate::processor::{Processor, PromotionReport};

/// One partition to promote.
pub struct PromotionJob {
    pub processor: Processor,
    pub partition: PathBuf,
    pub load_date: String,
}

impl PromotionJob {
    pub fn new(
        processor: Processor,
        partition: impl Into<PathBuf>,
        load_date: impl Into<String>,
    ) -> Self {
        Self {
            processor,
            partition: partition.into(),
            load_date: load_date.into(),
        }
    }

    fn run(&self) -> Result<PromotionReport> {
        self.processor.run(&self.partition, &self.load_date)
    }
}

/// Requested workers, capped to available parallelism and at least one.
fn resolve_workers(requested: usize, available: usize) -> usize {
    let requested = requested.max(1);
    if requested > available {
        warn!(requested, available, "worker count exceeds available parallelism, capping");
        available.max(1)
    } else {
        requested
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|_| {
            warn!("Failed to determine available parallelism, falling back to 1");
            1
        })
}

/// Run every job on a pool of `workers` threads.
///
/// Returns one result per job, in input order. A failing job never stops
/// the others; only a pool that cannot be built fails the call.
pub fn promote_all(
    jobs: Vec<PromotionJob>,
    workers: usize,
) -> Result<Vec<Result<PromotionReport>>> {
    let num_threads = resolve_workers(workers, available_parallelism());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("assay-promote-{i}"))
        .build()
        .map_err(|e| AssayError::Config(format!("Failed to build promotion pool: {}", e)))?;

    info!(jobs = jobs.len(), num_threads, "promoting datasets");
    let results: Vec<Result<PromotionReport>> =
        pool.install(|| jobs.par_iter().map(PromotionJob::run).collect());

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(failed, total = results.len(), "some promotions failed");
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromotionConfig;
    use crate::descriptor::{DatasetDescriptor, EntityKind};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_workers() {
        assert_eq!(resolve_workers(4, 8), 4);
        assert_eq!(resolve_workers(16, 8), 8);
        assert_eq!(resolve_workers(0, 8), 1);
        assert_eq!(resolve_workers(3, 0), 1);
    }

    #[test]
    fn test_results_in_input_order_with_isolated_failure() {
        let dir = TempDir::new().unwrap();
        let mut jobs = Vec::new();
        for entity in ["alpha", "beta", "gamma"] {
            let raw = dir.path().join("raw").join(entity);
            fs::create_dir_all(&raw).unwrap();
            fs::write(raw.join("part.csv"), "id,ts\n1,2025-01-01\n").unwrap();
            let descriptor = DatasetDescriptor::new("sys", "d", entity, EntityKind::State)
                .with_natural_keys(["id"])
                .with_change_ts("ts");
            let config = PromotionConfig::new(dir.path().join("silver"));
            let processor = Processor::new(descriptor, config);
            jobs.push(PromotionJob::new(processor, raw, "2025-01-02"));
        }
        jobs[1].partition = dir.path().join("raw").join("missing");

        let results = promote_all(jobs, 2).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().dataset.contains("alpha"));
        assert!(results[1].is_err());
        assert!(results[2].as_ref().unwrap().dataset.contains("gamma"));
    }
}
