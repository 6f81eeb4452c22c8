//! Streaming promotion: interruption and checkpoint resume.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use assay::checkpoint::{CHECKPOINT_DIR, CheckpointManager};
use assay::streaming::StreamingPromoter;
use assay::writer::{CHUNKS_DIR, DatasetWriter};
use assay::{DatasetDescriptor, EntityKind, HistoryMode, RecordTable, SilverModel, TableReader};

const CHUNKS: &[&str] = &[
    "id,region,ts\n1,east,2025-01-01\n2,west,2025-01-01\n",
    "id,region,ts\n1,north,2025-01-04\n3,south,2025-01-02\n",
    "id,region,ts\n2,west,2025-01-03\n1,stale,2025-01-02\n",
    "id,region,ts\n4,east,2025-01-05\n3,south,2025-01-06\n",
    "id,region,ts\n2,central,2025-01-07\n",
];

fn raw_partition(root: &Path) -> PathBuf {
    let dir = root.join("bronze");
    fs::create_dir_all(&dir).unwrap();
    for (i, content) in CHUNKS.iter().enumerate() {
        fs::write(dir.join(format!("part-{:04}.csv", i + 1)), content).unwrap();
    }
    dir
}

fn descriptor() -> DatasetDescriptor {
    DatasetDescriptor::new("crm", "sales", "accounts", EntityKind::State)
        .with_natural_keys(["id"])
        .with_change_ts("ts")
        .with_history_mode(HistoryMode::Scd2)
}

fn promoter<'a>(
    descriptor: &'a DatasetDescriptor,
    model: SilverModel,
    out: &Path,
) -> StreamingPromoter<'a> {
    let writer = DatasetWriter::new(out).with_primary_keys(descriptor.natural_keys.clone());
    StreamingPromoter::new(descriptor, model, writer, CheckpointManager::new(out, true))
        .with_prefetch(1)
}

fn read(path: &Path) -> RecordTable {
    TableReader::new().read_file(path).expect("Failed to read output")
}

/// Data file names directly under `dir`, sorted.
fn data_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".csv"))
        .collect();
    names.sort();
    names
}

fn assert_resume_matches_uninterrupted(model: SilverModel, budget: usize) {
    let dir = TempDir::new().unwrap();
    let raw = raw_partition(dir.path());
    let desc = descriptor();

    let baseline_out = dir.path().join("baseline");
    let baseline = promoter(&desc, model, &baseline_out).run(&raw).unwrap();
    assert!(baseline.completed);
    assert_eq!(baseline.chunks_processed, CHUNKS.len());

    let resumed_out = dir.path().join("resumed");
    let first = promoter(&desc, model, &resumed_out)
        .with_max_chunks(budget)
        .run(&raw)
        .unwrap();
    assert!(!first.completed);
    assert_eq!(first.chunks_processed, budget);
    assert_eq!(first.checkpoint.as_ref().unwrap().last_chunk, budget as u64);
    assert!(!resumed_out.join("current.csv").exists());

    let resumer = promoter(&desc, model, &resumed_out);
    let second = resumer.run(&raw).unwrap();
    assert!(second.completed);
    assert_eq!(second.chunks_skipped, budget);
    assert_eq!(second.chunks_processed, CHUNKS.len() - budget);
    for file in &second.files {
        let name = file.file_name().unwrap().to_string_lossy();
        if let Some(tag) = name.split("-chunk-").nth(1) {
            let number: usize = tag.trim_end_matches(".csv").parse().unwrap();
            assert!(number > budget, "chunk {} rewritten after resume", number);
        }
    }

    assert_eq!(data_files(&baseline_out), data_files(&resumed_out));
    for name in data_files(&baseline_out) {
        assert_eq!(
            read(&baseline_out.join(&name)),
            read(&resumed_out.join(&name)),
            "{} differs after resume",
            name
        );
    }
    let checkpoints = CheckpointManager::new(&resumed_out, true);
    assert!(checkpoints.load(&resumer.artifact()).unwrap().is_none());
    assert!(resumed_out.join(CHECKPOINT_DIR).exists());
}

#[test]
fn test_scd2_resume_matches_uninterrupted_run() {
    assert_resume_matches_uninterrupted(SilverModel::ScdType2, 2);
}

#[test]
fn test_scd1_resume_matches_uninterrupted_run() {
    assert_resume_matches_uninterrupted(SilverModel::ScdType1, 3);
}

#[test]
fn test_incremental_merge_resume_matches_uninterrupted_run() {
    assert_resume_matches_uninterrupted(SilverModel::IncrementalMerge, 1);
}

#[test]
fn test_final_current_state() {
    let dir = TempDir::new().unwrap();
    let raw = raw_partition(dir.path());
    let desc = descriptor();
    let out = dir.path().join("silver");

    promoter(&desc, SilverModel::ScdType2, &out).run(&raw).unwrap();
    let current = read(&out.join("current.csv"));
    assert_eq!(current.column_by_name("id").unwrap(), vec!["1", "2", "3", "4"]);
    assert_eq!(
        current.column_by_name("region").unwrap(),
        vec!["north", "central", "south", "east"]
    );
}

#[test]
fn test_chunk_metadata_written_per_chunk() {
    let dir = TempDir::new().unwrap();
    let raw = raw_partition(dir.path());
    let desc = descriptor();
    let out = dir.path().join("silver");

    promoter(&desc, SilverModel::IncrementalMerge, &out).run(&raw).unwrap();
    let chunk_dir = out.join(CHUNKS_DIR);
    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(chunk_dir.join("chunk-0002.json")).unwrap())
            .unwrap();
    assert_eq!(record["chunk_tag"], "chunk-0002");
    assert_eq!(record["labels"][0], "cdc");
    assert_eq!(record["record_count"], 2);
    assert_eq!(fs::read_dir(&chunk_dir).unwrap().count(), CHUNKS.len());
}
