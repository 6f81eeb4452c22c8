//! Per-artifact chunk progress markers for resumable promotion.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AssayError, Result};
use crate::table::sanitize_path_token;

/// Directory under the output partition holding checkpoint files.
pub const CHECKPOINT_DIR: &str = "_checkpoints";

/// Last completed chunk for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub artifact: String,
    pub last_chunk: u64,
    pub total_records: u64,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: IndexMap<String, Value>,
}

/// Saves, loads, and clears checkpoint records.
///
/// A disabled manager never touches the filesystem.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    enabled: bool,
}

impl CheckpointManager {
    /// Manager for the output partition at `output_dir`.
    pub fn new(output_dir: &Path, enabled: bool) -> Self {
        Self {
            dir: output_dir.join(CHECKPOINT_DIR),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn path_for(&self, artifact: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_path_token(artifact)))
    }

    /// Record `last_chunk` as done, replacing the previous record atomically.
    pub fn save(
        &self,
        artifact: &str,
        last_chunk: u64,
        total_records: u64,
        metadata: IndexMap<String, Value>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to create directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let record = CheckpointRecord {
            artifact: artifact.to_string(),
            last_chunk,
            total_records,
            timestamp: Utc::now().to_rfc3339(),
            metadata,
        };
        let path = self.path_for(artifact);
        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).map_err(|e| {
                AssayError::Persistence(format!(
                    "Failed to create file '{}': {}",
                    tmp.display(),
                    e
                ))
            })?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &record).map_err(|e| {
                AssayError::Persistence(format!("Failed to serialize checkpoint: {}", e))
            })?;
            writer.flush().map_err(|e| AssayError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| AssayError::io(&path, e))?;
        debug!(artifact, last_chunk, total_records, "checkpoint saved");
        Ok(())
    }

    pub fn load(&self, artifact: &str) -> Result<Option<CheckpointRecord>> {
        if !self.enabled {
            return Ok(None);
        }
        let path = self.path_for(artifact);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to open file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let record = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to parse checkpoint '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(record))
    }

    /// Whether `chunk` was completed by an earlier run.
    pub fn should_skip(&self, artifact: &str, chunk: u64) -> Result<bool> {
        Ok(self
            .load(artifact)?
            .is_some_and(|record| chunk <= record.last_chunk))
    }

    pub fn clear(&self, artifact: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.path_for(artifact);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AssayError::io(&path, e)),
        }
    }

    /// Remove every checkpoint of this partition.
    pub fn clear_all(&self) -> Result<()> {
        if !self.enabled || !self.dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.dir).map_err(|e| AssayError::io(&self.dir, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_skip_clear() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path(), true);
        assert!(!manager.should_skip("orders", 1).unwrap());

        manager.save("orders", 3, 300, IndexMap::new()).unwrap();
        let record = manager.load("orders").unwrap().unwrap();
        assert_eq!(record.last_chunk, 3);
        assert_eq!(record.total_records, 300);
        assert!(manager.should_skip("orders", 3).unwrap());
        assert!(!manager.should_skip("orders", 4).unwrap());
        assert!(!dir.path().join(CHECKPOINT_DIR).join("orders.json.tmp").exists());

        manager.clear("orders").unwrap();
        assert!(manager.load("orders").unwrap().is_none());
        manager.clear("orders").unwrap();
    }

    #[test]
    fn test_clear_all() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path(), true);
        manager.save("a", 1, 1, IndexMap::new()).unwrap();
        manager.save("b", 2, 2, IndexMap::new()).unwrap();
        manager.clear_all().unwrap();
        assert!(!dir.path().join(CHECKPOINT_DIR).exists());
    }

    #[test]
    fn test_disabled_is_noop() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path(), false);
        manager.save("orders", 5, 10, IndexMap::new()).unwrap();
        assert!(!dir.path().join(CHECKPOINT_DIR).exists());
        assert!(manager.load("orders").unwrap().is_none());
        assert!(!manager.should_skip("orders", 1).unwrap());
    }
}
