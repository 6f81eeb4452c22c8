//! Sidecar files written by the Bronze layer next to raw data.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::descriptor::LoadPattern;
use crate::error::{AssayError, Result};
use crate::table::list_data_files;

/// File name of the checksum manifest inside a raw partition.
pub const MANIFEST_FILE: &str = "_checksums.json";

/// File name of the run metadata inside a raw partition.
pub const METADATA_FILE: &str = "_metadata.json";

/// One file listed in a checksum manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the partition directory.
    #[serde(alias = "file")]
    pub path: String,
    /// SHA-256 hex digest, optionally prefixed `sha256:`.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ManifestEntry {
    /// Digest without its algorithm prefix, lowercased.
    pub fn digest(&self) -> String {
        let hash = self.hash.trim().to_ascii_lowercase();
        match hash.strip_prefix("sha256:") {
            Some(digest) => digest.to_string(),
            None => hash,
        }
    }
}

/// Checksum manifest produced upstream for a raw partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksumManifest {
    pub files: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
}

impl ChecksumManifest {
    /// Load `_checksums.json` from a partition, if present.
    pub fn load(partition: &Path) -> Result<Option<Self>> {
        let path = partition.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(|e| AssayError::io(&path, e))?;
        let manifest = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to parse manifest '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(manifest))
    }

    /// Hash every data file of a partition.
    pub fn build(partition: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for path in list_data_files(partition)? {
            let size = fs::metadata(&path)
                .map_err(|e| AssayError::io(&path, e))?
                .len();
            let name = path
                .strip_prefix(partition)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            files.push(ManifestEntry {
                path: name,
                hash: format!("sha256:{}", hash_file(&path)?),
                size: Some(size),
            });
        }
        Ok(Self {
            files,
            created_at: Some(Utc::now().to_rfc3339()),
            metadata: IndexMap::new(),
        })
    }

    /// Write the manifest as `_checksums.json` into the partition.
    pub fn save(&self, partition: &Path) -> Result<()> {
        save_json(&partition.join(MANIFEST_FILE), self)
    }
}

/// Run metadata describing how a raw partition was captured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub record_count: Option<u64>,
    #[serde(default)]
    pub chunk_count: Option<u64>,
    #[serde(default)]
    pub load_pattern: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, Value>,
}

impl RunMetadata {
    /// Load `_metadata.json` from a partition, if present.
    pub fn load(partition: &Path) -> Result<Option<Self>> {
        let path = partition.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(|e| AssayError::io(&path, e))?;
        let metadata = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AssayError::Persistence(format!(
                "Failed to parse run metadata '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(metadata))
    }

    pub fn save(&self, partition: &Path) -> Result<()> {
        save_json(&partition.join(METADATA_FILE), self)
    }

    /// The recorded load pattern, if it names a known one.
    pub fn pattern(&self) -> Option<LoadPattern> {
        self.load_pattern.as_deref()?.parse().ok()
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        AssayError::Persistence(format!(
            "Failed to create file '{}': {}",
            path.display(),
            e
        ))
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|e| {
        AssayError::Persistence(format!("Failed to serialize '{}': {}", path.display(), e))
    })
}

/// SHA-256 of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| AssayError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| AssayError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
