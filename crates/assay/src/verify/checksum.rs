//! Raw partition integrity verification and quarantine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::ChecksumPolicy;
use crate::descriptor::DatasetDescriptor;
use crate::error::{AssayError, Result};
use crate::table::parse_timestamp;

use super::manifest::{hash_file, ChecksumManifest, MANIFEST_FILE};

/// Directory inside a raw partition that receives failing files.
pub const QUARANTINE_DIR: &str = "_quarantine";

/// Outcome of verifying one raw partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    /// Verification was not required for this run.
    pub skipped: bool,
    pub verified: usize,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
    pub quarantined: Vec<PathBuf>,
}

impl VerificationResult {
    fn skipped() -> Self {
        Self {
            valid: true,
            skipped: true,
            ..Self::default()
        }
    }

    /// Convert a failed verification into the fatal integrity error.
    pub fn ensure_valid(&self, partition: &Path) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(AssayError::ChecksumFailed {
                partition: partition.to_path_buf(),
                mismatched: self.mismatched.len(),
                missing: self.missing.len(),
            })
        }
    }
}

/// Checks raw partitions against their checksum manifest.
#[derive(Debug, Clone, Default)]
pub struct ChecksumVerifier {
    policy: ChecksumPolicy,
}

impl ChecksumVerifier {
    pub fn new(policy: ChecksumPolicy) -> Self {
        Self { policy }
    }

    /// Verify a partition. Files that pass are never touched.
    pub fn verify(
        &self,
        partition: &Path,
        descriptor: &DatasetDescriptor,
    ) -> Result<VerificationResult> {
        let required = descriptor.verify_checksums.unwrap_or(self.policy.verify);
        if !required {
            debug!(partition = %partition.display(), "checksum verification disabled");
            return Ok(VerificationResult::skipped());
        }

        let Some(manifest) = ChecksumManifest::load(partition)? else {
            return Err(AssayError::ManifestMissing(partition.join(MANIFEST_FILE)));
        };

        if let Some(window) = self.policy.skip_if_fresh_secs {
            if let Some(age) = manifest_age(partition, &manifest) {
                if age < Duration::from_secs(window) {
                    info!(
                        partition = %partition.display(),
                        age_secs = age.as_secs(),
                        "manifest is fresh, skipping checksum verification"
                    );
                    return Ok(VerificationResult::skipped());
                }
            }
        }

        let mut result = VerificationResult::default();
        for entry in &manifest.files {
            let path = partition.join(&entry.path);
            if !path.is_file() {
                result.missing.push(entry.path.clone());
                continue;
            }

            let size = fs::metadata(&path)
                .map_err(|e| AssayError::io(&path, e))?
                .len();
            if entry.size.is_some_and(|expected| expected != size) {
                result.mismatched.push(entry.path.clone());
                continue;
            }
            if hash_file(&path)? != entry.digest() {
                result.mismatched.push(entry.path.clone());
                continue;
            }
            result.verified += 1;
        }

        result.valid = result.mismatched.is_empty() && result.missing.is_empty();
        if result.valid {
            info!(
                partition = %partition.display(),
                files = result.verified,
                "checksum verification passed"
            );
            return Ok(result);
        }

        warn!(
            partition = %partition.display(),
            mismatched = result.mismatched.len(),
            missing = result.missing.len(),
            "checksum verification failed"
        );
        if self.policy.quarantine {
            result.quarantined = quarantine(partition, &result.mismatched)?;
        }
        Ok(result)
    }
}

/// Age of the manifest: its `created_at`, else the file's mtime.
fn manifest_age(partition: &Path, manifest: &ChecksumManifest) -> Option<Duration> {
    if let Some(created) = manifest.created_at.as_deref().and_then(parse_timestamp) {
        let elapsed = Utc::now().naive_utc() - created.value;
        return elapsed.to_std().ok();
    }
    let modified = fs::metadata(partition.join(MANIFEST_FILE))
        .and_then(|m| m.modified())
        .ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Move failing files under `_quarantine/`, keeping their relative paths.
fn quarantine(partition: &Path, files: &[String]) -> Result<Vec<PathBuf>> {
    let target_root = partition.join(QUARANTINE_DIR);
    let mut moved = Vec::with_capacity(files.len());
    for name in files {
        let source = partition.join(name);
        let target = target_root.join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| AssayError::io(parent, e))?;
        }
        fs::rename(&source, &target).map_err(|e| AssayError::io(&source, e))?;
        warn!(file = %source.display(), to = %target.display(), "quarantined raw file");
        moved.push(target);
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EntityKind;
    use tempfile::TempDir;

    fn descriptor() -> DatasetDescriptor {
        DatasetDescriptor::new("crm", "sales", "orders", EntityKind::Event).with_event_ts("ts")
    }

    fn partition_with_manifest() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("part-0001.csv"), "id,ts\n1,2025-01-01\n").unwrap();
        fs::write(dir.path().join("part-0002.csv"), "id,ts\n2,2025-01-02\n").unwrap();
        ChecksumManifest::build(dir.path())
            .unwrap()
            .save(dir.path())
            .unwrap();
        dir
    }

    #[test]
    fn test_valid_partition_untouched() {
        let dir = partition_with_manifest();
        let verifier = ChecksumVerifier::new(ChecksumPolicy::required());
        let result = verifier.verify(dir.path(), &descriptor()).unwrap();
        assert!(result.valid);
        assert_eq!(result.verified, 2);
        assert!(!dir.path().join(QUARANTINE_DIR).exists());
    }

    #[test]
    fn test_mismatch_is_quarantined() {
        let dir = partition_with_manifest();
        fs::write(dir.path().join("part-0002.csv"), "id,ts\n9,2025-01-09\n").unwrap();
        fs::remove_file(dir.path().join("part-0001.csv")).unwrap();

        let verifier = ChecksumVerifier::new(ChecksumPolicy::required());
        let result = verifier.verify(dir.path(), &descriptor()).unwrap();
        assert!(!result.valid);
        assert_eq!(result.mismatched, vec!["part-0002.csv"]);
        assert_eq!(result.missing, vec!["part-0001.csv"]);
        assert!(dir.path().join(QUARANTINE_DIR).join("part-0002.csv").exists());
        assert!(!dir.path().join("part-0002.csv").exists());

        let err = result.ensure_valid(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            AssayError::ChecksumFailed { mismatched: 1, missing: 1, .. }
        ));
    }

    #[test]
    fn test_fresh_manifest_skips() {
        let dir = partition_with_manifest();
        fs::write(dir.path().join("part-0001.csv"), "tampered").unwrap();
        let policy = ChecksumPolicy::required().with_skip_if_fresh(Duration::from_secs(3600));
        let result = ChecksumVerifier::new(policy)
            .verify(dir.path(), &descriptor())
            .unwrap();
        assert!(result.valid && result.skipped);
    }

    #[test]
    fn test_descriptor_override_and_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let verifier = ChecksumVerifier::new(ChecksumPolicy::default());
        assert!(verifier.verify(dir.path(), &descriptor()).unwrap().skipped);

        let required = descriptor().with_checksum_verification(true);
        let err = verifier.verify(dir.path(), &required).unwrap_err();
        assert!(matches!(err, AssayError::ManifestMissing(_)));
    }
}
