//! Integrity checks for raw partitions.

mod checksum;
mod manifest;

pub use checksum::{ChecksumVerifier, QUARANTINE_DIR, VerificationResult};
pub use manifest::{
    ChecksumManifest, MANIFEST_FILE, METADATA_FILE, ManifestEntry, RunMetadata, hash_file,
};
