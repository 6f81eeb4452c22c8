//! Error types for the assay library.

use std::path::PathBuf;
use thiserror::Error;

use crate::descriptor::EntityKind;

/// Main error type for assay operations.
#[derive(Debug, Error)]
pub enum AssayError {
    /// Error reading or accessing a file.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error from the CSV library.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regex compilation error.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Columnar (parquet/arrow) encoding error.
    #[error("Columnar format error: {0}")]
    Columnar(String),

    /// File format not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Empty file or no data to curate.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required columns are absent from a table.
    #[error("{context}: missing required column(s) {columns:?}")]
    MissingColumns {
        context: String,
        columns: Vec<String>,
    },

    /// Strict schema mode found columns outside the allow-list.
    #[error("{context}: unexpected column(s) {columns:?} in strict schema mode")]
    UnexpectedColumns {
        context: String,
        columns: Vec<String>,
    },

    /// A table failed a handler or planner precondition.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No pattern handler is registered for an entity kind.
    #[error("No pattern handler registered for entity kind '{0}'")]
    UnregisteredKind(EntityKind),

    /// A second handler was registered for the same entity kind.
    #[error("A pattern handler is already registered for entity kind '{0}'")]
    DuplicateHandler(EntityKind),

    /// Raw partition failed checksum verification.
    #[error(
        "Checksum verification failed for '{partition}': {mismatched} mismatched, {missing} missing"
    )]
    ChecksumFailed {
        partition: PathBuf,
        mismatched: usize,
        missing: usize,
    },

    /// Checksum manifest could not be found when verification was required.
    #[error("Checksum manifest not found at '{0}'")]
    ManifestMissing(PathBuf),

    /// Too many rows with null primary keys.
    #[error(
        "Bad record threshold exceeded for '{label}': {invalid} of {total} rows have null primary keys"
    )]
    BadRecordThreshold {
        label: String,
        invalid: usize,
        total: usize,
    },

    /// A declared join or lookup key is absent from one side.
    #[error("Join source '{source_name}' is missing key column(s) {columns:?}")]
    MissingJoinKeys {
        source_name: String,
        columns: Vec<String>,
    },

    /// Partition lock could not be acquired in time.
    #[error("Timed out after {waited_ms}ms waiting for lock '{path}' held by pid {holder:?}")]
    LockTimeout {
        path: PathBuf,
        waited_ms: u64,
        holder: Option<u32>,
    },

    /// Error persisting or loading an artifact (checkpoint, metadata).
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Failure classes, mirroring how a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing columns, bad descriptors, unregistered kinds. Never retried.
    Configuration,
    /// Checksum mismatches and missing raw files.
    DataIntegrity,
    /// Null primary keys over threshold.
    DataQuality,
    /// Lock acquisition timeout.
    Lock,
    /// Filesystem and encoding failures.
    Io,
}

impl AssayError {
    /// Build an IO error with the offending path attached.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssayError::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            AssayError::Io { .. }
            | AssayError::Csv(_)
            | AssayError::Json(_)
            | AssayError::Columnar(_)
            | AssayError::Persistence(_) => ErrorClass::Io,
            AssayError::ChecksumFailed { .. } | AssayError::ManifestMissing(_) => {
                ErrorClass::DataIntegrity
            }
            AssayError::BadRecordThreshold { .. } => ErrorClass::DataQuality,
            AssayError::LockTimeout { .. } => ErrorClass::Lock,
            AssayError::Regex(_)
            | AssayError::UnsupportedFormat(_)
            | AssayError::EmptyData(_)
            | AssayError::Config(_)
            | AssayError::MissingColumns { .. }
            | AssayError::UnexpectedColumns { .. }
            | AssayError::Validation(_)
            | AssayError::UnregisteredKind(_)
            | AssayError::DuplicateHandler(_)
            | AssayError::MissingJoinKeys { .. } => ErrorClass::Configuration,
        }
    }

    /// Whether a caller may reasonably retry the same run unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Io | ErrorClass::Lock)
    }
}

/// Result type alias for assay operations.
pub type Result<T> = std::result::Result<T, AssayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = AssayError::MissingColumns {
            context: "prepare".to_string(),
            columns: vec!["id".to_string()],
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("\"id\""));

        let err = AssayError::LockTimeout {
            path: PathBuf::from("out/.assay.lock"),
            waited_ms: 100,
            holder: Some(42),
        };
        assert_eq!(err.class(), ErrorClass::Lock);
        assert!(err.is_retryable());

        let err = AssayError::BadRecordThreshold {
            label: "current".to_string(),
            invalid: 1,
            total: 10,
        };
        assert_eq!(err.class(), ErrorClass::DataQuality);
    }
}
