//! Run-level configuration shared by every dataset promotion.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AssayError, Result};
use crate::writer::OutputFormat;

/// Configuration for a promotion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Root directory of the Silver layer.
    pub output_root: PathBuf,
    /// File formats each named table is written in.
    pub formats: Vec<OutputFormat>,
    /// Null primary key handling.
    pub error_handling: ErrorHandlingConfig,
    /// Raw partition integrity checks.
    pub checksums: ChecksumPolicy,
    /// Maximum time to wait for a partition lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Interval between lock attempts, in milliseconds.
    pub lock_poll_ms: u64,
    /// Insert a `pattern=<kind>` folder into output paths.
    pub pattern_folders: bool,
    /// Chunked, resumable promotion.
    pub streaming: StreamingConfig,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("silver"),
            formats: vec![OutputFormat::Csv],
            error_handling: ErrorHandlingConfig::default(),
            checksums: ChecksumPolicy::default(),
            lock_timeout_ms: 30_000,
            lock_poll_ms: 100,
            pattern_folders: false,
            streaming: StreamingConfig::default(),
        }
    }
}

impl PromotionConfig {
    /// Create a configuration writing under `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Self::default()
        }
    }

    pub fn with_formats(mut self, formats: Vec<OutputFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_error_handling(mut self, error_handling: ErrorHandlingConfig) -> Self {
        self.error_handling = error_handling;
        self
    }

    pub fn with_checksums(mut self, checksums: ChecksumPolicy) -> Self {
        self.checksums = checksums;
        self
    }

    /// Set lock timeout and poll interval.
    pub fn with_lock_timing(mut self, timeout: Duration, poll: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self.lock_poll_ms = poll.as_millis() as u64;
        self
    }

    pub fn with_pattern_folders(mut self, enabled: bool) -> Self {
        self.pattern_folders = enabled;
        self
    }

    pub fn with_streaming(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.formats.is_empty() {
            return Err(AssayError::Config(
                "at least one output format is required".to_string(),
            ));
        }
        if let Some(percent) = self.error_handling.max_bad_percent {
            if !(0.0..=100.0).contains(&percent) {
                return Err(AssayError::Config(format!(
                    "max_bad_percent must be within 0..=100, got {}",
                    percent
                )));
            }
        }
        if self.streaming.enabled && self.streaming.prefetch == 0 {
            return Err(AssayError::Config(
                "streaming prefetch window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thresholds for rows with null primary keys.
///
/// When enabled, each configured threshold must hold. With no threshold
/// configured, a single invalid row fails the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub enabled: bool,
    pub max_bad_records: Option<usize>,
    pub max_bad_percent: Option<f64>,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bad_records: None,
            max_bad_percent: None,
        }
    }
}

impl ErrorHandlingConfig {
    /// Validation off: null keys are written like any other row.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_bad_records(mut self, max: usize) -> Self {
        self.max_bad_records = Some(max);
        self
    }

    pub fn with_max_bad_percent(mut self, percent: f64) -> Self {
        self.max_bad_percent = Some(percent);
        self
    }

    /// Whether `invalid` bad rows out of `total` are tolerated.
    pub fn allows(&self, invalid: usize, total: usize) -> bool {
        if !self.enabled || invalid == 0 {
            return true;
        }
        if self.max_bad_records.is_none() && self.max_bad_percent.is_none() {
            return false;
        }
        let within_count = self.max_bad_records.is_none_or(|max| invalid <= max);
        let within_percent = self.max_bad_percent.is_none_or(|max| {
            let percent = invalid as f64 * 100.0 / total.max(1) as f64;
            percent <= max
        });
        within_count && within_percent
    }
}

/// When and how raw partitions are checked against their manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumPolicy {
    /// Verify unless a descriptor overrides it.
    pub verify: bool,
    /// Skip verification when the manifest is younger than this many seconds.
    pub skip_if_fresh_secs: Option<u64>,
    /// Move failing files into `_quarantine/`.
    pub quarantine: bool,
}

impl Default for ChecksumPolicy {
    fn default() -> Self {
        Self {
            verify: false,
            skip_if_fresh_secs: None,
            quarantine: true,
        }
    }
}

impl ChecksumPolicy {
    /// Always verify, quarantining failures.
    pub fn required() -> Self {
        Self {
            verify: true,
            ..Self::default()
        }
    }

    pub fn with_skip_if_fresh(mut self, window: Duration) -> Self {
        self.skip_if_fresh_secs = Some(window.as_secs());
        self
    }

    pub fn with_quarantine(mut self, quarantine: bool) -> Self {
        self.quarantine = quarantine;
        self
    }
}

/// Chunked promotion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
    /// Chunks read ahead of the one being processed.
    pub prefetch: usize,
    /// Persist chunk progress so interrupted runs resume.
    pub checkpoints: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefetch: 2,
            checkpoints: true,
        }
    }
}

impl StreamingConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: bool) -> Self {
        self.checkpoints = checkpoints;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_defaults_to_strict() {
        let config = ErrorHandlingConfig::default();
        assert!(config.allows(0, 10));
        assert!(!config.allows(1, 10));
        assert!(ErrorHandlingConfig::disabled().allows(10, 10));
    }

    #[test]
    fn test_thresholds_are_anded() {
        let config = ErrorHandlingConfig::default()
            .with_max_bad_records(5)
            .with_max_bad_percent(10.0);
        assert!(config.allows(5, 100));
        assert!(!config.allows(6, 100));
        assert!(!config.allows(2, 10));

        let count_only = ErrorHandlingConfig::default().with_max_bad_records(0);
        assert!(!count_only.allows(1, 1000));

        let percent_only = ErrorHandlingConfig::default().with_max_bad_percent(50.0);
        assert!(percent_only.allows(5, 10));
        assert!(!percent_only.allows(6, 10));
    }

    #[test]
    fn test_config_deserializes_partial() {
        let json = r#"{"output_root": "/data/silver", "formats": ["csv", "jsonl"],
                       "streaming": {"enabled": true}}"#;
        let config: PromotionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.output_root, PathBuf::from("/data/silver"));
        assert_eq!(config.formats, vec![OutputFormat::Csv, OutputFormat::Jsonl]);
        assert!(config.streaming.enabled);
        assert_eq!(config.streaming.prefetch, 2);
        assert!(config.error_handling.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_formats() {
        let config = PromotionConfig::default().with_formats(Vec::new());
        assert!(config.validate().is_err());
    }
}
