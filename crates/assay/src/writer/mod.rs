//! Persistence of named output tables.

mod dataset;
mod format;
mod lock;

pub use dataset::{CHUNKS_DIR, ChunkMetadata, DatasetWriter, ERRORS_DIR, WriteOutcome};
pub use format::OutputFormat;
pub use lock::{LOCK_FILE, PartitionLock};
