//! Assay: Bronze to Silver curation engine for partitioned tabular datasets.
//!
//! A raw partition is verified against its checksum manifest, prepared
//! against a [`DatasetDescriptor`], curated by the pattern handler for its
//! entity kind (or by an explicit Silver model), and written as named,
//! partitioned output tables.
//!
//! # Core Principles
//!
//! - **Fail fast**: configuration and key defects stop a run before any write
//! - **Value semantics**: each stage consumes a table and hands a new one on
//! - **Resumable**: streaming promotions checkpoint after every chunk
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use assay::{DatasetDescriptor, EntityKind, HistoryMode, Processor, PromotionConfig};
//!
//! let descriptor = DatasetDescriptor::new("crm", "sales", "customers", EntityKind::State)
//!     .with_natural_keys(["customer_id"])
//!     .with_change_ts("updated_at")
//!     .with_history_mode(HistoryMode::Scd2);
//!
//! let processor = Processor::new(descriptor, PromotionConfig::new("silver"));
//! let partition = Path::new("bronze/crm/customers/dt=2025-01-04");
//! let report = processor.run(partition, "2025-01-04").unwrap();
//!
//! println!("Rows written: {}", report.metrics.rows_written);
//! ```

pub mod checkpoint;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod join;
pub mod model;
pub mod patterns;
pub mod pool;
pub mod prepare;
pub mod processor;
pub mod schema;
pub mod streaming;
pub mod table;
pub mod verify;
pub mod writer;

pub use config::{ChecksumPolicy, ErrorHandlingConfig, PromotionConfig, StreamingConfig};
pub use descriptor::{
    DatasetDescriptor, DeleteMode, EntityKind, HistoryMode, InputMode, LoadPattern, SchemaMode,
    SilverModel,
};
pub use error::{AssayError, ErrorClass, Result};
pub use join::{LookupEnricher, MultiSourceJoiner};
pub use patterns::{HandlerRegistry, NamedTables, PatternHandler};
pub use pool::{PromotionJob, promote_all};
pub use processor::{CatalogSink, NoopCatalog, Processor, PromotionReport, RunMetrics};
pub use schema::{ColumnType, SchemaField};
pub use table::{RecordTable, TableReader};
pub use writer::OutputFormat;
