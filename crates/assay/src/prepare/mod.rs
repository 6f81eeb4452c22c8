//! Raw table preparation and partition resolution.

mod partition;
mod preparer;

pub use partition::{EVENT_DATE_COLUMN, PartitionPlan};
pub use preparer::{
    DEFAULT_DELETE_FLAGS, DataPreparer, METADATA_COLUMNS, METADATA_PREFIX, PreparedTable,
};
