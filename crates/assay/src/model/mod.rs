//! Silver curation models.

mod planner;

pub use planner::{CDC_LABEL, CURRENT_LABEL, FULL_SNAPSHOT_LABEL, HISTORY_LABEL, ModelPlanner};
