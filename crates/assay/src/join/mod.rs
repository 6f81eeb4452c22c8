//! Composing curated tables: multi-source joins and lookup enrichment.

mod config;
mod filter;
mod joiner;
mod lookup;

pub use config::{JoinConfig, JoinKey, JoinSource, JoinType, LookupJoin, LookupSpec, SourceRole};
pub use filter::{Filter, FilterOp};
pub use joiner::{JoinResult, JoinStats, JoinStep, MultiSourceJoiner};
pub use lookup::{EnrichmentResult, LookupEnricher, LookupStats};
