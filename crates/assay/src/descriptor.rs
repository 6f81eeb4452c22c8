//! Dataset descriptors and the vocabulary that classifies a dataset.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::AssayError;

/// Change semantics of a dataset; selects the pattern handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Immutable facts with an event timestamp.
    Event,
    /// Mutable entities observed over time.
    State,
    /// State reconstructed from another dataset.
    DerivedState,
    /// Change events synthesized from successive states.
    DerivedEvent,
}

impl EntityKind {
    /// Every kind, in registration order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Event,
        EntityKind::State,
        EntityKind::DerivedState,
        EntityKind::DerivedEvent,
    ];

    /// Kinds whose primary timestamp is the event timestamp.
    pub fn is_event_like(&self) -> bool {
        matches!(self, EntityKind::Event | EntityKind::DerivedEvent)
    }

    /// Kinds whose primary timestamp is the change timestamp.
    pub fn is_state_like(&self) -> bool {
        matches!(self, EntityKind::State | EntityKind::DerivedState)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::State => "state",
            EntityKind::DerivedState => "derived_state",
            EntityKind::DerivedEvent => "derived_event",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How state history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// Overwrite: one row per key.
    #[default]
    Scd1,
    /// Like SCD1, keeping only the latest observation.
    LatestOnly,
    /// Full history with effective ranges.
    Scd2,
}

/// Silver curation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilverModel {
    PeriodicSnapshot,
    IncrementalMerge,
    FullMergeDedupe,
    ScdType1,
    ScdType2,
}

impl SilverModel {
    /// Default model for a Bronze load pattern.
    pub fn from_load_pattern(pattern: LoadPattern) -> Self {
        match pattern {
            LoadPattern::Full => SilverModel::PeriodicSnapshot,
            LoadPattern::Cdc => SilverModel::IncrementalMerge,
            LoadPattern::CurrentHistory => SilverModel::ScdType2,
        }
    }

    /// Models that collapse rows to one per key before writing.
    pub fn accumulates(&self) -> bool {
        matches!(
            self,
            SilverModel::FullMergeDedupe | SilverModel::ScdType1 | SilverModel::ScdType2
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SilverModel::PeriodicSnapshot => "periodic_snapshot",
            SilverModel::IncrementalMerge => "incremental_merge",
            SilverModel::FullMergeDedupe => "full_merge_dedupe",
            SilverModel::ScdType1 => "scd_type_1",
            SilverModel::ScdType2 => "scd_type_2",
        }
    }
}

impl fmt::Display for SilverModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the Bronze layer captured the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPattern {
    Full,
    Cdc,
    CurrentHistory,
}

impl FromStr for LoadPattern {
    type Err = AssayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "full" | "snapshot" => Ok(LoadPattern::Full),
            "cdc" | "incremental" => Ok(LoadPattern::Cdc),
            "current_history" => Ok(LoadPattern::CurrentHistory),
            other => Err(AssayError::Config(format!("Unknown load pattern: {}", other))),
        }
    }
}

/// Treatment of columns outside the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Extra columns are fatal.
    Strict,
    /// Extra columns are dropped.
    #[default]
    Standard,
    /// Extra columns are kept.
    Permissive,
}

/// How event partitions are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Append,
    /// Each load replaces the day: one event per (keys, event date).
    ReplaceDaily,
}

/// Treatment of rows whose deletion flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Ignore,
    TombstoneState,
    TombstoneEvent,
}

/// Identifies a curated asset and how to curate it. Immutable per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub system: String,
    pub entity: String,
    pub domain: String,
    #[serde(default = "default_version")]
    pub version: u32,

    pub entity_kind: EntityKind,

    #[serde(default)]
    pub natural_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_ts_column: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_ts_column: Option<String>,

    /// Explicit ordering column; wins over timestamps for dedupe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_column: Option<String>,

    #[serde(default)]
    pub history_mode: HistoryMode,

    #[serde(default)]
    pub schema_mode: SchemaMode,

    #[serde(default)]
    pub input_mode: InputMode,

    /// Declared attribute allow-list. Empty means every column is an attribute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_flag_column: Option<String>,

    #[serde(default)]
    pub delete_mode: DeleteMode,

    /// Emit unchanged derived events as `noop`.
    #[serde(default)]
    pub retain_noop_events: bool,

    /// Explicit curation model; otherwise derived from the load pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silver_model: Option<SilverModel>,

    /// Configured partition columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_by: Vec<String>,

    /// Derive partition columns when none are configured.
    #[serde(default = "default_true")]
    pub auto_partition: bool,

    /// Raw -> curated column renames applied while streaming.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub column_mapping: IndexMap<String, String>,

    /// Preferred leading column order applied while streaming.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_order: Vec<String>,

    /// Per-dataset override of the checksum verification flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_checksums: Option<bool>,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl DatasetDescriptor {
    /// Create a descriptor with defaults for everything but identity and kind.
    pub fn new(
        system: impl Into<String>,
        domain: impl Into<String>,
        entity: impl Into<String>,
        entity_kind: EntityKind,
    ) -> Self {
        Self {
            system: system.into(),
            entity: entity.into(),
            domain: domain.into(),
            version: default_version(),
            entity_kind,
            natural_keys: Vec::new(),
            event_ts_column: None,
            change_ts_column: None,
            order_column: None,
            history_mode: HistoryMode::default(),
            schema_mode: SchemaMode::default(),
            input_mode: InputMode::default(),
            attributes: Vec::new(),
            delete_flag_column: None,
            delete_mode: DeleteMode::default(),
            retain_noop_events: false,
            silver_model: None,
            partition_by: Vec::new(),
            auto_partition: true,
            column_mapping: IndexMap::new(),
            column_order: Vec::new(),
            verify_checksums: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_natural_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.natural_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event_ts(mut self, column: impl Into<String>) -> Self {
        self.event_ts_column = Some(column.into());
        self
    }

    pub fn with_change_ts(mut self, column: impl Into<String>) -> Self {
        self.change_ts_column = Some(column.into());
        self
    }

    pub fn with_order_column(mut self, column: impl Into<String>) -> Self {
        self.order_column = Some(column.into());
        self
    }

    pub fn with_history_mode(mut self, mode: HistoryMode) -> Self {
        self.history_mode = mode;
        self
    }

    pub fn with_schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }

    pub fn with_input_mode(mut self, mode: InputMode) -> Self {
        self.input_mode = mode;
        self
    }

    pub fn with_attributes<S: Into<String>>(mut self, attrs: impl IntoIterator<Item = S>) -> Self {
        self.attributes = attrs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the deletion flag column and how flagged rows are treated.
    pub fn with_delete_flag(mut self, column: impl Into<String>, mode: DeleteMode) -> Self {
        self.delete_flag_column = Some(column.into());
        self.delete_mode = mode;
        self
    }

    pub fn with_noop_retention(mut self, retain: bool) -> Self {
        self.retain_noop_events = retain;
        self
    }

    pub fn with_silver_model(mut self, model: SilverModel) -> Self {
        self.silver_model = Some(model);
        self
    }

    pub fn with_partition_by<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.partition_by = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auto_partition(mut self, enabled: bool) -> Self {
        self.auto_partition = enabled;
        self
    }

    pub fn with_column_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.column_mapping.insert(from.into(), to.into());
        self
    }

    pub fn with_column_order<S: Into<String>>(mut self, cols: impl IntoIterator<Item = S>) -> Self {
        self.column_order = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = Some(verify);
        self
    }

    /// Qualified dataset name for logs and catalog reports.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}.v{}", self.system, self.domain, self.entity, self.version)
    }

    /// Change timestamp if configured, else event timestamp.
    pub fn resolved_ts_column(&self) -> Option<&str> {
        self.change_ts_column
            .as_deref()
            .or(self.event_ts_column.as_deref())
    }

    /// Timestamp columns this kind requires.
    pub fn timestamp_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        match self.entity_kind {
            EntityKind::Event => columns.extend(self.event_ts_column.clone()),
            EntityKind::State | EntityKind::DerivedState => {
                columns.extend(self.change_ts_column.clone())
            }
            EntityKind::DerivedEvent => {
                columns.extend(self.event_ts_column.clone());
                columns.extend(self.change_ts_column.clone());
            }
        }
        columns
    }

    /// Model used when none is configured and no load pattern is known.
    pub fn fallback_model(&self) -> SilverModel {
        if self.entity_kind.is_state_like() {
            match self.history_mode {
                HistoryMode::Scd2 => SilverModel::ScdType2,
                HistoryMode::Scd1 | HistoryMode::LatestOnly => SilverModel::ScdType1,
            }
        } else {
            SilverModel::IncrementalMerge
        }
    }

    /// Resolve the curation model: explicit, then load pattern, then fallback.
    pub fn resolve_model(&self, load_pattern: Option<LoadPattern>) -> SilverModel {
        self.silver_model
            .or_else(|| load_pattern.map(SilverModel::from_load_pattern))
            .unwrap_or_else(|| self.fallback_model())
    }

    /// Fail fast on descriptors no handler can curate.
    pub fn validate(&self) -> crate::Result<()> {
        if self.entity.trim().is_empty() || self.domain.trim().is_empty() {
            return Err(AssayError::Config(
                "descriptor requires non-empty 'domain' and 'entity'".to_string(),
            ));
        }
        let needs_ts = match self.entity_kind {
            EntityKind::Event => self.event_ts_column.is_none(),
            _ => self.resolved_ts_column().is_none(),
        };
        if needs_ts {
            return Err(AssayError::Config(format!(
                "{}: entity kind '{}' requires a timestamp column",
                self.qualified_name(),
                self.entity_kind
            )));
        }
        if matches!(self.entity_kind, EntityKind::DerivedEvent) && self.natural_keys.is_empty() {
            return Err(AssayError::Config(format!(
                "{}: derived events require natural keys",
                self.qualified_name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_resolution() {
        let desc = DatasetDescriptor::new("crm", "sales", "accounts", EntityKind::State)
            .with_change_ts("updated_at")
            .with_history_mode(HistoryMode::Scd2);
        assert_eq!(desc.resolve_model(None), SilverModel::ScdType2);
        assert_eq!(
            desc.resolve_model(Some(LoadPattern::Cdc)),
            SilverModel::IncrementalMerge
        );
        let desc = desc.with_silver_model(SilverModel::FullMergeDedupe);
        assert_eq!(
            desc.resolve_model(Some(LoadPattern::Cdc)),
            SilverModel::FullMergeDedupe
        );
    }

    #[test]
    fn test_load_pattern_parse() {
        assert_eq!("full".parse::<LoadPattern>().unwrap(), LoadPattern::Full);
        assert_eq!(
            "current-history".parse::<LoadPattern>().unwrap(),
            LoadPattern::CurrentHistory
        );
        assert!("weekly".parse::<LoadPattern>().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "system": "crm",
            "domain": "sales",
            "entity": "orders",
            "entity_kind": "event",
            "natural_keys": ["order_id"],
            "event_ts_column": "created_at"
        }"#;
        let desc: DatasetDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.version, 1);
        assert!(desc.auto_partition);
        assert_eq!(desc.schema_mode, SchemaMode::Standard);
        assert_eq!(desc.qualified_name(), "crm.sales.orders.v1");
        desc.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_timestamp() {
        let desc = DatasetDescriptor::new("crm", "sales", "orders", EntityKind::Event);
        assert!(desc.validate().is_err());
    }
}
