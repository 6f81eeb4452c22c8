//! Join and lookup configuration.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AssayError, Result};

use super::filter::Filter;

/// How unmatched rows are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    #[default]
    Left,
    Right,
    Outer,
}

/// Role of a source in a multi-source join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    Primary,
    #[default]
    Secondary,
}

/// A primary column paired with the secondary column it joins to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKey {
    pub primary: String,
    pub secondary: String,
}

impl JoinKey {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }

    /// Same column name on both sides.
    pub fn same(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            primary: column.clone(),
            secondary: column,
        }
    }
}

/// One named input of a multi-source join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSource {
    pub name: String,
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub role: SourceRole,
    /// Keys joining this source to the primary. Unused on the primary.
    #[serde(default)]
    pub keys: Vec<JoinKey>,
    /// Columns to keep; empty keeps all.
    #[serde(default)]
    pub select: Vec<String>,
    /// Row filter expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl JoinSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            role: SourceRole::Secondary,
            keys: Vec::new(),
            select: Vec::new(),
            filter: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.role = SourceRole::Primary;
        self
    }

    pub fn with_keys(mut self, keys: Vec<JoinKey>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    pub(crate) fn parsed_filter(&self) -> Result<Option<Filter>> {
        self.filter.as_deref().map(Filter::parse).transpose()
    }
}

/// Multi-source join configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    pub sources: Vec<JoinSource>,
    #[serde(default)]
    pub join_type: JoinType,
}

impl JoinConfig {
    pub fn new(sources: Vec<JoinSource>, join_type: JoinType) -> Self {
        Self { sources, join_type }
    }

    /// Index of the primary source: the one marked primary, else the first.
    pub fn primary_index(&self) -> Result<usize> {
        if self.sources.len() < 2 {
            return Err(AssayError::Config(format!(
                "a join needs at least two sources, got {}",
                self.sources.len()
            )));
        }
        let marked: Vec<usize> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.role == SourceRole::Primary)
            .map(|(i, _)| i)
            .collect();
        match marked.as_slice() {
            [] => Ok(0),
            [only] => Ok(*only),
            _ => Err(AssayError::Config(
                "only one join source may be marked primary".to_string(),
            )),
        }
    }
}

/// Lookup join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupJoin {
    #[default]
    Left,
    Inner,
}

/// One lookup table enriching a primary table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupSpec {
    pub name: String,
    #[serde(default)]
    pub path: PathBuf,
    pub keys: Vec<JoinKey>,
    /// Lookup columns to add; empty adds every non-key column.
    #[serde(default)]
    pub select_columns: Vec<String>,
    /// Lookup column -> output column renames.
    #[serde(default)]
    pub rename: IndexMap<String, String>,
    #[serde(default)]
    pub join_type: LookupJoin,
}

impl LookupSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, keys: Vec<JoinKey>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            keys,
            select_columns: Vec::new(),
            rename: IndexMap::new(),
            join_type: LookupJoin::Left,
        }
    }

    pub fn with_select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.select_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rename.insert(from.into(), to.into());
        self
    }

    pub fn with_join_type(mut self, join_type: LookupJoin) -> Self {
        self.join_type = join_type;
        self
    }
}
