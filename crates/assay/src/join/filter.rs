//! Row filters of the form `<column> <op> <literal>`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AssayError, Result};
use crate::table::{RecordTable, compare_values, is_null_value};

// =============================================================================
// LAZY STATIC PATTERNS
// =============================================================================

static COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(==|!=|>=|<=|>|<)\s*(.*?)\s*$").unwrap()
});

static NULL_CHECK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z_][A-Za-z0-9_.]*)\s+is\s+(not\s+)?null\s*$").unwrap()
});

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(String),
    Ne(String),
    Gt(String),
    Ge(String),
    Lt(String),
    Le(String),
    IsNull,
    IsNotNull,
}

/// A single-column row predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

impl Filter {
    /// Parse an expression such as `status == 'active'` or `deleted_at is null`.
    pub fn parse(expression: &str) -> Result<Self> {
        if let Some(caps) = NULL_CHECK.captures(expression) {
            let op = if caps.get(2).is_some() {
                FilterOp::IsNotNull
            } else {
                FilterOp::IsNull
            };
            return Ok(Self {
                column: caps[1].to_string(),
                op,
            });
        }

        let caps = COMPARISON.captures(expression).ok_or_else(|| {
            AssayError::Config(format!("Invalid filter expression: '{}'", expression))
        })?;
        let literal = unquote(&caps[3]);
        if literal.is_empty() && caps[3].trim().is_empty() {
            return Err(AssayError::Config(format!(
                "Filter '{}' is missing a literal",
                expression
            )));
        }
        let op = match &caps[2] {
            "==" => FilterOp::Eq(literal),
            "!=" => FilterOp::Ne(literal),
            ">" => FilterOp::Gt(literal),
            ">=" => FilterOp::Ge(literal),
            "<" => FilterOp::Lt(literal),
            _ => FilterOp::Le(literal),
        };
        Ok(Self {
            column: caps[1].to_string(),
            op,
        })
    }

    /// Whether a cell value satisfies the predicate.
    pub fn matches(&self, value: &str) -> bool {
        let cmp = |literal: &str| compare_values(value, literal);
        match &self.op {
            FilterOp::IsNull => is_null_value(value),
            FilterOp::IsNotNull => !is_null_value(value),
            // Ordering comparisons never match a missing value.
            _ if is_null_value(value) => matches!(&self.op, FilterOp::Ne(l) if !l.is_empty()),
            FilterOp::Eq(l) => cmp(l) == Ordering::Equal,
            FilterOp::Ne(l) => cmp(l) != Ordering::Equal,
            FilterOp::Gt(l) => cmp(l) == Ordering::Greater,
            FilterOp::Ge(l) => cmp(l) != Ordering::Less,
            FilterOp::Lt(l) => cmp(l) == Ordering::Less,
            FilterOp::Le(l) => cmp(l) != Ordering::Greater,
        }
    }

    /// Keep matching rows.
    pub fn apply(&self, table: RecordTable) -> Result<RecordTable> {
        let idx = table.require_columns(std::slice::from_ref(&self.column), "filter")?[0];
        Ok(table.filter(|row| self.matches(&row[idx])))
    }
}

impl FromStr for Filter {
    type Err = AssayError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            FilterOp::Eq(l) => write!(f, "{} == '{}'", self.column, l),
            FilterOp::Ne(l) => write!(f, "{} != '{}'", self.column, l),
            FilterOp::Gt(l) => write!(f, "{} > '{}'", self.column, l),
            FilterOp::Ge(l) => write!(f, "{} >= '{}'", self.column, l),
            FilterOp::Lt(l) => write!(f, "{} < '{}'", self.column, l),
            FilterOp::Le(l) => write!(f, "{} <= '{}'", self.column, l),
            FilterOp::IsNull => write!(f, "{} is null", self.column),
            FilterOp::IsNotNull => write!(f, "{} is not null", self.column),
        }
    }
}

/// Strip one layer of matching single or double quotes.
fn unquote(literal: &str) -> String {
    let trimmed = literal.trim();
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}
