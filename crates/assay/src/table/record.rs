//! In-memory tabular batch.

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{AssayError, Result};

use super::value::{compare_values, is_null_value};

/// Row-major table of string cells.
///
/// Missing values are stored as empty strings. Every row has exactly
/// `headers.len()` cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTable {
    /// Column headers.
    pub headers: Vec<String>,
    /// Row data (row-major order).
    pub rows: Vec<Vec<String>>,
}

impl RecordTable {
    /// Create a new table, padding or truncating rows to the header width.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    /// Create a table with columns but no rows.
    pub fn empty(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Build a table from string slices.
    pub fn from_rows(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    /// Get the number of columns.
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Get the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Resolve column names to indices, failing with every missing name.
    pub fn require_columns(&self, names: &[String], context: &str) -> Result<Vec<usize>> {
        let mut indices = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.column_index(name) {
                Some(idx) => indices.push(idx),
                None => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(indices)
        } else {
            Err(AssayError::MissingColumns {
                context: context.to_string(),
                columns: missing,
            })
        }
    }

    /// Get all values for a column by index.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(|s| s.as_str()).unwrap_or(""))
    }

    /// Get a column by name.
    pub fn column_by_name(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.column_index(name)?;
        Some(self.column_values(index).collect())
    }

    /// Get a specific cell value.
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(col).map(|s| s.as_str()))
    }

    /// Get a cell by row index and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        self.get(row, self.column_index(column)?)
    }

    /// Overwrite a single cell. Out-of-range positions are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: String) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = value;
        }
    }

    /// Add a column filled with `default`, returning its index.
    ///
    /// An existing column of the same name is left untouched.
    pub fn add_column(&mut self, name: impl Into<String>, default: &str) -> usize {
        let name = name.into();
        if let Some(idx) = self.column_index(&name) {
            return idx;
        }
        self.headers.push(name);
        for row in &mut self.rows {
            row.push(default.to_string());
        }
        self.headers.len() - 1
    }

    /// Set (or append) a column from per-row values.
    pub fn with_column(mut self, name: &str, values: Vec<String>) -> Self {
        let idx = self.add_column(name, "");
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
        self
    }

    /// Keep only the named columns, in the given order.
    pub fn select(self, names: &[String]) -> Result<Self> {
        let indices = self.require_columns(names, "select")?;
        let rows = self
            .rows
            .into_iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Self {
            headers: names.to_vec(),
            rows,
        })
    }

    /// Remove the named columns; names that are absent are ignored.
    pub fn drop_columns(self, names: &[String]) -> Self {
        let keep: Vec<String> = self
            .headers
            .iter()
            .filter(|h| !names.contains(h))
            .cloned()
            .collect();
        if keep.len() == self.headers.len() {
            return self;
        }
        let keep_idx: Vec<usize> = keep
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();
        let rows = self
            .rows
            .into_iter()
            .map(|row| keep_idx.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Self {
            headers: keep,
            rows,
        }
    }

    /// Rename columns by an old -> new mapping.
    pub fn rename_columns(mut self, mapping: &IndexMap<String, String>) -> Self {
        for header in &mut self.headers {
            if let Some(new_name) = mapping.get(header.as_str()) {
                *header = new_name.clone();
            }
        }
        self
    }

    /// Move the listed columns to the front, in order. Unlisted columns keep
    /// their relative order after them; unknown names are ignored.
    pub fn reorder(self, order: &[String]) -> Self {
        let mut headers: Vec<String> = order
            .iter()
            .filter(|name| self.has_column(name))
            .cloned()
            .collect();
        for header in &self.headers {
            if !headers.contains(header) {
                headers.push(header.clone());
            }
        }
        self.align_to(&headers)
    }

    /// Project rows onto `headers` by name; absent columns become empty.
    pub fn align_to(self, headers: &[String]) -> Self {
        if self.headers == headers {
            return self;
        }
        let positions: Vec<Option<usize>> =
            headers.iter().map(|name| self.column_index(name)).collect();
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|pos| pos.map(|i| row[i].clone()).unwrap_or_default())
                    .collect()
            })
            .collect();
        Self {
            headers: headers.to_vec(),
            rows,
        }
    }

    /// Append another table, unioning columns by name.
    pub fn concat(self, other: RecordTable) -> Self {
        if self.headers.is_empty() && self.rows.is_empty() {
            return other;
        }
        let mut headers = self.headers.clone();
        for header in &other.headers {
            if !headers.contains(header) {
                headers.push(header.clone());
            }
        }
        let mut combined = self.align_to(&headers);
        let other = other.align_to(&headers);
        combined.rows.extend(other.rows);
        combined
    }

    /// Keep rows matching a predicate.
    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&[String]) -> bool,
    {
        let rows = self.rows.into_iter().filter(|row| predicate(row)).collect();
        Self {
            headers: self.headers,
            rows,
        }
    }

    /// Copy the rows at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            headers: self.headers.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Stable ascending sort on the given column indices.
    pub fn sort_by_columns(mut self, columns: &[usize]) -> Self {
        self.rows.sort_by(|a, b| compare_rows(a, b, columns));
        self
    }

    /// Key tuple for one row.
    pub fn key_of(&self, row: usize, key_columns: &[usize]) -> Vec<String> {
        key_columns
            .iter()
            .map(|&c| self.get(row, c).unwrap_or("").to_string())
            .collect()
    }

    /// Whether any key cell of the row is null.
    pub fn has_null_key(&self, row: usize, key_columns: &[usize]) -> bool {
        key_columns
            .iter()
            .any(|&c| is_null_value(self.get(row, c).unwrap_or("")))
    }

    /// Row indices grouped by key tuple, groups in first-seen order.
    pub fn group_indices(&self, key_columns: &[usize]) -> IndexMap<Vec<String>, Vec<usize>> {
        let mut groups: IndexMap<Vec<String>, Vec<usize>> = IndexMap::new();
        for row in 0..self.rows.len() {
            groups
                .entry(self.key_of(row, key_columns))
                .or_default()
                .push(row);
        }
        groups
    }

    /// Keep the last row per key tuple, preserving row order of survivors.
    ///
    /// Returns the reduced table and the number of rows removed.
    pub fn dedupe_keep_last(self, key_columns: &[usize]) -> (Self, usize) {
        if key_columns.is_empty() {
            return (self, 0);
        }
        let mut last: HashMap<Vec<String>, usize> = HashMap::with_capacity(self.rows.len());
        for row in 0..self.rows.len() {
            last.insert(self.key_of(row, key_columns), row);
        }
        let before = self.rows.len();
        let keys: Vec<Vec<String>> = (0..before).map(|r| self.key_of(r, key_columns)).collect();
        let rows: Vec<Vec<String>> = self
            .rows
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| last.get(&keys[*idx]) == Some(idx))
            .map(|(_, row)| row)
            .collect();
        let removed = before - rows.len();
        (
            Self {
                headers: self.headers,
                rows,
            },
            removed,
        )
    }

    /// Rows as ordered column -> value maps.
    pub fn to_records(&self) -> Vec<IndexMap<String, String>> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Compare two rows column by column.
///
/// Values that compare equal but differ as text (`2134` and `02134`) are
/// ordered by their text, so rows sharing a raw key tuple stay adjacent.
fn compare_rows(a: &[String], b: &[String], columns: &[usize]) -> Ordering {
    for &c in columns {
        let ordering = compare_values(&a[c], &b[c]).then_with(|| a[c].cmp(&b[c]));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RecordTable {
        RecordTable::from_rows(
            &["id", "region", "ts"],
            &[
                &["2", "west", "2025-01-02"],
                &["1", "east", "2025-01-03"],
                &["1", "east", "2025-01-01"],
                &["10", "north", "2025-01-01"],
            ],
        )
    }

    #[test]
    fn test_sort_is_numeric_aware_and_stable() {
        let table = sample();
        let id = table.column_index("id").unwrap();
        let sorted = table.sort_by_columns(&[id]);
        let ids: Vec<&str> = sorted.column_values(id).collect();
        assert_eq!(ids, vec!["1", "1", "2", "10"]);
        assert_eq!(sorted.get(0, 2), Some("2025-01-03"));
    }

    #[test]
    fn test_sort_keeps_textually_distinct_keys_apart() {
        let table = RecordTable::from_rows(
            &["id", "ts"],
            &[
                &["2134", "2025-01-01"],
                &["02134", "2025-01-02"],
                &["2134", "2025-01-03"],
            ],
        );
        let sorted = table.sort_by_columns(&[0, 1]);
        let ids: Vec<&str> = sorted.column_values(0).collect();
        assert_eq!(ids, vec!["02134", "2134", "2134"]);
    }

    #[test]
    fn test_dedupe_keep_last() {
        let table = sample();
        let id = table.column_index("id").unwrap();
        let (deduped, removed) = table.dedupe_keep_last(&[id]);
        assert_eq!(removed, 1);
        assert_eq!(deduped.row_count(), 3);
        assert_eq!(deduped.value(1, "ts"), Some("2025-01-01"));
    }

    #[test]
    fn test_select_missing_column() {
        let err = sample()
            .select(&["id".to_string(), "nope".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            AssayError::MissingColumns { columns, .. } if columns == vec!["nope"]
        ));
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = RecordTable::from_rows(&["id", "x"], &[&["1", "a"]]);
        let b = RecordTable::from_rows(&["y", "id"], &[&["b", "2"]]);
        let combined = a.concat(b);
        assert_eq!(combined.headers, vec!["id", "x", "y"]);
        assert_eq!(combined.rows[1], vec!["2", "", "b"]);
    }

    #[test]
    fn test_reorder_and_rename() {
        let mut mapping = IndexMap::new();
        mapping.insert("region".to_string(), "area".to_string());
        let table = sample()
            .rename_columns(&mapping)
            .reorder(&["ts".to_string(), "missing".to_string()]);
        assert_eq!(table.headers, vec!["ts", "id", "area"]);
        assert_eq!(table.value(0, "area"), Some("west"));
    }

    #[test]
    fn test_group_indices_first_seen_order() {
        let table = sample();
        let groups = table.group_indices(&[0]);
        let keys: Vec<&str> = groups.keys().map(|k| k[0].as_str()).collect();
        assert_eq!(keys, vec!["2", "1", "10"]);
        assert_eq!(groups[&vec!["1".to_string()]], vec![1, 2]);
    }
}
