//! Multi-source joins with column provenance and row-count statistics.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AssayError, Result};
use crate::table::{RecordTable, TableReader};

use super::config::{JoinConfig, JoinKey, JoinSource, JoinType};

/// Row counts around one merge step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinStep {
    pub source: String,
    pub rows_before: usize,
    pub source_rows: usize,
    pub rows_after: usize,
}

impl JoinStep {
    /// Output rows per accumulator row going into this step.
    pub fn expansion_factor(&self) -> f64 {
        ratio(self.rows_after, self.rows_before)
    }
}

/// Statistics for a whole join.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinStats {
    pub primary: String,
    pub primary_rows: usize,
    pub result_rows: usize,
    pub steps: Vec<JoinStep>,
}

impl JoinStats {
    pub fn expansion_factor(&self) -> f64 {
        ratio(self.result_rows, self.primary_rows)
    }
}

fn ratio(after: usize, before: usize) -> f64 {
    if before == 0 {
        if after == 0 { 1.0 } else { after as f64 }
    } else {
        after as f64 / before as f64
    }
}

/// Joined table plus where each of its columns came from.
#[derive(Debug, Clone)]
pub struct JoinResult {
    pub table: RecordTable,
    /// Output column -> source name.
    pub provenance: IndexMap<String, String>,
    pub stats: JoinStats,
}

/// Loads and merges the sources of a [`JoinConfig`].
///
/// Any missing key column fails the whole join.
#[derive(Debug, Default)]
pub struct MultiSourceJoiner {
    reader: TableReader,
}

impl MultiSourceJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reader(reader: TableReader) -> Self {
        Self { reader }
    }

    /// Load every source from its path and join them.
    pub fn join(&self, config: &JoinConfig) -> Result<JoinResult> {
        let mut tables = IndexMap::new();
        for source in &config.sources {
            let table = self.reader.read_path(&source.path)?;
            tables.insert(source.name.clone(), table);
        }
        self.join_tables(config, tables)
    }

    /// Join already-loaded tables, looked up by source name.
    pub fn join_tables(
        &self,
        config: &JoinConfig,
        mut tables: IndexMap<String, RecordTable>,
    ) -> Result<JoinResult> {
        let primary_idx = config.primary_index()?;
        let primary = &config.sources[primary_idx];

        let mut take = |source: &JoinSource| {
            tables.shift_remove(&source.name).ok_or_else(|| {
                AssayError::Config(format!("No table supplied for join source '{}'", source.name))
            })
        };

        // Keys may name columns a later secondary contributes, so the primary
        // only keeps the ones it has; the rest are checked at merge time.
        let primary_table = take(primary)?;
        let primary_keys: Vec<String> = config
            .sources
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != primary_idx)
            .flat_map(|(_, s)| s.keys.iter().map(|k| k.primary.clone()))
            .filter(|k| primary_table.has_column(k))
            .collect();
        let mut acc = shape_source(primary, primary_table, &primary_keys)?;
        let mut provenance: IndexMap<String, String> = acc
            .headers
            .iter()
            .map(|h| (h.clone(), primary.name.clone()))
            .collect();
        let mut stats = JoinStats {
            primary: primary.name.clone(),
            primary_rows: acc.row_count(),
            ..JoinStats::default()
        };

        for (i, source) in config.sources.iter().enumerate() {
            if i == primary_idx {
                continue;
            }
            if source.keys.is_empty() {
                return Err(AssayError::Config(format!(
                    "Join source '{}' declares no keys",
                    source.name
                )));
            }
            let secondary_keys: Vec<String> =
                source.keys.iter().map(|k| k.secondary.clone()).collect();
            let secondary = shape_source(source, take(source)?, &secondary_keys)?;
            let secondary = rename_keys(secondary, &source.keys);

            let key_names: Vec<String> = source.keys.iter().map(|k| k.primary.clone()).collect();
            let missing: Vec<String> = key_names
                .iter()
                .filter(|k| !acc.has_column(k))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(AssayError::MissingJoinKeys {
                    source_name: primary.name.clone(),
                    columns: missing,
                });
            }

            let rows_before = acc.row_count();
            let source_rows = secondary.row_count();
            let (merged, added) =
                merge_on_keys(acc, secondary, &key_names, config.join_type, &source.name);
            for column in added {
                provenance.insert(column, source.name.clone());
            }
            acc = merged;

            let step = JoinStep {
                source: source.name.clone(),
                rows_before,
                source_rows,
                rows_after: acc.row_count(),
            };
            debug!(
                source = %step.source,
                rows_before,
                rows_after = step.rows_after,
                expansion = step.expansion_factor(),
                "join step merged"
            );
            stats.steps.push(step);
        }

        stats.result_rows = acc.row_count();
        info!(
            primary = %stats.primary,
            sources = config.sources.len(),
            rows = stats.result_rows,
            join_type = ?config.join_type,
            "multi-source join complete"
        );
        Ok(JoinResult {
            table: acc,
            provenance,
            stats,
        })
    }
}

/// Check keys, then apply the source's filter and projection.
fn shape_source(source: &JoinSource, table: RecordTable, keys: &[String]) -> Result<RecordTable> {
    let missing: Vec<String> = keys
        .iter()
        .filter(|k| !table.has_column(k))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(AssayError::MissingJoinKeys {
            source_name: source.name.clone(),
            columns: missing,
        });
    }

    let table = match source.parsed_filter()? {
        Some(filter) => filter.apply(table)?,
        None => table,
    };
    if source.select.is_empty() {
        return Ok(table);
    }
    let mut columns: Vec<String> = Vec::new();
    for key in keys {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    for column in &source.select {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }
    table.select(&columns)
}

fn rename_keys(table: RecordTable, keys: &[JoinKey]) -> RecordTable {
    let mapping: IndexMap<String, String> = keys
        .iter()
        .filter(|k| k.primary != k.secondary)
        .map(|k| (k.secondary.clone(), k.primary.clone()))
        .collect();
    if mapping.is_empty() {
        table
    } else {
        table.rename_columns(&mapping)
    }
}

/// Hash-join `right` onto `left` by same-named key columns.
///
/// Returns the merged table and the names of the columns `right` contributed.
/// Rows with a null key cell never match.
pub(crate) fn merge_on_keys(
    left: RecordTable,
    right: RecordTable,
    keys: &[String],
    join_type: JoinType,
    source_name: &str,
) -> (RecordTable, Vec<String>) {
    let left_key_idx: Vec<usize> = keys.iter().filter_map(|k| left.column_index(k)).collect();
    let right_key_idx: Vec<usize> = keys.iter().filter_map(|k| right.column_index(k)).collect();

    let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();
    let right_value_idx: Vec<usize> = (0..right.column_count())
        .filter(|i| !key_set.contains(right.headers[*i].as_str()))
        .collect();

    let mut headers = left.headers.clone();
    let mut added = Vec::with_capacity(right_value_idx.len());
    for &i in &right_value_idx {
        let mut name = right.headers[i].clone();
        if headers.contains(&name) {
            name = format!("{}_{}", name, source_name);
        }
        headers.push(name.clone());
        added.push(name);
    }

    let mut index: IndexMap<Vec<String>, Vec<usize>> = IndexMap::new();
    for row in 0..right.row_count() {
        if right.has_null_key(row, &right_key_idx) {
            continue;
        }
        index
            .entry(right.key_of(row, &right_key_idx))
            .or_default()
            .push(row);
    }

    let keep_unmatched_left = matches!(join_type, JoinType::Left | JoinType::Outer);
    let keep_unmatched_right = matches!(join_type, JoinType::Right | JoinType::Outer);
    let mut right_matched = vec![false; right.row_count()];
    let mut rows = Vec::with_capacity(left.row_count());

    for (row_idx, row) in left.rows.iter().enumerate() {
        let matches = if left.has_null_key(row_idx, &left_key_idx) {
            None
        } else {
            index.get(&left.key_of(row_idx, &left_key_idx))
        };
        match matches {
            Some(hits) => {
                for &hit in hits {
                    right_matched[hit] = true;
                    let mut out = row.clone();
                    out.extend(right_value_idx.iter().map(|&i| right.rows[hit][i].clone()));
                    rows.push(out);
                }
            }
            None if keep_unmatched_left => {
                let mut out = row.clone();
                out.resize(headers.len(), String::new());
                rows.push(out);
            }
            None => {}
        }
    }

    if keep_unmatched_right {
        for (hit, matched) in right_matched.iter().enumerate() {
            if *matched {
                continue;
            }
            let mut out = vec![String::new(); left.column_count()];
            for (&l, &r) in left_key_idx.iter().zip(&right_key_idx) {
                out[l] = right.rows[hit][r].clone();
            }
            out.extend(right_value_idx.iter().map(|&i| right.rows[hit][i].clone()));
            rows.push(out);
        }
    }

    (RecordTable::new(headers, rows), added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::config::JoinSource;

    fn customers() -> RecordTable {
        RecordTable::from_rows(
            &["customer_id", "name"],
            &[&["1", "Ada"], &["2", "Grace"], &["3", "Linus"]],
        )
    }

    fn orders() -> RecordTable {
        RecordTable::from_rows(
            &["cust", "order_id", "name"],
            &[&["1", "o1", "first"], &["1", "o2", "second"], &["4", "o3", "orphan"]],
        )
    }

    fn config(join_type: JoinType) -> JoinConfig {
        JoinConfig::new(
            vec![
                JoinSource::new("customers", "customers.csv"),
                JoinSource::new("orders", "orders.csv")
                    .with_keys(vec![JoinKey::new("customer_id", "cust")]),
            ],
            join_type,
        )
    }

    fn tables() -> IndexMap<String, RecordTable> {
        IndexMap::from([
            ("customers".to_string(), customers()),
            ("orders".to_string(), orders()),
        ])
    }

    #[test]
    fn test_inner_join_with_suffix_and_provenance() {
        let result = MultiSourceJoiner::new()
            .join_tables(&config(JoinType::Inner), tables())
            .unwrap();
        assert_eq!(
            result.table.headers,
            vec!["customer_id", "name", "order_id", "name_orders"]
        );
        assert_eq!(result.table.row_count(), 2);
        assert_eq!(result.provenance["name"], "customers");
        assert_eq!(result.provenance["name_orders"], "orders");
        assert_eq!(result.stats.primary_rows, 3);
        assert!((result.stats.expansion_factor() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_join_types() {
        let joiner = MultiSourceJoiner::new();
        let left = joiner.join_tables(&config(JoinType::Left), tables()).unwrap();
        assert_eq!(left.table.row_count(), 4);

        let right = joiner.join_tables(&config(JoinType::Right), tables()).unwrap();
        assert_eq!(right.table.row_count(), 3);
        let orphan = right.table.rows.last().unwrap();
        assert_eq!(orphan[0], "4");
        assert_eq!(orphan[1], "");

        let outer = joiner.join_tables(&config(JoinType::Outer), tables()).unwrap();
        assert_eq!(outer.table.row_count(), 5);
    }

    #[test]
    fn test_missing_key_fails_whole_join() {
        let mut bad = config(JoinType::Inner);
        bad.sources[1].keys = vec![JoinKey::new("customer_id", "nope")];
        let err = MultiSourceJoiner::new()
            .join_tables(&bad, tables())
            .unwrap_err();
        assert!(matches!(
            err,
            AssayError::MissingJoinKeys { ref source_name, .. } if source_name == "orders"
        ));

        let mut bad = config(JoinType::Inner);
        bad.sources[1].keys = vec![JoinKey::new("nope", "cust")];
        assert!(MultiSourceJoiner::new().join_tables(&bad, tables()).is_err());
    }

    #[test]
    fn test_filter_and_projection() {
        let mut cfg = config(JoinType::Left);
        cfg.sources[1] = cfg.sources[1]
            .clone()
            .with_filter("order_id != 'o2'")
            .with_select(["order_id"]);
        let result = MultiSourceJoiner::new().join_tables(&cfg, tables()).unwrap();
        assert_eq!(result.table.headers, vec!["customer_id", "name", "order_id"]);
        assert_eq!(result.table.row_count(), 3);
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = RecordTable::from_rows(&["k", "a"], &[&["", "x"]]);
        let right = RecordTable::from_rows(&["k", "b"], &[&["", "y"]]);
        let keys = vec!["k".to_string()];
        let (inner, _) = merge_on_keys(left, right, &keys, JoinType::Inner, "r");
        assert!(inner.is_empty());
    }
}
