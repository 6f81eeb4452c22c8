//! Lookup enrichment.
//!
//! Each lookup is applied on its own: a lookup that cannot be read or lacks
//! its keys is recorded as an error in its [`LookupStats`] and the remaining
//! lookups still run.

use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AssayError, Result};
use crate::table::{RecordTable, TableReader};

use super::config::{LookupJoin, LookupSpec};

/// Outcome of one lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LookupStats {
    pub name: String,
    pub rows_matched: usize,
    pub rows_unmatched: usize,
    pub columns_added: Vec<String>,
    /// Lookup rows dropped because an earlier row had the same key.
    pub duplicate_keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LookupStats {
    fn failed(name: &str, error: &AssayError) -> Self {
        Self {
            name: name.to_string(),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Enriched table plus one stats entry per lookup, in lookup order.
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub table: RecordTable,
    pub stats: Vec<LookupStats>,
}

impl EnrichmentResult {
    pub fn failed_lookups(&self) -> impl Iterator<Item = &LookupStats> {
        self.stats.iter().filter(|s| !s.is_ok())
    }
}

/// A validated lookup ready to attach.
struct PreparedLookup {
    primary_keys: Vec<usize>,
    /// Deduplicated key -> lookup row values for the added columns.
    index: HashMap<Vec<String>, Vec<String>>,
    columns: Vec<String>,
    duplicate_keys: usize,
}

#[derive(Debug, Default)]
pub struct LookupEnricher {
    reader: TableReader,
}

impl LookupEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reader(reader: TableReader) -> Self {
        Self { reader }
    }

    /// Enrich `primary` with lookups loaded from their paths.
    ///
    /// Tables are cached by path for the duration of this call only.
    pub fn enrich(&self, primary: RecordTable, lookups: &[LookupSpec]) -> EnrichmentResult {
        let mut cache: HashMap<PathBuf, RecordTable> = HashMap::new();
        let mut acc = primary;
        let mut stats = Vec::with_capacity(lookups.len());

        for spec in lookups {
            if !cache.contains_key(&spec.path) {
                match self.reader.read_path(&spec.path) {
                    Ok(table) => {
                        cache.insert(spec.path.clone(), table);
                    }
                    Err(e) => {
                        warn!(
                            lookup = %spec.name,
                            path = %spec.path.display(),
                            error = %e,
                            "lookup failed to load"
                        );
                        stats.push(LookupStats::failed(&spec.name, &e));
                        continue;
                    }
                }
            }
            let Some(table) = cache.get(&spec.path) else {
                continue;
            };
            let (next, entry) = apply_lookup(acc, spec, table);
            acc = next;
            stats.push(entry);
        }

        finish(acc, stats)
    }

    /// Enrich `primary` with already-loaded lookup tables, keyed by lookup name.
    pub fn enrich_tables(
        &self,
        primary: RecordTable,
        lookups: &[LookupSpec],
        tables: &IndexMap<String, RecordTable>,
    ) -> EnrichmentResult {
        let mut acc = primary;
        let mut stats = Vec::with_capacity(lookups.len());
        for spec in lookups {
            match tables.get(&spec.name) {
                Some(table) => {
                    let (next, entry) = apply_lookup(acc, spec, table);
                    acc = next;
                    stats.push(entry);
                }
                None => {
                    let err =
                        AssayError::Config(format!("No table supplied for lookup '{}'", spec.name));
                    warn!(lookup = %spec.name, error = %err, "lookup skipped");
                    stats.push(LookupStats::failed(&spec.name, &err));
                }
            }
        }
        finish(acc, stats)
    }
}

fn finish(table: RecordTable, stats: Vec<LookupStats>) -> EnrichmentResult {
    let failed = stats.iter().filter(|s| !s.is_ok()).count();
    info!(
        lookups = stats.len(),
        failed,
        rows = table.row_count(),
        "lookup enrichment complete"
    );
    EnrichmentResult { table, stats }
}

/// Apply one lookup, turning any validation failure into an error entry.
fn apply_lookup(
    acc: RecordTable,
    spec: &LookupSpec,
    lookup: &RecordTable,
) -> (RecordTable, LookupStats) {
    match prepare_lookup(&acc, spec, lookup) {
        Ok(prepared) => attach(acc, spec, prepared),
        Err(e) => {
            warn!(lookup = %spec.name, error = %e, "lookup failed");
            (acc, LookupStats::failed(&spec.name, &e))
        }
    }
}

fn prepare_lookup(
    primary: &RecordTable,
    spec: &LookupSpec,
    lookup: &RecordTable,
) -> Result<PreparedLookup> {
    if spec.keys.is_empty() {
        return Err(AssayError::Config(format!(
            "Lookup '{}' declares no keys",
            spec.name
        )));
    }

    let missing_primary: Vec<String> = spec
        .keys
        .iter()
        .filter(|k| !primary.has_column(&k.primary))
        .map(|k| k.primary.clone())
        .collect();
    if !missing_primary.is_empty() {
        return Err(AssayError::MissingJoinKeys {
            source_name: "primary".to_string(),
            columns: missing_primary,
        });
    }
    let missing_lookup: Vec<String> = spec
        .keys
        .iter()
        .filter(|k| !lookup.has_column(&k.secondary))
        .map(|k| k.secondary.clone())
        .collect();
    if !missing_lookup.is_empty() {
        return Err(AssayError::MissingJoinKeys {
            source_name: spec.name.clone(),
            columns: missing_lookup,
        });
    }

    let primary_keys: Vec<usize> = spec
        .keys
        .iter()
        .filter_map(|k| primary.column_index(&k.primary))
        .collect();
    let lookup_keys: Vec<usize> = spec
        .keys
        .iter()
        .filter_map(|k| lookup.column_index(&k.secondary))
        .collect();

    let selected: Vec<String> = if spec.select_columns.is_empty() {
        lookup
            .headers
            .iter()
            .filter(|h| !spec.keys.iter().any(|k| &k.secondary == *h))
            .cloned()
            .collect()
    } else {
        spec.select_columns.clone()
    };
    let value_idx = lookup.require_columns(&selected, &format!("lookup '{}'", spec.name))?;

    let columns: Vec<String> = selected
        .iter()
        .map(|column| {
            let renamed = spec.rename.get(column).unwrap_or(column);
            if primary.has_column(renamed) {
                format!("{}_{}", spec.name, renamed)
            } else {
                renamed.clone()
            }
        })
        .collect();

    let mut index: HashMap<Vec<String>, Vec<String>> = HashMap::with_capacity(lookup.row_count());
    let mut duplicate_keys = 0;
    for row in 0..lookup.row_count() {
        if lookup.has_null_key(row, &lookup_keys) {
            continue;
        }
        let key = lookup.key_of(row, &lookup_keys);
        if index.contains_key(&key) {
            duplicate_keys += 1;
            continue;
        }
        let values = value_idx.iter().map(|&i| lookup.rows[row][i].clone()).collect();
        index.insert(key, values);
    }
    if duplicate_keys > 0 {
        warn!(
            lookup = %spec.name,
            duplicates = duplicate_keys,
            "lookup has duplicate keys, keeping first occurrence"
        );
    }

    Ok(PreparedLookup {
        primary_keys,
        index,
        columns,
        duplicate_keys,
    })
}

fn attach(
    acc: RecordTable,
    spec: &LookupSpec,
    prepared: PreparedLookup,
) -> (RecordTable, LookupStats) {
    let PreparedLookup {
        primary_keys,
        index,
        columns,
        duplicate_keys,
    } = prepared;

    let mut headers = acc.headers.clone();
    headers.extend(columns.iter().cloned());
    let width = headers.len();

    let mut matched = 0;
    let mut unmatched = 0;
    let mut rows = Vec::with_capacity(acc.row_count());
    for (row_idx, row) in acc.rows.iter().enumerate() {
        let hit = if acc.has_null_key(row_idx, &primary_keys) {
            None
        } else {
            index.get(&acc.key_of(row_idx, &primary_keys))
        };
        match hit {
            Some(values) => {
                matched += 1;
                let mut out = row.clone();
                out.extend(values.iter().cloned());
                rows.push(out);
            }
            None => {
                unmatched += 1;
                if spec.join_type == LookupJoin::Left {
                    let mut out = row.clone();
                    out.resize(width, String::new());
                    rows.push(out);
                }
            }
        }
    }

    let stats = LookupStats {
        name: spec.name.clone(),
        rows_matched: matched,
        rows_unmatched: unmatched,
        columns_added: columns,
        duplicate_keys,
        error: None,
    };
    (RecordTable::new(headers, rows), stats)
}
