//! Cell-level helpers: null detection, ordering, and timestamp normalization.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Datetime layouts accepted on input, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Date-only layouts accepted on input.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Canonical rendering for date-only values.
const CANONICAL_DATE: &str = "%Y-%m-%d";

/// Canonical rendering for datetime values.
const CANONICAL_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Check if a value represents a missing/null value.
pub fn is_null_value(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("na")
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("nil")
        || trimmed.eq_ignore_ascii_case("nan")
}

/// Interpret a cell as a boolean flag (deletion markers, `is_current`).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "t" | "yes" | "y"
    )
}

/// A parsed timestamp plus whether the input carried a time component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub value: NaiveDateTime,
    pub date_only: bool,
}

impl Timestamp {
    /// Render in canonical form.
    pub fn render(&self) -> String {
        if self.date_only {
            self.value.format(CANONICAL_DATE).to_string()
        } else {
            self.value.format(CANONICAL_DATETIME).to_string()
        }
    }

    /// The calendar date as `YYYY-MM-DD`.
    pub fn date_string(&self) -> String {
        self.value.date().format(CANONICAL_DATE).to_string()
    }
}

/// Parse a timestamp in any accepted layout.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let trimmed = value.trim();
    if is_null_value(trimmed) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(Timestamp {
            value: dt.naive_utc(),
            date_only: false,
        });
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Timestamp {
                value: dt,
                date_only: false,
            });
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|value| Timestamp {
                value,
                date_only: true,
            });
        }
    }

    parse_epoch(trimmed)
}

/// Unix epochs: 10 digits are seconds, 13 digits are milliseconds.
fn parse_epoch(value: &str) -> Option<Timestamp> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: i64 = value.parse().ok()?;
    let dt = match value.len() {
        10 => DateTime::from_timestamp(number, 0)?,
        13 => DateTime::from_timestamp_millis(number)?,
        _ => return None,
    };
    Some(Timestamp {
        value: dt.naive_utc(),
        date_only: false,
    })
}

/// Normalize a timestamp cell to its canonical rendering.
///
/// Returns `None` for unparsable input, which callers store as a missing value.
pub fn normalize_timestamp(value: &str) -> Option<String> {
    parse_timestamp(value).map(|ts| ts.render())
}

/// The date part (`YYYY-MM-DD`) of a timestamp cell.
pub fn date_part(value: &str) -> Option<String> {
    parse_timestamp(value).map(|ts| ts.date_string())
}

/// Total ordering over cell values.
///
/// Nulls sort first. Two numbers compare numerically, two timestamps compare
/// chronologically, everything else compares as text.
pub fn compare_values(a: &str, b: &str) -> Ordering {
    match (is_null_value(a), is_null_value(b)) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }

    let (a, b) = (a.trim(), b.trim());
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        if let Some(ordering) = x.partial_cmp(&y) {
            return ordering;
        }
    }

    if looks_temporal(a) && looks_temporal(b) {
        if let (Some(x), Some(y)) = (parse_timestamp(a), parse_timestamp(b)) {
            return x.value.cmp(&y.value);
        }
    }

    a.cmp(b)
}

/// Cheap pre-check so plain text never pays for timestamp parsing.
fn looks_temporal(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 8 && bytes[0].is_ascii_digit() && (value.contains('-') || value.contains('/'))
}

/// Turn a cell value into a path-safe directory token.
pub fn sanitize_path_token(value: &str) -> String {
    let trimmed = value.trim();
    if is_null_value(trimmed) {
        return "__null__".to_string();
    }
    let token: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let token = token.trim_matches('.');
    if token.is_empty() {
        "_".to_string()
    } else {
        token.to_string()
    }
}
