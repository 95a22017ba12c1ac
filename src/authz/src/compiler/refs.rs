//! Extraction of `data.*` references from rule and query text

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).expect("string literal pattern")
});

static DATA_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^.\w])data\b((?:\.[A-Za-z_][A-Za-z0-9_]*)*)").expect("data reference pattern")
});

static PLAIN_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("plain reference pattern")
});

/// Every distinct `data` reference in `source`, as segments below `data`.
///
/// Text inside string literals is ignored. A bare `data` yields an empty path.
pub fn data_references(source: &str) -> BTreeSet<Vec<String>> {
    let stripped = STRING_LITERAL.replace_all(source, "\"\"");
    DATA_REFERENCE
        .captures_iter(&stripped)
        .map(|caps| {
            caps.get(1)
                .map(|m| {
                    m.as_str()
                        .split('.')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect()
}

/// Whether `query` is a plain dotted reference such as `data.api.allow`
pub fn is_plain_reference(query: &str) -> bool {
    PLAIN_REFERENCE.is_match(query)
}

/// Segments below `data` of a plain reference
pub fn reference_segments(query: &str) -> Vec<String> {
    query
        .split('.')
        .skip(1)
        .map(str::to_string)
        .collect()
}
