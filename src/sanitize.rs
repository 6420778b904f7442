//! Identifier sanitization
//!
//! Column and table names reach generated query text for the `simple` and
//! `custom` strategies. Every such identifier is stripped down to
//! `[A-Za-z0-9_]`; a caller that sees the stripped form differ from the
//! original drops the field (or the whole filter) instead of sending it.

use crate::query::source::{Filter, FilterOp, FilterValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Strip every character outside `[A-Za-z0-9_]`
pub fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// True when the identifier survives sanitization unchanged and is non-empty
pub fn is_safe_identifier(raw: &str) -> bool {
    !raw.is_empty() && sanitize_identifier(raw) == raw
}

/// Returns the identifier when it is safe to interpolate, logging the drop otherwise
pub fn checked_identifier(raw: &str) -> Option<&str> {
    if is_safe_identifier(raw) {
        Some(raw)
    } else {
        debug!("Dropping unsafe identifier '{}'", raw);
        None
    }
}

/// A filter whose field passed sanitization, ready to send to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedFilter {
    pub field: String,
    pub operator: FilterOp,
    pub value: FilterValue,
}

/// Sanitize a filter list, dropping every filter whose field was altered
pub fn sanitize_filters<'a, I>(filters: I) -> Vec<SanitizedFilter>
where
    I: IntoIterator<Item = &'a Filter>,
{
    filters
        .into_iter()
        .filter_map(|f| {
            checked_identifier(&f.field).map(|field| SanitizedFilter {
                field: field.to_string(),
                operator: f.operator,
                value: f.value.clone(),
            })
        })
        .collect()
}
