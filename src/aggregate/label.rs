//! Composite labels for multi-field group keys

use crate::data::Row;

/// Separator between the parts of a user-visible composite label
pub const LABEL_SEPARATOR: &str = " - ";

/// Field that carries the composite label on aggregated rows
pub const COMPOSITE_LABEL_FIELD: &str = "_compositeLabel";

/// Join `String(row[f] ?? "")` for each field with `" - "`
pub fn build_label<S: AsRef<str>>(row: &Row, fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| row.text(f.as_ref()))
        .collect::<Vec<_>>()
        .join(LABEL_SEPARATOR)
}
