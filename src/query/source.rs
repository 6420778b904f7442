//! Data source configuration and filters
//!
//! A `DataSourceConfig` describes how one chart obtains its rows. It is
//! stored in the widget definition as camelCase JSON, so every field is
//! optional on the wire and defaults to "not configured".

use crate::aggregate::aggregator::compare_values;
use crate::aggregate::{AggFn, OrderDirection};
use crate::data::{Row, Value};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// How rows are acquired for a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Rows live client-side in `importedData`
    Import,
    /// Constrained query compiled by the backend from table/axes/filters
    #[default]
    Simple,
    /// User-authored query text plus a sanitized filter sidecar
    Custom,
}

impl QueryMode {
    /// True when the rows come back from the backend, possibly already
    /// grouped and reduced there
    pub fn aggregates_server_side(&self) -> bool {
        matches!(self, QueryMode::Simple | QueryMode::Custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSourceConfig {
    pub query_mode: QueryMode,
    pub table: Option<String>,
    pub x_axis: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub y_axis: Vec<String>,
    pub aggregation: Option<AggFn>,
    #[serde(deserialize_with = "one_or_many")]
    pub group_by: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
    pub order_direction: Option<OrderDirection>,
    pub limit: Option<usize>,
    pub custom_query: Option<String>,
    pub connection_id: Option<String>,
    pub start_date_column: Option<String>,
    pub end_date_column: Option<String>,
    pub date_column: Option<String>,
    /// Grouping/label column used one level below the current one
    pub drill_down_label_field: Option<String>,
    /// Replace the primary label field with the composite label
    pub merge_composite_label: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_data: Option<Vec<Row>>,
}

impl DataSourceConfig {
    /// The configured x axis, if non-empty
    pub fn x_axis(&self) -> Option<&str> {
        self.x_axis.as_deref().filter(|x| !x.is_empty())
    }

    /// Both axes present; without them there is nothing to fetch
    pub fn has_axes(&self) -> bool {
        self.x_axis().is_some() && self.y_axis.iter().any(|y| !y.is_empty())
    }

    pub fn aggregation_or(&self, default: AggFn) -> AggFn {
        self.aggregation.unwrap_or(default)
    }

    /// Group key for a chart labeled by `label_field`: the label field
    /// followed by the `groupBy` fields, without repeats
    pub fn group_key_fields(&self, label_field: &str) -> Vec<String> {
        let mut fields = vec![label_field.to_string()];
        for field in &self.group_by {
            if !field.is_empty() && !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    /// Filters that scope the query to the active date range
    pub fn date_range_filters(&self, range: Option<&DateRange>) -> Vec<Filter> {
        let range = match range {
            Some(r) => r,
            None => return Vec::new(),
        };

        let non_empty = |c: &Option<String>| c.clone().filter(|s| !s.is_empty());
        let start_col = non_empty(&self.start_date_column);
        let end_col = non_empty(&self.end_date_column);

        let mut filters = Vec::new();
        if start_col.is_some() || end_col.is_some() {
            if let Some(col) = start_col {
                filters.push(Filter::new(col, FilterOp::Gte, range.from_value()));
            }
            if let Some(col) = end_col {
                filters.push(Filter::new(col, FilterOp::Lte, range.to_value()));
            }
        } else if let Some(col) = non_empty(&self.date_column) {
            filters.push(Filter::new(col.clone(), FilterOp::Gte, range.from_value()));
            filters.push(Filter::new(col, FilterOp::Lte, range.to_value()));
        }
        filters
    }
}

/// Accept either `"field"` or `["a", "b"]`
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Missing(()) => Vec::new(),
    })
}

/// Comparison operator of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterOp {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "in")]
    In,
}

/// A filter operand: one scalar, or a list for `in`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    List(Vec<Value>),
    Scalar(Value),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Scalar(Value::Null)
    }
}

impl FilterValue {
    /// String form; lists join with "," the way they print in query text
    pub fn to_key_string(&self) -> String {
        match self {
            FilterValue::Scalar(v) => v.to_key_string(),
            FilterValue::List(items) => items
                .iter()
                .map(Value::to_key_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Scalar(v)
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(v: Vec<Value>) -> Self {
        FilterValue::List(v)
    }
}

/// `{ field, operator, value }`. A drill filter is one with `=`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOp,
    pub value: FilterValue,
}

/// Filter produced by clicking a rendered data point
pub type DrillFilter = Filter;

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOp, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Evaluate the filter against one in-memory row.
    ///
    /// `=` is string equality under the same coercion used for grouping.
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.value(&self.field);
        match self.operator {
            FilterOp::Eq => cell.to_key_string() == self.value.to_key_string(),
            FilterOp::Ne => cell.to_key_string() != self.value.to_key_string(),
            FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
                let operand = match &self.value {
                    FilterValue::Scalar(v) => v,
                    FilterValue::List(_) => return false,
                };
                let ord = compare_values(cell, operand);
                match self.operator {
                    FilterOp::Gt => ord.is_gt(),
                    FilterOp::Lt => ord.is_lt(),
                    FilterOp::Gte => ord.is_ge(),
                    _ => ord.is_le(),
                }
            }
            FilterOp::Like => like_matches(&cell.to_key_string(), &self.value.to_key_string()),
            FilterOp::In => {
                let text = cell.to_key_string();
                match &self.value {
                    FilterValue::List(items) => items.iter().any(|v| v.to_key_string() == text),
                    FilterValue::Scalar(v) => v.to_key_string() == text,
                }
            }
        }
    }
}

/// SQL `LIKE` with `%` and `_`, case-insensitive
fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}

/// Active dashboard date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    fn from_value(&self) -> Value {
        Value::Text(self.from.format("%Y-%m-%d").to_string())
    }

    fn to_value(&self) -> Value {
        Value::Text(self.to.format("%Y-%m-%d").to_string())
    }
}
