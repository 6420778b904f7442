//! Group-and-reduce over in-memory rows
//!
//! Rows are grouped by a composite key (the label field followed by any
//! `groupBy` fields, compared as strings) and each value field is reduced
//! with one aggregation function. Output order is the order in which each
//! group key was first seen; callers that want sorting apply
//! [`apply_order_and_limit`] afterwards.

use super::label::{build_label, COMPOSITE_LABEL_FIELD};
use crate::data::{AggregatedRow, Row, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Separator used for the display form of a group key
pub const GROUP_KEY_SEPARATOR: &str = "|||";

/// Aggregation function applied to every value field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFn {
    #[default]
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggFn {
    /// Parse from a property/config string, `None` for unknown names
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "avg" | "average" | "mean" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    /// Function to use when re-aggregating rows the backend already reduced.
    ///
    /// A server-side count arrives as a number per group; counting those rows
    /// again would give 1, so counts are summed instead.
    pub fn reaggregation(&self) -> Self {
        match self {
            Self::Count => Self::Sum,
            other => *other,
        }
    }

    fn seed(&self) -> f64 {
        match self {
            Self::Min => f64::INFINITY,
            Self::Max => f64::NEG_INFINITY,
            Self::Sum | Self::Avg | Self::Count => 0.0,
        }
    }

    fn fold(&self, acc: f64, value: f64) -> f64 {
        match self {
            Self::Sum | Self::Avg => acc + value,
            Self::Min => acc.min(value),
            Self::Max => acc.max(value),
            Self::Count => acc,
        }
    }
}

impl fmt::Display for AggFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction for the order/limit post-pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// What to group by and what to reduce
#[derive(Debug, Clone, Default)]
pub struct AggregateSpec {
    /// Group key fields; the first one is the primary label field
    pub group_key_fields: Vec<String>,
    /// Fields reduced with `func`
    pub value_fields: Vec<String>,
    pub func: AggFn,
    /// When longer than one field, the primary label field is overwritten
    /// with the label built from these fields
    pub composite_label_from: Vec<String>,
}

impl AggregateSpec {
    pub fn new(group_key_fields: Vec<String>, value_fields: Vec<String>, func: AggFn) -> Self {
        Self {
            group_key_fields,
            value_fields,
            func,
            composite_label_from: Vec::new(),
        }
    }

    pub fn composite_label_from(mut self, fields: Vec<String>) -> Self {
        self.composite_label_from = fields;
        self
    }
}

/// A group's identity: its key fields coerced to strings, in order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(Vec<String>);

impl GroupKey {
    pub fn from_row<S: AsRef<str>>(row: &Row, fields: &[S]) -> Self {
        GroupKey(fields.iter().map(|f| row.text(f.as_ref())).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(GROUP_KEY_SEPARATOR))
    }
}

struct Accumulator {
    /// Key field values as first seen in the group
    key_values: Vec<Value>,
    count: usize,
    values: Vec<f64>,
    composite_label: Option<String>,
}

/// Group `rows` by `spec.group_key_fields` and reduce `spec.value_fields`
pub fn aggregate(rows: &[Row], spec: &AggregateSpec) -> Vec<AggregatedRow> {
    let key_fields = &spec.group_key_fields;
    let merge_label = spec.composite_label_from.len() > 1;

    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<Accumulator> = Vec::new();

    for row in rows {
        let key = GroupKey::from_row(row, key_fields);
        let slot = *index.entry(key).or_insert_with(|| {
            let composite_label = if merge_label {
                Some(build_label(row, &spec.composite_label_from))
            } else if key_fields.len() > 1 {
                Some(build_label(row, key_fields))
            } else {
                None
            };
            groups.push(Accumulator {
                key_values: key_fields.iter().map(|f| row.value(f).clone()).collect(),
                count: 0,
                values: vec![spec.func.seed(); spec.value_fields.len()],
                composite_label,
            });
            groups.len() - 1
        });

        let acc = &mut groups[slot];
        acc.count += 1;
        if spec.func != AggFn::Count {
            for (i, field) in spec.value_fields.iter().enumerate() {
                acc.values[i] = spec.func.fold(acc.values[i], row.value(field).to_number());
            }
        }
    }

    groups
        .into_iter()
        .map(|acc| finalize(acc, spec, merge_label))
        .collect()
}

fn finalize(acc: Accumulator, spec: &AggregateSpec, merge_label: bool) -> AggregatedRow {
    let mut out = Row::new();

    for (field, value) in spec.group_key_fields.iter().zip(acc.key_values) {
        out.insert(field.clone(), value);
    }

    for (field, raw) in spec.value_fields.iter().zip(acc.values) {
        let value = match spec.func {
            AggFn::Count => Value::Number(acc.count as f64),
            AggFn::Avg => Value::Number(raw / acc.count as f64),
            AggFn::Sum => Value::Number(raw),
            // A seed that survived means nothing was folded in
            AggFn::Min | AggFn::Max if raw.is_infinite() && raw == spec.func.seed() => Value::Null,
            AggFn::Min | AggFn::Max => Value::Number(raw),
        };
        out.insert(field.clone(), value);
    }

    match acc.composite_label {
        Some(label) if merge_label => {
            if let Some(primary) = spec.group_key_fields.first() {
                out.insert(primary.clone(), Value::Text(label));
            }
        }
        Some(label) => {
            out.insert(COMPOSITE_LABEL_FIELD, Value::Text(label));
        }
        None => {}
    }

    out
}

/// Stable sort by `order_by` then truncate to `limit`.
///
/// Numbers compare numerically; anything else compares by its string form.
pub fn apply_order_and_limit(
    mut rows: Vec<AggregatedRow>,
    order_by: Option<&str>,
    direction: OrderDirection,
    limit: Option<usize>,
) -> Vec<AggregatedRow> {
    if let Some(field) = order_by.filter(|f| !f.is_empty()) {
        rows.sort_by(|a, b| {
            let ord = compare_values(a.value(field), b.value(field));
            match direction {
                OrderDirection::Asc => ord,
                OrderDirection::Desc => ord.reverse(),
            }
        });
    }

    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    rows
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_key_string().cmp(&b.to_key_string()),
    }
}
