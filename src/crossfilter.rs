//! Cross-filter registry
//!
//! Clicking a data point in one chart can constrain the other charts of the
//! dashboard. The registry keeps at most one active filter per
//! `(chartId, field)` and the link groups that scope which charts see which
//! filters:
//! - a chart in a link group sees only filters set by charts of that group
//! - a chart in no group sees every active filter
//!
//! One registry is owned by each dashboard session; it is not global state.

use crate::data::Value;
use crate::query::source::{Filter, FilterOp, FilterValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Operator of a cross filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrossFilterOp {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "range")]
    Range,
}

/// Inclusive bounds of a `range` cross filter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterRange {
    pub min: Value,
    pub max: Value,
}

/// `{ chartId, field, value, operator, values?, range? }`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrossFilter {
    pub chart_id: String,
    pub field: String,
    pub value: Value,
    pub operator: CrossFilterOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<FilterRange>,
}

impl CrossFilter {
    /// `field = value` set by `chart_id`
    pub fn equals(chart_id: impl Into<String>, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            chart_id: chart_id.into(),
            field: field.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// `field in values` set by `chart_id`
    pub fn one_of(chart_id: impl Into<String>, field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            chart_id: chart_id.into(),
            field: field.into(),
            operator: CrossFilterOp::In,
            values: Some(values),
            ..Default::default()
        }
    }

    /// `min <= field <= max` set by `chart_id`
    pub fn between(
        chart_id: impl Into<String>,
        field: impl Into<String>,
        min: impl Into<Value>,
        max: impl Into<Value>,
    ) -> Self {
        Self {
            chart_id: chart_id.into(),
            field: field.into(),
            operator: CrossFilterOp::Range,
            range: Some(FilterRange {
                min: min.into(),
                max: max.into(),
            }),
            ..Default::default()
        }
    }

    /// Operand of an `in` filter: `values`, or `value` alone when no list was given
    fn in_operand(&self) -> Vec<Value> {
        match &self.values {
            Some(values) => values.clone(),
            None if self.value.is_empty() => Vec::new(),
            None => vec![self.value.clone()],
        }
    }

    /// A filter without a usable operand; setting one clears the pair
    pub fn is_empty(&self) -> bool {
        match self.operator {
            CrossFilterOp::Eq => self.value.is_empty(),
            CrossFilterOp::In => self.in_operand().is_empty(),
            CrossFilterOp::Range => self.range.is_none(),
        }
    }

    /// Query filters this cross filter expands to
    pub fn to_filters(&self) -> Vec<Filter> {
        match self.operator {
            CrossFilterOp::Range => match &self.range {
                Some(range) => vec![
                    Filter::new(self.field.clone(), FilterOp::Gte, range.min.clone()),
                    Filter::new(self.field.clone(), FilterOp::Lte, range.max.clone()),
                ],
                None => Vec::new(),
            },
            CrossFilterOp::In => vec![Filter::new(
                self.field.clone(),
                FilterOp::In,
                FilterValue::List(self.in_operand()),
            )],
            CrossFilterOp::Eq => vec![Filter::equals(self.field.clone(), self.value.clone())],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrossFilterRegistry {
    /// Active filters in the order they were first set
    filters: Vec<CrossFilter>,
    /// groupId -> chartIds
    link_groups: BTreeMap<String, Vec<String>>,
}

impl CrossFilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the filter for `(chartId, field)`; an empty filter removes it
    pub fn set_filter(&mut self, filter: CrossFilter) {
        let slot = self
            .filters
            .iter()
            .position(|f| f.chart_id == filter.chart_id && f.field == filter.field);

        match (slot, filter.is_empty()) {
            (Some(i), true) => {
                debug!("Removing cross filter {}.{}", filter.chart_id, filter.field);
                self.filters.remove(i);
            }
            (Some(i), false) => self.filters[i] = filter,
            (None, true) => {}
            (None, false) => {
                debug!("Adding cross filter {}.{}", filter.chart_id, filter.field);
                self.filters.push(filter);
            }
        }
    }

    /// Remove the filters set by `chart_id`, or only the one on `field`
    pub fn clear_filter(&mut self, chart_id: &str, field: Option<&str>) {
        self.filters.retain(|f| {
            f.chart_id != chart_id || field.is_some_and(|field| f.field != field)
        });
    }

    pub fn clear_all_filters(&mut self) {
        self.filters.clear();
    }

    /// Define (or redefine) the members of a link group
    pub fn link_charts(&mut self, group_id: impl Into<String>, chart_ids: Vec<String>) {
        self.link_groups.insert(group_id.into(), chart_ids);
    }

    /// Remove `chart_id` from a group; a group left empty is dropped
    pub fn unlink_chart(&mut self, group_id: &str, chart_id: &str) {
        if let Some(members) = self.link_groups.get_mut(group_id) {
            members.retain(|c| c != chart_id);
            if members.is_empty() {
                self.link_groups.remove(group_id);
            }
        }
    }

    /// First link group that lists `chart_id`
    pub fn group_of(&self, chart_id: &str) -> Option<&str> {
        self.link_groups
            .iter()
            .find(|(_, members)| members.iter().any(|c| c == chart_id))
            .map(|(group, _)| group.as_str())
    }

    /// Filters `chart_id` should react to
    pub fn get_filters_for_chart(&self, chart_id: &str, exclude_self: bool) -> Vec<CrossFilter> {
        let members = self
            .group_of(chart_id)
            .and_then(|group| self.link_groups.get(group));

        self.filters
            .iter()
            .filter(|f| !(exclude_self && f.chart_id == chart_id))
            .filter(|f| members.map_or(true, |m| m.contains(&f.chart_id)))
            .cloned()
            .collect()
    }

    /// Query filters imposed on `chart_id` by the other charts
    pub fn build_filter_query(&self, chart_id: &str) -> Vec<Filter> {
        self.get_filters_for_chart(chart_id, true)
            .iter()
            .flat_map(CrossFilter::to_filters)
            .collect()
    }

    pub fn filters(&self) -> &[CrossFilter] {
        &self.filters
    }

    pub fn link_groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.link_groups
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
