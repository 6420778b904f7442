//! Chart shaping and drill-down
//!
//! Every chart level, the top one included, goes through the same path:
//! resolve rows for the level's grouping column, aggregate them, apply the
//! order/limit post-pass. Drilling only changes which column the level is
//! grouped by and which ancestor filters constrain it.
//!
//! The caller owns the drill stack. Each call receives the complete list of
//! ancestor filters (one per level descended), never a delta, so a call can
//! be replayed or superseded without coordination.

use super::backend::QueryBackend;
use super::source::{DataSourceConfig, DateRange, DrillFilter, Filter};
use super::strategy::{QueryResolver, QueryScope};
use crate::aggregate::{
    aggregate, apply_order_and_limit, AggFn, AggregateSpec, COMPOSITE_LABEL_FIELD,
};
use crate::data::{AggregatedRow, Row};
use crate::error::Result;
use serde::Serialize;
use tracing::{debug, warn};

/// Aggregated rows plus the field names a renderer needs
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub rows: Vec<AggregatedRow>,
    pub x_field: String,
    pub y_fields: Vec<String>,
    /// Set when rows carry a `_compositeLabel`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_field: Option<String>,
}

impl ChartData {
    pub fn empty(source: &DataSourceConfig) -> Self {
        Self {
            rows: Vec::new(),
            x_field: source.x_axis().unwrap_or_default().to_string(),
            y_fields: source.y_axis.clone(),
            label_field: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Aggregation spec for a data source grouped by its `xAxis`
pub fn chart_spec(source: &DataSourceConfig, default_aggregation: AggFn) -> Option<AggregateSpec> {
    if !source.has_axes() {
        return None;
    }
    let label_field = source.x_axis()?;
    let key_fields = source.group_key_fields(label_field);

    let mut func = source.aggregation_or(default_aggregation);
    if source.query_mode.aggregates_server_side() {
        func = func.reaggregation();
    }

    let value_fields = source
        .y_axis
        .iter()
        .filter(|y| !y.is_empty())
        .cloned()
        .collect();

    let mut spec = AggregateSpec::new(key_fields.clone(), value_fields, func);
    if source.merge_composite_label {
        spec = spec.composite_label_from(key_fields);
    }
    Some(spec)
}

/// Aggregate acquired rows into chart data for `source`
pub fn shape_chart(source: &DataSourceConfig, rows: &[Row], default_aggregation: AggFn) -> ChartData {
    let spec = match chart_spec(source, default_aggregation) {
        Some(spec) => spec,
        None => return ChartData::empty(source),
    };

    let aggregated = aggregate(rows, &spec);
    let aggregated = apply_order_and_limit(
        aggregated,
        source.order_by.as_deref(),
        source.order_direction.unwrap_or_default(),
        source.limit,
    );

    let label_field = aggregated
        .first()
        .filter(|row| row.contains(COMPOSITE_LABEL_FIELD))
        .map(|_| COMPOSITE_LABEL_FIELD.to_string());

    ChartData {
        rows: aggregated,
        x_field: spec.group_key_fields[0].clone(),
        y_fields: spec.value_fields,
        label_field,
    }
}

/// Column the next level groups by, given the ancestor chain.
///
/// `drillDownLabelField` (or `xAxis`) unless that is the column the last
/// ancestor filter pinned to a single value, in which case `xAxis`.
pub fn next_level_field(source: &DataSourceConfig, ancestors: &[DrillFilter]) -> Option<String> {
    let x_axis = source.x_axis()?;
    let candidate = source
        .drill_down_label_field
        .as_deref()
        .filter(|f| !f.is_empty())
        .unwrap_or(x_axis);

    match ancestors.last() {
        Some(last) if last.field == candidate => Some(x_axis.to_string()),
        _ => Some(candidate.to_string()),
    }
}

/// Loads chart levels through a `QueryResolver`.
///
/// Scope filters (cross filters imposed by other charts) apply to every
/// level; drill filters are passed per call.
pub struct DrillDownController<'r, B: QueryBackend + ?Sized> {
    resolver: &'r QueryResolver<B>,
    date_range: Option<DateRange>,
    scope_filters: Vec<Filter>,
    default_aggregation: AggFn,
}

impl<'r, B: QueryBackend + ?Sized> DrillDownController<'r, B> {
    pub fn new(resolver: &'r QueryResolver<B>) -> Self {
        Self {
            resolver,
            date_range: None,
            scope_filters: Vec::new(),
            default_aggregation: AggFn::default(),
        }
    }

    pub fn date_range(mut self, range: Option<DateRange>) -> Self {
        self.date_range = range;
        self
    }

    pub fn scope_filters(mut self, filters: Vec<Filter>) -> Self {
        self.scope_filters = filters;
        self
    }

    pub fn default_aggregation(mut self, func: AggFn) -> Self {
        self.default_aggregation = func;
        self
    }

    /// Top level of a chart, grouped by its `xAxis`; empty on failure
    pub async fn load(&self, source: &DataSourceConfig) -> ChartData {
        self.fetch_level(source, &[]).await
    }

    /// Like [`load`](Self::load) but hands the acquisition error back
    pub async fn try_load(&self, source: &DataSourceConfig) -> Result<ChartData> {
        self.try_fetch_level(source, &[]).await
    }

    /// Descend one level below `ancestors`; empty (never an error) on failure
    pub async fn drill_down(
        &self,
        source: &DataSourceConfig,
        ancestors: &[DrillFilter],
    ) -> Vec<AggregatedRow> {
        self.drill_down_chart(source, ancestors).await.rows
    }

    /// Like [`drill_down`](Self::drill_down) but keeps the field names
    pub async fn drill_down_chart(
        &self,
        source: &DataSourceConfig,
        ancestors: &[DrillFilter],
    ) -> ChartData {
        let group_field = match next_level_field(source, ancestors) {
            Some(field) => field,
            None => return ChartData::empty(source),
        };

        debug!(
            "Drilling to level {} grouped by '{}'",
            ancestors.len(),
            group_field
        );

        let mut level_source = source.clone();
        level_source.x_axis = Some(group_field);
        self.fetch_level(&level_source, ancestors).await
    }

    async fn fetch_level(&self, source: &DataSourceConfig, ancestors: &[DrillFilter]) -> ChartData {
        match self.try_fetch_level(source, ancestors).await {
            Ok(chart) => chart,
            Err(e) => {
                warn!("Failed to acquire chart rows: {}", e);
                ChartData::empty(source)
            }
        }
    }

    async fn try_fetch_level(
        &self,
        source: &DataSourceConfig,
        ancestors: &[DrillFilter],
    ) -> Result<ChartData> {
        if !source.has_axes() {
            return Ok(ChartData::empty(source));
        }

        let filters: Vec<Filter> = self
            .scope_filters
            .iter()
            .chain(ancestors.iter())
            .cloned()
            .collect();
        let scope = QueryScope::new(&filters)
            .date_range(self.date_range.as_ref())
            .default_aggregation(self.default_aggregation);

        let rows = self.resolver.resolve(source, scope).await?;
        Ok(shape_chart(source, &rows, self.default_aggregation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::query::backend::OfflineBackend;
    use crate::query::source::QueryMode;
    use std::sync::Arc;

    fn source() -> DataSourceConfig {
        DataSourceConfig {
            query_mode: QueryMode::Import,
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into()],
            drill_down_label_field: Some("city".into()),
            imported_data: Some(vec![
                Row::new().with("region", "N").with("city", "Oslo").with("sales", 10i64),
                Row::new().with("region", "N").with("city", "Bergen").with("sales", 5i64),
                Row::new().with("region", "N").with("city", "Oslo").with("sales", 1i64),
                Row::new().with("region", "S").with("city", "Rome").with("sales", 7i64),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn test_next_level_field() {
        let src = source();
        assert_eq!(next_level_field(&src, &[]).as_deref(), Some("city"));

        let by_region = vec![Filter::equals("region", Value::from("N"))];
        assert_eq!(next_level_field(&src, &by_region).as_deref(), Some("city"));

        let by_city = vec![Filter::equals("city", Value::from("Oslo"))];
        assert_eq!(next_level_field(&src, &by_city).as_deref(), Some("region"));

        let plain = DataSourceConfig {
            x_axis: Some("region".into()),
            ..Default::default()
        };
        assert_eq!(next_level_field(&plain, &[]).as_deref(), Some("region"));
        assert_eq!(next_level_field(&DataSourceConfig::default(), &[]), None);
    }

    #[tokio::test]
    async fn test_drill_into_region() {
        let resolver = QueryResolver::new(Arc::new(OfflineBackend));
        let controller = DrillDownController::new(&resolver);

        let ancestors = vec![Filter::equals("region", Value::from("N"))];
        let rows = controller.drill_down(&source(), &ancestors).await;

        assert_eq!(
            rows,
            vec![
                Row::new().with("city", "Oslo").with("sales", 11.0),
                Row::new().with("city", "Bergen").with("sales", 5.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_drill_with_no_matching_rows_is_empty() {
        let resolver = QueryResolver::new(Arc::new(OfflineBackend));
        let controller = DrillDownController::new(&resolver);

        let ancestors = vec![Filter::equals("region", Value::from("W"))];
        assert!(controller.drill_down(&source(), &ancestors).await.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_empty() {
        let resolver = QueryResolver::new(Arc::new(OfflineBackend));
        let controller = DrillDownController::new(&resolver);
        let src = DataSourceConfig {
            query_mode: QueryMode::Simple,
            table: Some("orders".into()),
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into()],
            ..Default::default()
        };

        let chart = controller.load(&src).await;
        assert!(chart.is_empty());
        assert_eq!(chart.x_field, "region");
        assert!(controller.try_load(&src).await.is_err());
    }

    #[tokio::test]
    async fn test_scope_filters_apply_to_every_level() {
        let resolver = QueryResolver::new(Arc::new(OfflineBackend));
        let controller = DrillDownController::new(&resolver)
            .scope_filters(vec![Filter::equals("city", Value::from("Oslo"))]);

        let chart = controller.load(&source()).await;
        assert_eq!(
            chart.rows,
            vec![Row::new().with("region", "N").with("sales", 11.0)]
        );
    }

    #[test]
    fn test_simple_mode_resums_server_counts() {
        let src = DataSourceConfig {
            query_mode: QueryMode::Simple,
            x_axis: Some("region".into()),
            y_axis: vec!["orders".into()],
            aggregation: Some(AggFn::Count),
            ..Default::default()
        };
        let rows = vec![
            Row::new().with("region", "N").with("orders", 12i64),
            Row::new().with("region", "S").with("orders", 4i64),
        ];
        let chart = shape_chart(&src, &rows, AggFn::Sum);
        assert_eq!(chart.rows[0].value("orders"), &Value::Number(12.0));
        assert_eq!(chart.rows[1].value("orders"), &Value::Number(4.0));
    }

    #[test]
    fn test_shape_chart_reports_composite_label() {
        let src = DataSourceConfig {
            query_mode: QueryMode::Import,
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into()],
            group_by: vec!["city".into()],
            ..Default::default()
        };
        let rows = source().imported_data.unwrap();
        let chart = shape_chart(&src, &rows, AggFn::Sum);

        assert_eq!(chart.label_field.as_deref(), Some(COMPOSITE_LABEL_FIELD));
        assert_eq!(chart.rows[0].text(COMPOSITE_LABEL_FIELD), "N - Oslo");
        assert_eq!(chart.rows.len(), 3);
    }

    #[tokio::test]
    async fn test_drill_with_no_ancestors_matches_direct_load() {
        let resolver = QueryResolver::new(Arc::new(OfflineBackend));
        let controller = DrillDownController::new(&resolver);
        let src = DataSourceConfig {
            drill_down_label_field: None,
            group_by: vec!["city".into()],
            ..source()
        };

        let direct = controller.load(&src).await;
        let drilled = controller.drill_down_chart(&src, &[]).await;

        let labels = |chart: &ChartData| -> Vec<String> {
            chart.rows.iter().map(|r| r.text(COMPOSITE_LABEL_FIELD)).collect()
        };
        assert_eq!(labels(&direct), vec!["N - Oslo", "N - Bergen", "S - Rome"]);
        assert_eq!(labels(&direct), labels(&drilled));
    }
}
