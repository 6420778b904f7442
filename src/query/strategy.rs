//! Data acquisition strategies
//!
//! One strategy per `QueryMode`, all returning flat rows the aggregator can
//! consume:
//! - `ImportStrategy`: filters `importedData` in memory, never touches the network
//! - `SimpleStrategy`: sends table/axes/aggregation plus a sanitized filter list
//! - `CustomStrategy`: sends the user's query text untouched plus a sanitized
//!   filter sidecar; filter values are never spliced into the query text
//!
//! `QueryResolver` picks the strategy for a data source and is the only
//! entry point the drill controller and the dashboard session use.

use super::backend::{BackendRequest, CustomQueryRequest, QueryBackend, SimpleQueryRequest};
use super::source::{DataSourceConfig, DateRange, Filter, QueryMode};
use crate::aggregate::AggFn;
use crate::data::Row;
use crate::error::Result;
use crate::sanitize::{checked_identifier, sanitize_filters};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Everything a strategy needs besides the data source itself
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryScope<'a> {
    /// Drill and cross filters, outermost first
    pub ancestors: &'a [Filter],
    pub date_range: Option<&'a DateRange>,
    /// Aggregation used when the data source does not name one
    pub default_aggregation: AggFn,
}

impl<'a> QueryScope<'a> {
    pub fn new(ancestors: &'a [Filter]) -> Self {
        Self {
            ancestors,
            ..Default::default()
        }
    }

    pub fn date_range(mut self, range: Option<&'a DateRange>) -> Self {
        self.date_range = range;
        self
    }

    pub fn default_aggregation(mut self, func: AggFn) -> Self {
        self.default_aggregation = func;
        self
    }
}

#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    /// Acquire rows for `source` under `scope`.
    ///
    /// A data source missing what the strategy needs yields no rows, not an error.
    async fn resolve(&self, source: &DataSourceConfig, scope: QueryScope<'_>) -> Result<Vec<Row>>;
}

pub struct ImportStrategy;

#[async_trait]
impl AcquisitionStrategy for ImportStrategy {
    async fn resolve(&self, source: &DataSourceConfig, scope: QueryScope<'_>) -> Result<Vec<Row>> {
        let rows = match source.imported_data.as_ref() {
            Some(rows) if source.has_axes() => rows,
            _ => return Ok(Vec::new()),
        };

        Ok(rows
            .iter()
            .filter(|row| scope.ancestors.iter().all(|f| f.matches(row)))
            .cloned()
            .collect())
    }
}

pub struct SimpleStrategy<'b, B: QueryBackend + ?Sized> {
    backend: &'b B,
}

impl<'b, B: QueryBackend + ?Sized> SimpleStrategy<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Build the request, or `None` when table/axes are missing or unsafe
    pub fn build_request(
        source: &DataSourceConfig,
        scope: QueryScope<'_>,
    ) -> Option<SimpleQueryRequest> {
        if !source.has_axes() {
            return None;
        }
        let table = checked_identifier(source.table.as_deref().unwrap_or_default())?;
        let x_axis = checked_identifier(source.x_axis()?)?;

        let y_axis: Vec<String> = source
            .y_axis
            .iter()
            .filter_map(|y| checked_identifier(y))
            .map(str::to_string)
            .collect();
        if y_axis.is_empty() {
            return None;
        }

        let group_by = source
            .group_by
            .iter()
            .filter_map(|g| checked_identifier(g))
            .map(str::to_string)
            .collect();

        let date_filters = source.date_range_filters(scope.date_range);
        let filters = sanitize_filters(
            source
                .filters
                .iter()
                .chain(date_filters.iter())
                .chain(scope.ancestors.iter()),
        );

        Some(SimpleQueryRequest {
            table: table.to_string(),
            x_axis: x_axis.to_string(),
            y_axis,
            aggregation: source.aggregation_or(scope.default_aggregation),
            group_by,
            filters,
            order_by: source
                .order_by
                .as_deref()
                .and_then(checked_identifier)
                .map(str::to_string),
            order_direction: source.order_direction,
            limit: source.limit,
        })
    }
}

#[async_trait]
impl<'b, B: QueryBackend + ?Sized> AcquisitionStrategy for SimpleStrategy<'b, B> {
    async fn resolve(&self, source: &DataSourceConfig, scope: QueryScope<'_>) -> Result<Vec<Row>> {
        let request = match Self::build_request(source, scope) {
            Some(r) => r,
            None => {
                debug!("Simple query not configured, nothing to fetch");
                return Ok(Vec::new());
            }
        };

        self.backend
            .execute(&BackendRequest::Simple(request))
            .await?
            .into_rows()
    }
}

pub struct CustomStrategy<'b, B: QueryBackend + ?Sized> {
    backend: &'b B,
}

impl<'b, B: QueryBackend + ?Sized> CustomStrategy<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Build the request, or `None` without axes or query text.
    ///
    /// The query text is passed through verbatim; ancestor and date-range
    /// filters travel only in the sanitized `filters` sidecar.
    pub fn build_request(
        source: &DataSourceConfig,
        scope: QueryScope<'_>,
    ) -> Option<CustomQueryRequest> {
        if !source.has_axes() {
            return None;
        }
        let custom_query = source
            .custom_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())?;

        let date_filters = source.date_range_filters(scope.date_range);
        let filters = sanitize_filters(scope.ancestors.iter().chain(date_filters.iter()));

        Some(CustomQueryRequest {
            custom_query: custom_query.to_string(),
            connection_id: source.connection_id.clone(),
            filters,
        })
    }
}

#[async_trait]
impl<'b, B: QueryBackend + ?Sized> AcquisitionStrategy for CustomStrategy<'b, B> {
    async fn resolve(&self, source: &DataSourceConfig, scope: QueryScope<'_>) -> Result<Vec<Row>> {
        let request = match Self::build_request(source, scope) {
            Some(r) => r,
            None => {
                debug!("Custom query not configured, nothing to fetch");
                return Ok(Vec::new());
            }
        };

        self.backend
            .execute(&BackendRequest::Custom(request))
            .await?
            .into_rows()
    }
}

/// Dispatches a data source to the strategy for its `queryMode`
pub struct QueryResolver<B: QueryBackend + ?Sized> {
    backend: Arc<B>,
}

impl<B: QueryBackend + ?Sized> Clone for QueryResolver<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: QueryBackend + ?Sized> QueryResolver<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Acquire rows for `source`, filtered by `scope`
    pub async fn resolve(
        &self,
        source: &DataSourceConfig,
        scope: QueryScope<'_>,
    ) -> Result<Vec<Row>> {
        let backend: &B = &self.backend;
        let rows = match source.query_mode {
            QueryMode::Import => ImportStrategy.resolve(source, scope).await?,
            QueryMode::Simple => SimpleStrategy::new(backend).resolve(source, scope).await?,
            QueryMode::Custom => CustomStrategy::new(backend).resolve(source, scope).await?,
        };

        debug!(
            "Resolved {} rows ({:?} mode, {} ancestor filters)",
            rows.len(),
            source.query_mode,
            scope.ancestors.len()
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::query::backend::OfflineBackend;
    use crate::query::source::FilterOp;
    use chrono::NaiveDate;

    fn import_source() -> DataSourceConfig {
        DataSourceConfig {
            query_mode: QueryMode::Import,
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into()],
            imported_data: Some(vec![
                Row::new().with("region", "N").with("prod", "A").with("sales", 10i64),
                Row::new().with("region", "N").with("prod", "B").with("sales", 5i64),
                Row::new().with("region", "S").with("prod", "A").with("sales", 7i64),
            ]),
            ..Default::default()
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_import_filters_by_ancestors() {
        let source = import_source();
        let ancestors = vec![Filter::equals("region", Value::from("N"))];

        let rows = ImportStrategy
            .resolve(&source, QueryScope::new(&ancestors))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.text("region") == "N"));
    }

    #[tokio::test]
    async fn test_import_without_data_is_empty() {
        let source = DataSourceConfig {
            query_mode: QueryMode::Import,
            ..Default::default()
        };
        let rows = ImportStrategy
            .resolve(&source, QueryScope::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_simple_request_consolidates_filters() {
        let source = DataSourceConfig {
            table: Some("orders".into()),
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into(), "bad field".into()],
            group_by: vec!["prod".into()],
            filters: vec![Filter::new("status", FilterOp::Ne, Value::from("void"))],
            date_column: Some("order_date".into()),
            ..Default::default()
        };
        let ancestors = vec![
            Filter::equals("region", Value::from("N")),
            Filter::equals("region;--", Value::from("x")),
        ];
        let range = range();

        let request = SimpleStrategy::<OfflineBackend>::build_request(
            &source,
            QueryScope::new(&ancestors)
                .date_range(Some(&range))
                .default_aggregation(AggFn::Avg),
        )
        .unwrap();

        assert_eq!(request.y_axis, vec!["sales"]);
        assert_eq!(request.aggregation, AggFn::Avg);
        let fields: Vec<&str> = request.filters.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["status", "order_date", "order_date", "region"]);
    }

    #[test]
    fn test_simple_request_requires_safe_table_and_axes() {
        let mut source = DataSourceConfig {
            table: Some("orders; DROP TABLE users".into()),
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into()],
            ..Default::default()
        };
        assert!(SimpleStrategy::<OfflineBackend>::build_request(&source, QueryScope::default())
            .is_none());

        source.table = Some("orders".into());
        source.x_axis = None;
        assert!(SimpleStrategy::<OfflineBackend>::build_request(&source, QueryScope::default())
            .is_none());
    }

    #[test]
    fn test_custom_request_keeps_query_text_verbatim() {
        let source = DataSourceConfig {
            query_mode: QueryMode::Custom,
            custom_query: Some("SELECT region, SUM(sales) AS sales FROM orders GROUP BY region".into()),
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into()],
            connection_id: Some("wh".into()),
            date_column: Some("order_date".into()),
            ..Default::default()
        };
        let ancestors = vec![
            Filter::equals("region", Value::from("N' OR '1'='1")),
            Filter::equals("reg ion", Value::from("N")),
        ];
        let range = range();

        let request = CustomStrategy::<OfflineBackend>::build_request(
            &source,
            QueryScope::new(&ancestors).date_range(Some(&range)),
        )
        .unwrap();

        assert_eq!(
            request.custom_query,
            "SELECT region, SUM(sales) AS sales FROM orders GROUP BY region"
        );
        assert_eq!(request.filters.len(), 3);
        assert_eq!(request.filters[0].field, "region");
        assert_eq!(request.filters[0].value.to_key_string(), "N' OR '1'='1");
        assert!(!request.custom_query.contains("N' OR"));
    }

    #[test]
    fn test_custom_request_without_query() {
        let source = DataSourceConfig {
            query_mode: QueryMode::Custom,
            custom_query: Some("   ".into()),
            ..Default::default()
        };
        assert!(CustomStrategy::<OfflineBackend>::build_request(&source, QueryScope::default())
            .is_none());
    }

    /// Counts every request it receives and answers with no rows
    #[derive(Default)]
    struct CountingBackend {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl QueryBackend for CountingBackend {
        async fn execute(
            &self,
            _request: &BackendRequest,
        ) -> Result<crate::query::backend::BackendResponse> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(crate::query::backend::BackendResponse::ok(Vec::new()))
        }
    }

    #[tokio::test]
    async fn test_sources_without_axes_never_reach_the_backend() {
        let backend = Arc::new(CountingBackend::default());
        let resolver = QueryResolver::new(backend.clone());

        let custom = DataSourceConfig {
            query_mode: QueryMode::Custom,
            custom_query: Some("SELECT 1".into()),
            ..Default::default()
        };
        let simple = DataSourceConfig {
            query_mode: QueryMode::Simple,
            table: Some("orders".into()),
            ..Default::default()
        };
        let import = DataSourceConfig {
            x_axis: None,
            ..import_source()
        };

        for source in [&custom, &simple, &import] {
            let rows = resolver.resolve(source, QueryScope::default()).await.unwrap();
            assert!(rows.is_empty());
        }
        assert_eq!(backend.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolver_propagates_backend_failure() {
        let resolver = QueryResolver::new(Arc::new(OfflineBackend));
        let source = DataSourceConfig {
            query_mode: QueryMode::Custom,
            custom_query: Some("SELECT 1".into()),
            x_axis: Some("region".into()),
            y_axis: vec!["sales".into()],
            ..Default::default()
        };
        assert!(resolver
            .resolve(&source, QueryScope::default())
            .await
            .is_err());

        let rows = resolver
            .resolve(&import_source(), QueryScope::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
    }
}
