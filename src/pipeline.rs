//! Dashboard session pipeline
//!
//! One `DashboardSession` exists per opened dashboard. It owns the two
//! pieces of shared mutable state (cross filters and the data cache) and
//! drives widget loading:
//! 1. Widgets are fetched concurrently; each fetch resolves to data, never an error
//! 2. Cross filters from other charts and the date range scope every fetch
//! 3. Successful results are cached under the epoch they were issued in
//! 4. Refresh, date-range and cross-filter changes invalidate and refetch
//!
//! Dropping the session ends it; an auto-refresh task stops on its own.

use crate::cache::{CacheStats, DataCache};
use crate::config::EngineConfig;
use crate::crossfilter::{CrossFilter, CrossFilterRegistry};
use crate::error::Result;
use crate::query::{
    ChartData, DataSourceConfig, DateRange, DrillDownController, DrillFilter, Filter,
    QueryBackend, QueryResolver,
};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    #[default]
    Chart,
    Kpi,
    Table,
}

/// A dashboard widget and the data source behind it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub kind: WidgetKind,
    #[serde(default)]
    pub data_source: DataSourceConfig,
}

/// `{ widgets, linkGroups }` as stored for a dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardDefinition {
    pub widgets: Vec<Widget>,
    pub link_groups: BTreeMap<String, Vec<String>>,
}

impl DashboardDefinition {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Data delivered for one widget
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetData {
    pub widget_id: String,
    #[serde(flatten)]
    pub chart: ChartData,
    pub from_cache: bool,
}

pub struct DashboardSession<B: QueryBackend + ?Sized> {
    id: Uuid,
    config: EngineConfig,
    resolver: QueryResolver<B>,
    widgets: Vec<Widget>,
    cross_filters: RwLock<CrossFilterRegistry>,
    cache: Mutex<DataCache>,
    date_range: RwLock<Option<DateRange>>,
}

impl<B: QueryBackend + ?Sized> DashboardSession<B> {
    /// Open a session for `definition`, registering its link groups
    pub fn new(definition: DashboardDefinition, backend: Arc<B>, config: EngineConfig) -> Self {
        let mut registry = CrossFilterRegistry::new();
        for (group_id, chart_ids) in definition.link_groups {
            registry.link_charts(group_id, chart_ids);
        }

        let id = Uuid::new_v4();
        info!(
            "Opened dashboard session {} with {} widgets",
            id,
            definition.widgets.len()
        );

        Self {
            id,
            cache: Mutex::new(DataCache::new(config.cache_enabled)),
            config,
            resolver: QueryResolver::new(backend),
            widgets: definition.widgets,
            cross_filters: RwLock::new(registry),
            date_range: RwLock::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn widget(&self, widget_id: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.id == widget_id)
    }

    pub fn date_range(&self) -> Option<DateRange> {
        *self.date_range.read()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Snapshot of the cross-filter registry
    pub fn cross_filters(&self) -> CrossFilterRegistry {
        self.cross_filters.read().clone()
    }

    /// Filters other charts currently impose on `widget_id`
    pub fn cross_filter_query(&self, widget_id: &str) -> Vec<Filter> {
        self.cross_filters.read().build_filter_query(widget_id)
    }

    fn controller(&self, widget_id: &str) -> DrillDownController<'_, B> {
        DrillDownController::new(&self.resolver)
            .date_range(self.date_range())
            .scope_filters(self.cross_filter_query(widget_id))
            .default_aggregation(self.config.default_aggregation)
    }

    /// Load every widget concurrently.
    ///
    /// With `force`, the whole cache is invalidated first. One widget
    /// failing never affects the others.
    pub async fn load_all(&self, force: bool) -> Vec<WidgetData> {
        if force {
            self.cache.lock().invalidate_all();
        }

        let started = Instant::now();
        let results = join_all(self.widgets.iter().map(|w| self.load(w))).await;

        debug!(
            "Loaded {} widgets in {:.1?}",
            results.len(),
            started.elapsed()
        );
        results
    }

    /// Load one widget, from the cache unless `force`
    pub async fn load_widget(&self, widget_id: &str, force: bool) -> Option<WidgetData> {
        let widget = self.widget(widget_id)?;
        if force {
            self.cache.lock().invalidate(widget_id);
        }
        Some(self.load(widget).await)
    }

    async fn load(&self, widget: &Widget) -> WidgetData {
        let cached = self.cache.lock().get(&widget.id);
        if let Some(chart) = cached {
            return WidgetData {
                widget_id: widget.id.clone(),
                chart,
                from_cache: true,
            };
        }

        let ticket = self.cache.lock().begin_fetch(&widget.id);
        let controller = self.controller(&widget.id);

        let chart = match controller.try_load(&widget.data_source).await {
            Ok(chart) => {
                self.cache.lock().store(ticket, chart.clone());
                chart
            }
            Err(e) => {
                // Not cached, so the next refresh retries
                warn!("Widget {} failed to load: {}", widget.id, e);
                ChartData::empty(&widget.data_source)
            }
        };

        WidgetData {
            widget_id: widget.id.clone(),
            chart,
            from_cache: false,
        }
    }

    /// Invalidate everything and refetch every widget
    pub async fn refresh(&self) -> Vec<WidgetData> {
        info!("Refreshing dashboard session {}", self.id);
        self.load_all(true).await
    }

    /// Change the active date range, then invalidate and refetch everything
    pub async fn set_date_range(&self, range: Option<DateRange>) -> Vec<WidgetData> {
        *self.date_range.write() = range;
        self.load_all(true).await
    }

    /// Clear the date range and every cross filter, then refetch everything
    pub async fn reset_date_range(&self) -> Vec<WidgetData> {
        *self.date_range.write() = None;
        self.cross_filters.write().clear_all_filters();
        self.load_all(true).await
    }

    /// Set (or with an empty value, remove) a cross filter and reload the
    /// widgets it may affect
    pub async fn set_cross_filter(&self, filter: CrossFilter) -> Vec<WidgetData> {
        let origin = filter.chart_id.clone();
        self.cross_filters.write().set_filter(filter);
        self.invalidate_others(&origin);
        self.load_all(false).await
    }

    /// Remove the cross filters of `chart_id` (or only the one on `field`)
    pub async fn clear_cross_filter(&self, chart_id: &str, field: Option<&str>) -> Vec<WidgetData> {
        self.cross_filters.write().clear_filter(chart_id, field);
        self.invalidate_others(chart_id);
        self.load_all(false).await
    }

    pub async fn clear_all_cross_filters(&self) -> Vec<WidgetData> {
        self.cross_filters.write().clear_all_filters();
        self.load_all(true).await
    }

    fn invalidate_others(&self, origin: &str) {
        let others = self
            .widgets
            .iter()
            .map(|w| w.id.as_str())
            .filter(|id| *id != origin);
        self.cache.lock().invalidate_many(others);
    }

    /// Next drill level of a widget below `ancestors`.
    ///
    /// `None` for an unknown widget; a failed fetch gives empty data.
    /// Drill levels are not cached.
    pub async fn drill(&self, widget_id: &str, ancestors: &[DrillFilter]) -> Option<ChartData> {
        let widget = self.widget(widget_id)?;
        let chart = self
            .controller(widget_id)
            .drill_down_chart(&widget.data_source, ancestors)
            .await;
        Some(chart)
    }

    /// Whether the UI should offer another drill level below one showing
    /// `rows` at `depth` (0 = top level)
    pub fn can_drill(&self, depth: usize, rows: usize) -> bool {
        depth < self.config.max_drill_depth && rows > 1
    }
}

impl<B: QueryBackend + ?Sized + 'static> DashboardSession<B> {
    /// Refresh the whole dashboard every `auto_refresh` period.
    ///
    /// `None` when auto-refresh is disabled. The task ends once the
    /// session is dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.config.auto_refresh?;
        let weak = Arc::downgrade(self);

        info!("Auto-refresh every {:?}", period);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else {
                    debug!("Dashboard session dropped, stopping auto-refresh");
                    break;
                };
                session.refresh().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Row, Value};
    use crate::query::{OfflineBackend, QueryMode};

    fn import_widget(id: &str) -> Widget {
        Widget {
            id: id.to_string(),
            data_source: DataSourceConfig {
                query_mode: QueryMode::Import,
                x_axis: Some("region".into()),
                y_axis: vec!["sales".into()],
                imported_data: Some(vec![
                    Row::new().with("region", "N").with("sales", 10i64),
                    Row::new().with("region", "S").with("sales", 7i64),
                ]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn session(widgets: Vec<Widget>) -> DashboardSession<OfflineBackend> {
        let definition = DashboardDefinition {
            widgets,
            ..Default::default()
        };
        DashboardSession::new(definition, Arc::new(OfflineBackend), EngineConfig::default())
    }

    #[test]
    fn test_definition_from_json() {
        let json = br#"{
            "widgets": [{
                "id": "w1",
                "title": "Sales",
                "type": "kpi",
                "dataSource": {"queryMode": "import", "xAxis": "region", "yAxis": "sales"}
            }],
            "linkGroups": {"g": ["w1", "w2"]}
        }"#;
        let definition = DashboardDefinition::from_json(json).unwrap();
        assert_eq!(definition.widgets[0].kind, WidgetKind::Kpi);
        assert_eq!(definition.widgets[0].data_source.y_axis, vec!["sales"]);
        assert_eq!(definition.link_groups["g"].len(), 2);
    }

    #[tokio::test]
    async fn test_second_load_comes_from_cache() {
        let session = session(vec![import_widget("w1")]);

        let first = session.load_all(false).await;
        assert!(!first[0].from_cache);
        assert_eq!(first[0].chart.rows.len(), 2);

        let second = session.load_all(false).await;
        assert!(second[0].from_cache);
        assert_eq!(second[0].chart, first[0].chart);

        let refreshed = session.refresh().await;
        assert!(!refreshed[0].from_cache);
    }

    #[tokio::test]
    async fn test_failed_widget_is_empty_and_not_cached() {
        let broken = Widget {
            id: "broken".into(),
            data_source: DataSourceConfig {
                query_mode: QueryMode::Custom,
                custom_query: Some("SELECT 1".into()),
                x_axis: Some("region".into()),
                y_axis: vec!["sales".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let session = session(vec![broken, import_widget("ok")]);

        let results = session.load_all(false).await;
        assert!(results[0].chart.is_empty());
        assert_eq!(results[1].chart.rows.len(), 2);
        assert_eq!(session.cache_stats().entries, 1);
    }

    #[tokio::test]
    async fn test_cross_filter_reloads_other_widgets() {
        let session = session(vec![import_widget("a"), import_widget("b")]);
        session.load_all(false).await;

        let results = session
            .set_cross_filter(CrossFilter::equals("a", "region", "N"))
            .await;

        assert!(results[0].from_cache);
        assert_eq!(results[0].chart.rows.len(), 2);
        assert!(!results[1].from_cache);
        assert_eq!(
            results[1].chart.rows,
            vec![Row::new().with("region", "N").with("sales", 10.0)]
        );

        let cleared = session.clear_cross_filter("a", None).await;
        assert_eq!(cleared[1].chart.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_date_range_clears_cross_filters() {
        let session = session(vec![import_widget("a"), import_widget("b")]);
        session
            .set_cross_filter(CrossFilter::equals("a", "region", "S"))
            .await;
        assert_eq!(session.cross_filter_query("b").len(), 1);

        session.reset_date_range().await;
        assert!(session.cross_filters().is_empty());
        assert_eq!(session.date_range(), None);
    }

    #[tokio::test]
    async fn test_drill_unknown_widget() {
        let session = session(vec![import_widget("a")]);
        assert!(session.drill("missing", &[]).await.is_none());

        let ancestors = vec![Filter::equals("region", Value::from("S"))];
        let chart = session.drill("a", &ancestors).await.unwrap();
        assert_eq!(chart.rows.len(), 1);
    }

    #[test]
    fn test_can_drill() {
        let session = session(vec![]);
        assert!(session.can_drill(0, 5));
        assert!(!session.can_drill(0, 1));
        assert!(!session.can_drill(5, 5));
    }

    #[tokio::test]
    async fn test_auto_refresh_disabled_by_default() {
        let session = Arc::new(session(vec![]));
        assert!(session.spawn_auto_refresh().is_none());
    }
}
