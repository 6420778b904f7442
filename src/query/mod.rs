//! Query layer: from a data source definition to chart rows
//!
//! Structure:
//! - `source.rs`: data source configuration, filters, date range
//! - `backend.rs`: wire contract and HTTP client for the query endpoint
//! - `strategy.rs`: import/simple/custom acquisition and `QueryResolver`
//! - `drill.rs`: chart shaping and the drill-down controller

pub mod backend;
pub mod drill;
pub mod source;
pub mod strategy;

pub use backend::{
    BackendRequest, BackendResponse, CustomQueryRequest, HttpBackend, OfflineBackend,
    QueryBackend, SimpleQueryRequest,
};
pub use drill::{chart_spec, next_level_field, shape_chart, ChartData, DrillDownController};
pub use source::{
    DataSourceConfig, DateRange, DrillFilter, Filter, FilterOp, FilterValue, QueryMode,
};
pub use strategy::{
    AcquisitionStrategy, CustomStrategy, ImportStrategy, QueryResolver, QueryScope,
    SimpleStrategy,
};
