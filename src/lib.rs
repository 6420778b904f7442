//! Dashboard Engine Library
//!
//! Turns widget data source definitions into chart-ready aggregated rows,
//! with drill-down and cross-filtering between the charts of a dashboard.
//!
//! Module organization:
//! - `data`: row model and imported CSV/JSON payloads
//! - `aggregate`: grouping, aggregation, composite labels
//! - `query`: data sources, acquisition strategies, backend client, drill-down
//! - `crossfilter`: cross filters and link groups
//! - `cache`: per-widget data cache with epoch tagging
//! - `pipeline`: the dashboard session tying it all together
//! - `properties` / `config`: engine settings

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod crossfilter;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod properties;
pub mod query;
pub mod sanitize;

pub use error::{EngineError, Result};
