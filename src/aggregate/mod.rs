//! Aggregation of rows into chart-ready datasets
//!
//! Structure:
//! - `aggregator.rs`: grouping, aggregation functions, order/limit post-pass
//! - `label.rs`: composite labels for multi-field group keys

pub mod aggregator;
pub mod label;

pub use aggregator::{
    aggregate, apply_order_and_limit, AggFn, AggregateSpec, GroupKey, OrderDirection,
    GROUP_KEY_SEPARATOR,
};
pub use label::{build_label, COMPOSITE_LABEL_FIELD, LABEL_SEPARATOR};
