//! Row data model
//!
//! Structure:
//! - `value.rs`: scalar cell values and their string/number coercions
//! - `row.rs`: the open column → value mapping used for raw and aggregated rows
//! - `import.rs`: CSV/JSON payloads → rows for `import` mode data sources

pub mod import;
pub mod row;
pub mod value;

pub use import::{rows_from_csv, rows_from_json};
pub use row::{AggregatedRow, Row};
pub use value::Value;
