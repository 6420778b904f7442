use super::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tabular record: column name → scalar
///
/// Both raw rows (imported or returned by the backend) and aggregated
/// chart rows use this shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

/// A row produced by the aggregator
pub type AggregatedRow = Row;

impl Row {
    pub fn new() -> Self {
        Row(BTreeMap::new())
    }

    /// Builder-style insert, handy for literals
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Cell value, with a missing column reading as null
    pub fn value(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.0.get(field).unwrap_or(&NULL)
    }

    /// `String(row[field] ?? "")`
    pub fn text(&self, field: &str) -> String {
        self.value(field).to_key_string()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Row(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_reads_as_empty() {
        let row = Row::new().with("region", "N");
        assert_eq!(row.text("region"), "N");
        assert_eq!(row.text("missing"), "");
        assert!(row.value("missing").is_null());
    }

    #[test]
    fn test_row_deserializes_from_object() {
        let row: Row = serde_json::from_str(r#"{"region":"N","sales":10}"#).unwrap();
        assert_eq!(row.value("sales"), &Value::Number(10.0));
        assert_eq!(row.len(), 2);
    }
}
