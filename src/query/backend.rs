//! Backend query execution endpoint
//!
//! The backend compiles `simple` requests into SQL and runs `custom`
//! queries with the filter sidecar applied as parameterized predicates.
//! This module holds the wire contract, the `QueryBackend` seam the
//! strategies call through, and an HTTP client for it.

use crate::aggregate::{AggFn, OrderDirection};
use crate::data::Row;
use crate::error::{EngineError, Result};
use crate::sanitize::SanitizedFilter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request body for `simple` mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleQueryRequest {
    pub table: String,
    pub x_axis: String,
    pub y_axis: Vec<String>,
    pub aggregation: AggFn,
    pub group_by: Vec<String>,
    pub filters: Vec<SanitizedFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_direction: Option<OrderDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Request body for `custom` mode: raw query text plus the filter sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomQueryRequest {
    pub custom_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub filters: Vec<SanitizedFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackendRequest {
    Simple(SimpleQueryRequest),
    Custom(CustomQueryRequest),
}

impl BackendRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendRequest::Simple(_) => "simple",
            BackendRequest::Custom(_) => "custom",
        }
    }

    pub fn filters(&self) -> &[SanitizedFilter] {
        match self {
            BackendRequest::Simple(r) => &r.filters,
            BackendRequest::Custom(r) => &r.filters,
        }
    }
}

/// `{ success, data?, error? }`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackendResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Vec<Row>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BackendResponse {
    pub fn ok(rows: Vec<Row>) -> Self {
        Self {
            success: true,
            data: Some(rows),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Rows of a successful response; a failure becomes `EngineError::Backend`
    pub fn into_rows(self) -> Result<Vec<Row>> {
        if self.success {
            Ok(self.data.unwrap_or_default())
        } else {
            Err(EngineError::Backend(
                self.error
                    .unwrap_or_else(|| "query failed without an error message".to_string()),
            ))
        }
    }
}

/// Executes simple/custom requests
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse>;
}

/// HTTP client for the backend query endpoint
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Create a client for `base_uri` (requests go to `{base_uri}/api/query`)
    pub fn new(base_uri: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        if base_uri.is_empty() {
            return Err(EngineError::Config("Backend URI is empty".to_string()));
        }
        if !(base_uri.starts_with("http://") || base_uri.starts_with("https://")) {
            return Err(EngineError::Config(format!(
                "Invalid backend URI '{}': expected http:// or https://",
                base_uri
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/query", base_uri.trim_end_matches('/')),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse> {
        debug!(
            "POST {} ({} request, {} filters)",
            self.endpoint,
            request.kind(),
            request.filters().len()
        );

        let mut req_builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            req_builder = req_builder.bearer_auth(token);
        }

        let response = req_builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Backend(format!("HTTP {}", status)));
        }

        Ok(response.json::<BackendResponse>().await?)
    }
}

/// Backend for dashboards without a query server: every request fails,
/// so only `import` widgets produce data
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

#[async_trait]
impl QueryBackend for OfflineBackend {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse> {
        Err(EngineError::Backend(format!(
            "no query backend configured for {} request",
            request.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::query::source::FilterOp;

    #[test]
    fn test_simple_request_wire_shape() {
        let request = BackendRequest::Simple(SimpleQueryRequest {
            table: "orders".into(),
            x_axis: "region".into(),
            y_axis: vec!["sales".into()],
            aggregation: AggFn::Sum,
            group_by: vec![],
            filters: vec![SanitizedFilter {
                field: "region".into(),
                operator: FilterOp::Eq,
                value: Value::from("N").into(),
            }],
            order_by: None,
            order_direction: None,
            limit: Some(10),
        });

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["xAxis"], "region");
        assert_eq!(json["aggregation"], "sum");
        assert_eq!(json["filters"][0]["operator"], "=");
        assert_eq!(json["limit"], 10);
        assert!(json.get("orderBy").is_none());
    }

    #[test]
    fn test_custom_request_wire_shape() {
        let request = BackendRequest::Custom(CustomQueryRequest {
            custom_query: "SELECT * FROM orders".into(),
            connection_id: Some("warehouse".into()),
            filters: vec![],
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["customQuery"], "SELECT * FROM orders");
        assert_eq!(json["connectionId"], "warehouse");
    }

    #[test]
    fn test_response_into_rows() {
        let ok: BackendResponse =
            serde_json::from_str(r#"{"success":true,"data":[{"region":"N"}]}"#).unwrap();
        assert_eq!(ok.into_rows().unwrap().len(), 1);

        let failed: BackendResponse =
            serde_json::from_str(r#"{"success":false,"error":"table not found"}"#).unwrap();
        let err = failed.into_rows().unwrap_err();
        assert!(err.to_string().contains("table not found"));
    }

    #[test]
    fn test_http_backend_rejects_bad_uri() {
        assert!(HttpBackend::new("", None, Duration::from_secs(1)).is_err());
        assert!(HttpBackend::new("ftp://x", None, Duration::from_secs(1)).is_err());

        let backend =
            HttpBackend::new("https://dash.example.com/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.endpoint(), "https://dash.example.com/api/query");
    }

    #[tokio::test]
    async fn test_offline_backend_fails() {
        let request = BackendRequest::Custom(CustomQueryRequest {
            custom_query: "SELECT 1".into(),
            connection_id: None,
            filters: vec![],
        });
        assert!(OfflineBackend.execute(&request).await.is_err());
    }
}
