//! Engine configuration from properties
//!
//! Configuration is loaded from user settings layered over engine.json.
//! All default values come from engine.json via `PropertyReader`; nothing
//! is hardcoded here.

use crate::aggregate::AggFn;
use crate::error::Result;
use crate::properties::PropertyReader;
use crate::query::HttpBackend;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Keep aggregated widget data until invalidated
    pub cache_enabled: bool,

    /// Auto-refresh period; `None` when disabled (interval 0)
    pub auto_refresh: Option<Duration>,

    /// Drill levels offered below the top level
    pub max_drill_depth: usize,

    /// Aggregation for data sources that do not name one
    pub default_aggregation: AggFn,

    /// Timeout of a single backend request
    pub request_timeout: Duration,

    /// Base URI of the query backend (None = import widgets only)
    pub backend_uri: Option<String>,

    pub backend_token: Option<String>,

    /// Log level used when RUST_LOG is not set
    pub log_level: String,
}

impl EngineConfig {
    /// Create config from user settings
    ///
    /// `DASHBOARD_API_URI` / `DASHBOARD_API_TOKEN` take precedence over the
    /// `backend.uri` / `backend.token` settings.
    pub fn from_properties(settings: HashMap<String, String>) -> Self {
        let mut props = PropertyReader::new(settings);
        if let Ok(uri) = std::env::var("DASHBOARD_API_URI") {
            props.set("backend.uri", uri);
        }
        if let Ok(token) = std::env::var("DASHBOARD_API_TOKEN") {
            props.set("backend.token", token);
        }
        Self::from_reader(&props)
    }

    /// Create config from a reader, without consulting the environment
    pub fn from_reader(props: &PropertyReader) -> Self {
        let refresh_secs = props.get_u64("refresh.interval.seconds");
        let auto_refresh = (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs));

        // Validated against engine.json values, so parse only fails on a bad default
        let default_aggregation =
            AggFn::parse(&props.get_enum("aggregation.default")).unwrap_or_default();

        Self {
            cache_enabled: props.get_bool("cache.enabled"),
            auto_refresh,
            max_drill_depth: props.get_u64("drill.max.depth") as usize,
            default_aggregation,
            request_timeout: Duration::from_secs(props.get_u64("backend.timeout.seconds")),
            backend_uri: props.get_optional_string("backend.uri"),
            backend_token: props.get_optional_string("backend.token"),
            log_level: props.get_enum("log.level"),
        }
    }

    /// HTTP backend for the configured URI, or `None` without one
    pub fn http_backend(&self) -> Result<Option<HttpBackend>> {
        match &self.backend_uri {
            Some(uri) => Ok(Some(HttpBackend::new(
                uri,
                self.backend_token.clone(),
                self.request_timeout,
            )?)),
            None => Ok(None),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_reader(&PropertyReader::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_engine_json() {
        let config = EngineConfig::default();
        assert!(config.cache_enabled);
        assert_eq!(config.auto_refresh, None);
        assert_eq!(config.max_drill_depth, 5);
        assert_eq!(config.default_aggregation, AggFn::Sum);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.backend_uri, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_settings_override_defaults() {
        let mut settings = HashMap::new();
        settings.insert("refresh.interval.seconds".to_string(), "60".to_string());
        settings.insert("aggregation.default".to_string(), "count".to_string());
        settings.insert("backend.uri".to_string(), "http://localhost:8080".to_string());

        let config = EngineConfig::from_reader(&PropertyReader::new(settings));
        assert_eq!(config.auto_refresh, Some(Duration::from_secs(60)));
        assert_eq!(config.default_aggregation, AggFn::Count);

        let backend = config.http_backend().unwrap().unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:8080/api/query");
    }

    #[test]
    fn test_no_backend_without_uri() {
        assert!(EngineConfig::default().http_backend().unwrap().is_none());
    }
}
