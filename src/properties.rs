//! Engine property definitions with defaults from engine.json
//!
//! engine.json is embedded at compile time and is the only place defaults
//! are written down. `PropertyReader` overlays user settings on top of it.

use crate::error::{EngineError, Result};
use std::collections::HashMap;
use tracing::warn;

/// engine.json embedded at compile time
const ENGINE_JSON: &str = include_str!("../engine.json");

/// Property definition from engine.json
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
    pub default_value: String,
    pub description: String,
    /// For EnumeratedProperty, the valid values
    pub valid_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Enumerated,
    Boolean,
    Integer,
}

impl PropertyKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "StringProperty" => Some(Self::String),
            "EnumeratedProperty" => Some(Self::Enumerated),
            "BooleanProperty" => Some(Self::Boolean),
            "IntegerProperty" => Some(Self::Integer),
            _ => None,
        }
    }
}

/// Registry of all engine properties with their defaults
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    properties: HashMap<String, PropertyDef>,
}

impl PropertyRegistry {
    /// Parse a property document (`{ "properties": [...] }`)
    pub fn from_json(json: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(json)?;

        let properties_array = json["properties"]
            .as_array()
            .ok_or_else(|| EngineError::Config("missing 'properties' array".to_string()))?;

        let mut properties = HashMap::new();

        for prop in properties_array {
            let name = prop["name"]
                .as_str()
                .ok_or_else(|| EngineError::Config("property missing 'name'".to_string()))?
                .to_string();

            let kind_str = prop["kind"].as_str().unwrap_or_default();
            let kind = PropertyKind::parse(kind_str).ok_or_else(|| {
                EngineError::Config(format!("Unknown property kind '{}' for '{}'", kind_str, name))
            })?;

            let default_value = prop["defaultValue"].as_str().unwrap_or("").to_string();
            let description = prop["description"].as_str().unwrap_or("").to_string();

            let valid_values = if kind == PropertyKind::Enumerated {
                prop["values"].as_array().map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
            } else {
                None
            };

            properties.insert(
                name.clone(),
                PropertyDef {
                    name,
                    kind,
                    default_value,
                    description,
                    valid_values,
                },
            );
        }

        Ok(Self { properties })
    }

    pub fn get_default(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|p| p.default_value.as_str())
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.values()
    }

    /// Check if a value is valid for an enumerated property
    pub fn is_valid_enum_value(&self, name: &str, value: &str) -> bool {
        self.properties
            .get(name)
            .and_then(|p| p.valid_values.as_ref())
            .map(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
            .unwrap_or(true) // Non-enumerated properties accept any value
    }
}

static REGISTRY: std::sync::OnceLock<PropertyRegistry> = std::sync::OnceLock::new();

/// The registry built from the embedded engine.json
pub fn registry() -> &'static PropertyRegistry {
    REGISTRY.get_or_init(|| {
        PropertyRegistry::from_json(ENGINE_JSON).unwrap_or_else(|e| {
            warn!("engine.json could not be loaded, running without defaults: {}", e);
            PropertyRegistry::default()
        })
    })
}

/// Typed property reader: user settings first, engine.json defaults second
#[derive(Debug, Clone, Default)]
pub struct PropertyReader {
    user_values: HashMap<String, String>,
}

impl PropertyReader {
    /// Create from user settings; empty values count as not set
    pub fn new(settings: HashMap<String, String>) -> Self {
        let user_values = settings
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();

        Self { user_values }
    }

    /// Override a setting, e.g. from the environment
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.user_values.insert(name.into(), value);
        }
    }

    pub fn get_string(&self, name: &str) -> String {
        if let Some(value) = self.user_values.get(name) {
            return value.clone();
        }

        registry().get_default(name).unwrap_or("").to_string()
    }

    /// Enumerated property; an invalid user value falls back to the default
    pub fn get_enum(&self, name: &str) -> String {
        let reg = registry();
        let default = reg.get_default(name).unwrap_or("");

        if let Some(value) = self.user_values.get(name) {
            if reg.is_valid_enum_value(name, value) {
                return value.to_lowercase();
            }
            let valid_values = reg
                .get_property(name)
                .and_then(|p| p.valid_values.as_ref())
                .map(|v| v.join(", "))
                .unwrap_or_default();
            warn!(
                "Invalid value '{}' for property '{}'. Valid values: [{}]. Using default: '{}'",
                value, name, valid_values, default
            );
        }

        default.to_string()
    }

    pub fn get_optional_string(&self, name: &str) -> Option<String> {
        let value = self.get_string(name);
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub fn get_bool(&self, name: &str) -> bool {
        let default = matches!(registry().get_default(name), Some("true"));

        match self.user_values.get(name).map(|v| v.to_lowercase()) {
            None => default,
            Some(v) if v == "true" || v == "1" || v == "yes" => true,
            Some(v) if v == "false" || v == "0" || v == "no" => false,
            Some(v) => {
                warn!(
                    "Invalid boolean value '{}' for property '{}'. Using default: {}",
                    v, name, default
                );
                default
            }
        }
    }

    pub fn get_u64(&self, name: &str) -> u64 {
        let default = registry()
            .get_default(name)
            .and_then(|d| d.parse::<u64>().ok())
            .unwrap_or(0);

        let value = match self.user_values.get(name) {
            Some(v) => v,
            None => return default,
        };

        match value.trim().parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    "Invalid integer value '{}' for property '{}'. Using default: {}",
                    value, name, default
                );
                default
            }
        }
    }
}
