//! Engine configuration types (trellis.yaml)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Check dependency version requirements against registry versions
    #[serde(default = "default_true")]
    pub check_dependency_versions: bool,

    /// Load every enabled root add-in during initialization
    #[serde(default = "default_true")]
    pub initialize_roots: bool,

    /// Add-ins enabled at runtime regardless of registry state
    #[serde(default)]
    pub enabled_addins: Vec<String>,

    /// Add-ins disabled at runtime regardless of registry state
    #[serde(default)]
    pub disabled_addins: Vec<String>,

    /// Initial root context properties
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_dependency_versions: true,
            initialize_roots: true,
            enabled_addins: Vec::new(),
            disabled_addins: Vec::new(),
            properties: BTreeMap::new(),
            logging: LogConfig::default(),
        }
    }
}

/// A scalar context property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::String(s) => write!(f, "{}", s),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}
