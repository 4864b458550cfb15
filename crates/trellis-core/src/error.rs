//! Error types for trellis-core

use thiserror::Error;

/// Result type alias using trellis-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Trellis
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid semver version or version requirement
    #[error("Invalid version format: {version}")]
    InvalidVersion { version: String },

    /// Two add-ins registered under the same id
    #[error("Duplicate add-in: {id}")]
    DuplicateAddin { id: String },

    /// Two add-ins declared the same extension point
    #[error("Extension point {path} is declared by both {first} and {second}")]
    DuplicateExtensionPoint {
        path: String,
        first: String,
        second: String,
    },

    /// Malformed registry contents
    #[error("Invalid registry: {message}")]
    InvalidRegistry { message: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid version error
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    /// Create a duplicate add-in error
    pub fn duplicate_addin(id: impl Into<String>) -> Self {
        Self::DuplicateAddin { id: id.into() }
    }

    /// Create an invalid registry error
    pub fn invalid_registry(message: impl Into<String>) -> Self {
        Self::InvalidRegistry {
            message: message.into(),
        }
    }
}
