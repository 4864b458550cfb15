//! Engine configuration loading
//!
//! Precedence (low to high):
//! 1. Built-in defaults
//! 2. Configuration file (explicit path, or trellis.yaml searched upward)
//! 3. Environment variables (TRELLIS_* prefix)

use crate::error::{Error, Result};
use crate::types::{EngineConfig, LogFormat};
use camino::{Utf8Path, Utf8PathBuf};
use std::env;
use std::fs;
use tracing::debug;

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["trellis.yaml", "trellis.yml"];

impl EngineConfig {
    /// Load configuration from the given file, or search for one starting at
    /// the current directory. A missing searched file yields the defaults.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_file(p),
            None => {
                let cwd = env::current_dir().map_err(Error::Io)?;
                let cwd = Utf8PathBuf::try_from(cwd).map_err(|_| {
                    Error::invalid_config("Current directory path is not valid UTF-8")
                })?;
                Self::load_from(&cwd)
            }
        }
    }

    /// Search `start` and its parents for a configuration file
    pub fn load_from(start: &Utf8Path) -> Result<Self> {
        match Self::find_config(start) {
            Some(path) => Self::load_file(&path),
            None => {
                debug!("No trellis.yaml found above {}, using defaults", start);
                Self::default().apply_env_overrides()
            }
        }
    }

    /// Load a specific configuration file
    pub fn load_file(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path.as_str())
            } else {
                Error::Io(e)
            }
        })?;
        debug!("Loading engine configuration from {}", path);
        Self::from_yaml(&content)?.apply_env_overrides()
    }

    /// Parse configuration from YAML, without environment overrides
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Find a configuration file in `start` or its parent directories
    pub fn find_config(start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start);
        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let path = dir.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
            current = dir.parent();
        }
        None
    }

    /// Apply TRELLIS_* environment variable overrides
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(val) = env::var("TRELLIS_CHECK_DEPENDENCY_VERSIONS") {
            self.check_dependency_versions = parse_bool("TRELLIS_CHECK_DEPENDENCY_VERSIONS", &val)?;
        }

        if let Ok(val) = env::var("TRELLIS_INITIALIZE_ROOTS") {
            self.initialize_roots = parse_bool("TRELLIS_INITIALIZE_ROOTS", &val)?;
        }

        if let Ok(val) = env::var("TRELLIS_ENABLED_ADDINS") {
            self.enabled_addins = parse_list(&val);
        }

        if let Ok(val) = env::var("TRELLIS_DISABLED_ADDINS") {
            self.disabled_addins = parse_list(&val);
        }

        if let Ok(val) = env::var("TRELLIS_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = env::var("TRELLIS_LOG_FORMAT") {
            self.logging.format = val
                .parse::<LogFormat>()
                .map_err(|e| Error::invalid_config(format!("TRELLIS_LOG_FORMAT: {}", e)))?;
        }

        Ok(self)
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(Error::from)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "{} must be a boolean, got '{}'",
            name, value
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
