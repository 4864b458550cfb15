//! Events delivered to host handlers

use crate::context::ExtensionNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier returned when a handler is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Kind of change reported for a child node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeChange {
    Added,
    Removed,
}

/// A child node appeared or disappeared under an observed path
#[derive(Clone)]
pub struct ExtensionNodeEvent {
    pub change: NodeChange,
    /// Path of the observed (parent) node
    pub path: String,
    pub node: Arc<ExtensionNode>,
}

impl fmt::Debug for ExtensionNodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionNodeEvent")
            .field("change", &self.change)
            .field("path", &self.path)
            .field("node", &self.node.path())
            .finish()
    }
}

/// The contents of a path changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionEvent {
    pub path: String,
}

/// An add-in was loaded or unloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddinEvent {
    pub addin_id: String,
}

/// An error reported to the engine's error sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddinErrorEvent {
    pub message: String,
    /// Add-in the error is attributed to, when known
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub addin_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for AddinErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(addin) = &self.addin_id {
            write!(f, " [{}]", addin)?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

pub type NodeHandler = Arc<dyn Fn(&ExtensionNodeEvent) + Send + Sync>;
pub type ExtensionHandler = Arc<dyn Fn(&ExtensionEvent) + Send + Sync>;
pub type NodeLoadedHandler = Arc<dyn Fn(&Arc<ExtensionNode>) + Send + Sync>;
pub type AddinHandler = Arc<dyn Fn(&AddinEvent) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&AddinErrorEvent) + Send + Sync>;
