//! # trellis-engine
//!
//! The extension tree engine for Trellis:
//! - Dependency resolution and transactional add-in loading/unloading
//! - A lazily populated extension tree per context
//! - Child contexts with their own condition types and properties
//! - Ordered, non-reentrant delivery of change notifications
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis_core::types::{
//!     AddinDescription, ExtensionDescription, ExtensionPointDescription, NodeDescription,
//! };
//! use trellis_core::{EngineConfig, MemoryRegistry};
//! use trellis_engine::{AddinEngine, StaticModuleLoader};
//!
//! let mut host = AddinDescription::new("host");
//! host.is_root = true;
//! host.extension_points.push(ExtensionPointDescription::new("/host/Commands"));
//!
//! let mut tools = AddinDescription::new("tools");
//! tools.main_module.extensions.push(ExtensionDescription {
//!     path: "/host/Commands".into(),
//!     nodes: vec![NodeDescription::new("open")],
//! });
//!
//! let registry = Arc::new(MemoryRegistry::new(vec![host, tools]).unwrap());
//! let loader = Arc::new(StaticModuleLoader::new());
//! let engine = AddinEngine::new(registry, loader, EngineConfig::default());
//! engine.initialize().unwrap();
//!
//! let commands = engine.get_extension_nodes("/host/Commands");
//! assert_eq!(commands.len(), 1);
//! assert_eq!(commands[0].id(), "open");
//! ```

mod context;
mod engine;
pub mod error;
mod error_sink;
pub mod events;
pub mod module;
mod notification;
mod resolver;
mod tree;

pub use context::{ExtensionContext, ExtensionNode};
pub use engine::AddinEngine;
pub use error::{EngineError, Result};
pub use events::{
    AddinErrorEvent, AddinEvent, ExtensionEvent, ExtensionNodeEvent, HandlerId, NodeChange,
};
pub use module::{AddinModule, ModuleLoader, Object, StaticModule, StaticModuleLoader, TypeHandle};
