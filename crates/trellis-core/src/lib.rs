//! # trellis-core
//!
//! Core library for Trellis providing:
//! - Add-in metadata types (modules, extension points, extension nodes)
//! - The `AddinRegistry` abstraction and an in-memory registry
//! - Engine configuration loading (trellis.yaml + TRELLIS_* overrides)
//! - Tracing initialization

pub mod config;
pub mod error;
pub mod logging;
pub mod path;
pub mod registry;
pub mod types;

pub use error::{Error, Result};
pub use logging::init_tracing;
pub use registry::{AddinRegistry, MemoryRegistry};
pub use types::EngineConfig;
