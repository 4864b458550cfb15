//! Type definitions for add-in metadata and engine configuration

mod addin_types;
mod config_types;

pub use addin_types::*;
pub use config_types::*;
