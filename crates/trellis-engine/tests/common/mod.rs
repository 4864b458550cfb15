//! Common test utilities for trellis-engine
//!
//! This module provides shared test infrastructure including:
//! - Add-in description builders
//! - Engine fixtures over an in-memory registry
//! - Mock module loaders and event recorders

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod builders;
pub mod fixtures;
pub mod mocks;

pub use builders::*;
pub use fixtures::*;
pub use mocks::*;
