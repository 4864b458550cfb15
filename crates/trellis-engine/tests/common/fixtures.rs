//! Engine fixtures

#![allow(dead_code)]

use std::sync::Arc;
use trellis_core::types::AddinDescription;
use trellis_core::{EngineConfig, MemoryRegistry};
use trellis_engine::{AddinEngine, ModuleLoader, StaticModuleLoader};

use super::builders::{node, AddinBuilder};

pub const COMMANDS: &str = "/host/Commands";

/// Engine over `addins` with no code modules, initialized
pub fn engine_with(addins: Vec<AddinDescription>) -> AddinEngine {
    engine_with_loader(addins, Arc::new(StaticModuleLoader::new()))
}

pub fn engine_with_loader(
    addins: Vec<AddinDescription>,
    loader: Arc<dyn ModuleLoader>,
) -> AddinEngine {
    engine_with_config(addins, loader, EngineConfig::default())
}

pub fn engine_with_config(
    addins: Vec<AddinDescription>,
    loader: Arc<dyn ModuleLoader>,
    config: EngineConfig,
) -> AddinEngine {
    let registry = Arc::new(MemoryRegistry::new(addins).expect("valid registry"));
    let engine = AddinEngine::new(registry, loader, config);
    engine.initialize().expect("engine initializes");
    engine
}

/// A host defining `/host/Commands` plus one add-in per id, each
/// contributing a single node named after it
pub fn commands_engine(contributors: &[&str]) -> AddinEngine {
    let mut addins = vec![AddinBuilder::host("host", COMMANDS).build()];
    for id in contributors {
        addins.push(
            AddinBuilder::new(id)
                .extends(COMMANDS, vec![node(&format!("{}-node", id))])
                .build(),
        );
    }
    engine_with(addins)
}

/// Ids of the visible children at `path`
pub fn child_ids(engine: &AddinEngine, path: &str) -> Vec<String> {
    engine
        .get_extension_nodes(path)
        .iter()
        .map(|n| n.id().to_string())
        .collect()
}
