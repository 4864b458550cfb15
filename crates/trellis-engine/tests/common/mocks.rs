//! Mock implementations for testing
//!
//! A mockall module loader plus recorders collecting the events the engine
//! delivers.

#![allow(dead_code)]

use mockall::mock;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::types::AddinDescription;
use trellis_engine::{
    AddinErrorEvent, AddinModule, ExtensionContext, ExtensionNodeEvent, ModuleLoader, NodeChange,
};

mock! {
    pub Loader {}

    impl ModuleLoader for Loader {
        fn load_module(
            &self,
            addin: &AddinDescription,
            module: &str,
        ) -> anyhow::Result<Arc<dyn AddinModule>>;
    }
}

/// Records (change, node id) pairs delivered to a node handler
#[derive(Clone, Default)]
pub struct NodeEventRecorder {
    events: Arc<Mutex<Vec<(NodeChange, String)>>>,
}

impl NodeEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `path` in `ctx`
    pub fn attach(&self, ctx: &ExtensionContext, path: &str) {
        let events = self.events.clone();
        ctx.add_extension_node_handler(path, move |event: &ExtensionNodeEvent| {
            events
                .lock()
                .push((event.change, event.node.id().to_string()));
        })
        .expect("path exists");
    }

    pub fn events(&self) -> Vec<(NodeChange, String)> {
        self.events.lock().clone()
    }

    pub fn count(&self, change: NodeChange, id: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(c, n)| *c == change && n == id)
            .count()
    }

    pub fn added(&self) -> Vec<String> {
        self.ids(NodeChange::Added)
    }

    pub fn removed(&self) -> Vec<String> {
        self.ids(NodeChange::Removed)
    }

    fn ids(&self, change: NodeChange) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(c, _)| *c == change)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Collects error reports
#[derive(Clone, Default)]
pub struct ErrorRecorder {
    errors: Arc<Mutex<Vec<AddinErrorEvent>>>,
}

impl ErrorRecorder {
    pub fn attach(engine: &trellis_engine::AddinEngine) -> Self {
        let recorder = Self::default();
        let errors = recorder.errors.clone();
        engine.on_error(move |event| errors.lock().push(event.clone()));
        recorder
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.lock().iter().map(|e| e.to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

/// Loader whose every call panics
pub struct PanickingLoader;

impl ModuleLoader for PanickingLoader {
    fn load_module(
        &self,
        _addin: &AddinDescription,
        _module: &str,
    ) -> anyhow::Result<Arc<dyn AddinModule>> {
        panic!("loader bug")
    }
}
