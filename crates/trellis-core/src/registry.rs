//! Add-in registry
//!
//! The engine consumes add-in metadata through the [`AddinRegistry`] trait.
//! [`MemoryRegistry`] is the in-process implementation, built from typed
//! descriptions or a YAML/JSON registry document.

use crate::error::{Error, Result};
use crate::path;
use crate::types::{AddinDescription, ExtensionPointDescription, RegistryDocument};
use camino::Utf8Path;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of add-in metadata
pub trait AddinRegistry: Send + Sync {
    /// Look up an add-in by id
    fn get_addin(&self, id: &str) -> Option<Arc<AddinDescription>>;

    /// Registry enabled state; unknown add-ins are not enabled
    fn is_addin_enabled(&self, id: &str) -> bool;

    /// True when `addin` depends on `dependency`, directly or transitively
    fn addin_depends_on(&self, addin: &str, dependency: &str) -> bool;

    /// Every registered add-in
    fn addins(&self) -> Vec<Arc<AddinDescription>>;

    /// Extension point at exactly `path`
    fn extension_point(&self, path: &str) -> Option<Arc<ExtensionPointDescription>>;

    /// Every extension point, with owner and contributors filled in
    fn extension_points(&self) -> Vec<Arc<ExtensionPointDescription>>;

    /// Root (host) add-ins
    fn root_addins(&self) -> Vec<Arc<AddinDescription>> {
        self.addins().into_iter().filter(|a| a.is_root).collect()
    }
}

/// In-memory add-in registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    addins: BTreeMap<String, Arc<AddinDescription>>,
    extension_points: BTreeMap<String, Arc<ExtensionPointDescription>>,
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl MemoryRegistry {
    /// Build a registry, validating ids and versions and computing extension
    /// point owners and contributors
    pub fn new(addins: impl IntoIterator<Item = AddinDescription>) -> Result<Self> {
        let mut by_id: BTreeMap<String, AddinDescription> = BTreeMap::new();
        for mut addin in addins {
            validate_versions(&addin)?;
            normalize_paths(&mut addin);
            validate_structure(&addin)?;
            if by_id.contains_key(&addin.id) {
                return Err(Error::duplicate_addin(&addin.id));
            }
            by_id.insert(addin.id.clone(), addin);
        }

        let mut extension_points: BTreeMap<String, ExtensionPointDescription> = BTreeMap::new();
        for addin in by_id.values() {
            for ep in &addin.extension_points {
                if let Some(existing) = extension_points.get(&ep.path) {
                    return Err(Error::DuplicateExtensionPoint {
                        path: ep.path.clone(),
                        first: existing.owner.clone(),
                        second: addin.id.clone(),
                    });
                }
                let mut ep = ep.clone();
                ep.owner = addin.id.clone();
                ep.addins.clear();
                extension_points.insert(ep.path.clone(), ep);
            }
        }

        for addin in by_id.values() {
            for extension in addin.all_extensions() {
                // The innermost extension point containing the path receives
                // the contribution
                let target = extension_points
                    .keys()
                    .filter(|ep_path| path::is_within(&extension.path, ep_path))
                    .max_by_key(|ep_path| ep_path.len())
                    .cloned();
                match target.and_then(|p| extension_points.get_mut(&p)) {
                    Some(ep) => {
                        ep.addins.insert(addin.id.clone());
                    }
                    None => warn!(
                        "Add-in {} extends {} which is not under any extension point",
                        addin.id, extension.path
                    ),
                }
            }
        }

        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for id in by_id.keys() {
            indices.insert(id.clone(), graph.add_node(id.clone()));
        }
        for addin in by_id.values() {
            let from = indices[&addin.id];
            for dep in addin.all_dependencies() {
                if let Some(&to) = indices.get(&dep.addin_id) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        debug!(
            "Registry built with {} add-ins and {} extension points",
            by_id.len(),
            extension_points.len()
        );

        Ok(Self {
            addins: by_id.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            extension_points: extension_points
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            graph,
            indices,
        })
    }

    /// Parse a YAML registry document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let doc: RegistryDocument = serde_yaml_ng::from_str(content)?;
        Self::new(doc.addins)
    }

    /// Parse a JSON registry document
    pub fn from_json(content: &str) -> Result<Self> {
        let doc: RegistryDocument = serde_json::from_str(content)?;
        Self::new(doc.addins)
    }

    /// Load a registry document; `.json` files are parsed as JSON, anything
    /// else as YAML
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        match path.extension() {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn len(&self) -> usize {
        self.addins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addins.is_empty()
    }
}

impl AddinRegistry for MemoryRegistry {
    fn get_addin(&self, id: &str) -> Option<Arc<AddinDescription>> {
        self.addins.get(id).cloned()
    }

    fn is_addin_enabled(&self, id: &str) -> bool {
        self.addins.get(id).is_some_and(|a| a.enabled)
    }

    fn addin_depends_on(&self, addin: &str, dependency: &str) -> bool {
        if addin == dependency {
            return false;
        }
        match (self.indices.get(addin), self.indices.get(dependency)) {
            (Some(&from), Some(&to)) => has_path_connecting(&self.graph, from, to, None),
            _ => false,
        }
    }

    fn addins(&self) -> Vec<Arc<AddinDescription>> {
        self.addins.values().cloned().collect()
    }

    fn extension_point(&self, path: &str) -> Option<Arc<ExtensionPointDescription>> {
        self.extension_points.get(&path::normalize(path)).cloned()
    }

    fn extension_points(&self) -> Vec<Arc<ExtensionPointDescription>> {
        self.extension_points.values().cloned().collect()
    }
}

fn validate_versions(addin: &AddinDescription) -> Result<()> {
    semver::Version::parse(&addin.version)
        .map_err(|_| Error::invalid_version(format!("{} ({})", addin.version, addin.id)))?;
    for dep in addin.all_dependencies() {
        if let Some(req) = &dep.version {
            semver::VersionReq::parse(req).map_err(|_| {
                Error::invalid_version(format!("{} ({} -> {})", req, addin.id, dep.addin_id))
            })?;
        }
    }
    Ok(())
}

/// Runs on normalized paths
fn validate_structure(addin: &AddinDescription) -> Result<()> {
    if addin.id.trim().is_empty() {
        return Err(Error::invalid_registry("add-in with an empty id"));
    }
    if addin.extension_points.iter().any(|ep| ep.path.is_empty()) {
        return Err(Error::invalid_registry(format!(
            "add-in {} declares an extension point at the tree root",
            addin.id
        )));
    }
    Ok(())
}

fn normalize_paths(addin: &mut AddinDescription) {
    for ep in &mut addin.extension_points {
        ep.path = path::normalize(&ep.path);
    }
    let modules = std::iter::once(&mut addin.main_module).chain(addin.optional_modules.iter_mut());
    for module in modules {
        for extension in &mut module.extensions {
            extension.path = path::normalize(&extension.path);
        }
    }
}
