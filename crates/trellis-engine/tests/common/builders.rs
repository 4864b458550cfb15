//! Add-in description builders
//!
//! Fluent builders for the add-in metadata the engine consumes.

#![allow(dead_code)]

use trellis_core::types::{
    AddinDependency, AddinDescription, ConditionTypeDescription, ExtensionDescription,
    ExtensionPointDescription, ModuleDescription, NodeDescription,
};

/// Builder for creating AddinDescription test fixtures
pub struct AddinBuilder {
    addin: AddinDescription,
}

impl AddinBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            addin: AddinDescription::new(id),
        }
    }

    /// A root (host) add-in defining `path` as an open extension point
    pub fn host(id: &str, path: &str) -> Self {
        Self::new(id).root().extension_point(path)
    }

    pub fn root(mut self) -> Self {
        self.addin.is_root = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.addin.enabled = false;
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.addin.version = version.to_string();
        self
    }

    pub fn module(mut self, module: &str) -> Self {
        self.addin.main_module.module = Some(module.to_string());
        self
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.addin
            .main_module
            .dependencies
            .push(AddinDependency::new(id));
        self
    }

    pub fn depends_on_version(mut self, id: &str, requirement: &str) -> Self {
        self.addin
            .main_module
            .dependencies
            .push(AddinDependency::new(id).with_version(requirement));
        self
    }

    pub fn extension_point(mut self, path: &str) -> Self {
        self.addin
            .extension_points
            .push(ExtensionPointDescription::new(path));
        self
    }

    pub fn extension_point_with(mut self, ep: ExtensionPointDescription) -> Self {
        self.addin.extension_points.push(ep);
        self
    }

    pub fn extends(mut self, path: &str, nodes: Vec<NodeDescription>) -> Self {
        self.addin.main_module.extensions.push(ExtensionDescription {
            path: path.to_string(),
            nodes,
        });
        self
    }

    /// An optional module with its own dependencies and extensions
    pub fn optional_module(
        mut self,
        module: Option<&str>,
        dependencies: &[&str],
        extensions: Vec<ExtensionDescription>,
    ) -> Self {
        self.addin.optional_modules.push(ModuleDescription {
            module: module.map(String::from),
            dependencies: dependencies
                .iter()
                .map(|d| AddinDependency::new(*d))
                .collect(),
            extensions,
        });
        self
    }

    pub fn condition_type(mut self, id: &str, type_name: &str) -> Self {
        self.addin.condition_types.push(ConditionTypeDescription {
            id: id.to_string(),
            type_name: type_name.to_string(),
        });
        self
    }

    pub fn build(self) -> AddinDescription {
        self.addin
    }
}

/// A single node with the default node type
pub fn node(id: &str) -> NodeDescription {
    NodeDescription::new(id)
}

/// A node shown only while `condition` holds
pub fn conditional_node(id: &str, condition: &str) -> NodeDescription {
    NodeDescription::new(id).with_condition(condition)
}
