//! Add-in metadata types
//!
//! These mirror the declarative description each add-in ships: its code
//! modules, the extension points it defines, and the extension nodes it
//! contributes to other add-ins' extension points.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Registry descriptor of an add-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AddinDescription {
    /// Unique add-in id
    pub id: String,

    /// Namespace the add-in belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Semantic version
    #[serde(default = "default_version")]
    pub version: String,

    /// Root (host) add-ins are loaded by engine initialization
    #[serde(default)]
    pub is_root: bool,

    /// Registry enabled state
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Module that is always loaded with the add-in
    #[serde(default)]
    pub main_module: ModuleDescription,

    /// Modules loaded only when their own dependencies are satisfied
    #[serde(default)]
    pub optional_modules: Vec<ModuleDescription>,

    /// Extension points defined by this add-in
    #[serde(default)]
    pub extension_points: Vec<ExtensionPointDescription>,

    /// Condition types this add-in provides
    #[serde(default)]
    pub condition_types: Vec<ConditionTypeDescription>,

    /// Named node sets other descriptions may reference
    #[serde(default)]
    pub node_sets: Vec<NodeSetDescription>,
}

impl AddinDescription {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: None,
            name: None,
            version: default_version(),
            is_root: false,
            enabled: true,
            main_module: ModuleDescription::default(),
            optional_modules: Vec::new(),
            extension_points: Vec::new(),
            condition_types: Vec::new(),
            node_sets: Vec::new(),
        }
    }

    /// Main module followed by the optional modules
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDescription> {
        std::iter::once(&self.main_module).chain(self.optional_modules.iter())
    }

    /// Dependencies of every module
    pub fn all_dependencies(&self) -> impl Iterator<Item = &AddinDependency> {
        self.modules().flat_map(|m| m.dependencies.iter())
    }

    /// Extensions of every module
    pub fn all_extensions(&self) -> impl Iterator<Item = &ExtensionDescription> {
        self.modules().flat_map(|m| m.extensions.iter())
    }
}

/// A code module and the contributions that depend on it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleDescription {
    /// Code module name handed to the module loader; `None` for pure
    /// metadata modules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Add-ins this module requires
    #[serde(default)]
    pub dependencies: Vec<AddinDependency>,

    /// Extension nodes contributed by this module
    #[serde(default)]
    pub extensions: Vec<ExtensionDescription>,
}

/// Dependency on another add-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AddinDependency {
    pub addin_id: String,

    /// Semver requirement the dependency's version must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AddinDependency {
    pub fn new(addin_id: impl Into<String>) -> Self {
        Self {
            addin_id: addin_id.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, requirement: impl Into<String>) -> Self {
        self.version = Some(requirement.into());
        self
    }
}

/// Nodes contributed under a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionDescription {
    /// Target path, at or below an extension point
    pub path: String,

    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
}

/// A single extension node declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeDescription {
    /// Path segment id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Node type name, checked against the parent's node set
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Visibility condition expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Sibling id this node is placed before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_before: Option<String>,

    /// Sibling id this node is placed after
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_after: Option<String>,

    #[serde(default)]
    pub children: Vec<NodeDescription>,
}

impl NodeDescription {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            node_type: default_node_type(),
            attributes: BTreeMap::new(),
            condition: None,
            insert_before: None,
            insert_after: None,
            children: Vec::new(),
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_child(mut self, child: NodeDescription) -> Self {
        self.children.push(child);
        self
    }
}

/// An extension point definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionPointDescription {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Node types allowed as direct children
    #[serde(default)]
    pub node_set: NodeSetDescription,

    /// Defining add-in, filled in by the registry
    #[serde(default)]
    pub owner: String,

    /// Add-ins contributing nodes, filled in by the registry
    #[serde(default)]
    pub addins: BTreeSet<String>,
}

impl ExtensionPointDescription {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
            node_set: NodeSetDescription::default(),
            owner: String::new(),
            addins: BTreeSet::new(),
        }
    }

    pub fn with_node_type(mut self, node_type: NodeTypeDescription) -> Self {
        self.node_set.node_types.push(node_type);
        self
    }
}

/// Set of node types permitted at a tree position
///
/// An empty set (no types and no references) accepts any node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeSetDescription {
    /// Name under which other sets may reference this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub node_types: Vec<NodeTypeDescription>,

    /// Ids of referenced node sets whose types are also permitted
    #[serde(default)]
    pub node_sets: Vec<String>,
}

impl NodeSetDescription {
    pub fn is_open(&self) -> bool {
        self.node_types.is_empty() && self.node_sets.is_empty()
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeTypeDescription> {
        self.node_types.iter().find(|t| t.name == name)
    }
}

/// A node type and the schema of its own children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeTypeDescription {
    pub name: String,

    /// Type name resolved in the contributing add-in's module when the
    /// node's attributes do not carry one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    /// Node types allowed below nodes of this type
    #[serde(default)]
    pub children: NodeSetDescription,
}

impl NodeTypeDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object_type: None,
            children: NodeSetDescription::default(),
        }
    }
}

/// A condition type implemented in an add-in module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConditionTypeDescription {
    /// Name used in condition expressions
    pub id: String,

    /// Type name resolved in the add-in's main module
    pub type_name: String,
}

/// Serialized registry document: a list of add-in descriptions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryDocument {
    #[serde(default)]
    pub addins: Vec<AddinDescription>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_node_type() -> String {
    "Type".to_string()
}
