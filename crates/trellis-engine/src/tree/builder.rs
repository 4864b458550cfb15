//! Batch construction of extension point contents
//!
//! [`TreeBuilder`] collects the extensions of every contributing add-in into
//! a detached tree of [`BuilderNode`]s, validating node types against the
//! extension point's node set and compiling conditions as it goes. [`bake`]
//! then merges the result into the live tree inside a transaction, keeping
//! the identity of nodes that did not change.

use super::node::{NodeData, TreeNode};
use crate::context::{ContextInner, Transaction};
use crate::error_sink::ErrorSink;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use trellis_conditions::Condition;
use trellis_core::path;
use trellis_core::types::{
    ExtensionDescription, ExtensionPointDescription, NodeDescription, NodeSetDescription,
    NodeTypeDescription,
};
use tracing::warn;

/// A node of the detached build tree
#[derive(Debug)]
pub(crate) struct BuilderNode {
    pub id: String,
    pub data: Arc<NodeData>,
    pub condition: Option<Arc<Condition>>,
    pub children: Vec<BuilderNode>,
    /// Node set governing this node's children
    children_set: NodeSetDescription,
}

struct BuildEnv<'a> {
    named_sets: &'a HashMap<String, NodeSetDescription>,
    sink: &'a ErrorSink,
    /// Anonymous nodes numbered so far, per contributing add-in
    generated: HashMap<String, usize>,
}

/// Builds the children of one extension point
pub(crate) struct TreeBuilder<'a> {
    root_path: String,
    root_set: NodeSetDescription,
    roots: Vec<BuilderNode>,
    env: BuildEnv<'a>,
}

enum Allowed {
    Any,
    Type(NodeTypeDescription),
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        extension_point: &ExtensionPointDescription,
        named_sets: &'a HashMap<String, NodeSetDescription>,
        sink: &'a ErrorSink,
    ) -> Self {
        Self {
            root_path: path::normalize(&extension_point.path),
            root_set: extension_point.node_set.clone(),
            roots: Vec::new(),
            env: BuildEnv {
                named_sets,
                sink,
                generated: HashMap::new(),
            },
        }
    }

    /// Add the nodes of one extension. The extension path must be the
    /// extension point itself or a node already added below it.
    pub fn add_extension(&mut self, addin_id: &str, extension: &ExtensionDescription) {
        let target = path::normalize(&extension.path);
        if !path::is_within(&target, &self.root_path) {
            return;
        }
        let relative = &target[self.root_path.len()..];

        let mut siblings = &mut self.roots;
        let mut set = &self.root_set;
        for segment in path::segments(relative) {
            match siblings.iter_mut().find(|n| n.id == segment) {
                Some(node) => {
                    set = &node.children_set;
                    siblings = &mut node.children;
                }
                None => {
                    warn!(
                        "Add-in {} extends {} but no node exists at {}",
                        addin_id, target, segment
                    );
                    return;
                }
            }
        }
        let set = set.clone();
        self.env
            .add_nodes(siblings, &set, addin_id, &extension.nodes, &target);
    }

    pub fn finish(self) -> Vec<BuilderNode> {
        self.roots
    }
}

impl BuildEnv<'_> {
    fn add_nodes(
        &mut self,
        siblings: &mut Vec<BuilderNode>,
        set: &NodeSetDescription,
        addin_id: &str,
        nodes: &[NodeDescription],
        parent_path: &str,
    ) {
        for description in nodes {
            let Some(allowed) = self.allowed(set, &description.node_type) else {
                self.sink.report(
                    &format!(
                        "Node type '{}' is not allowed at {}",
                        description.node_type, parent_path
                    ),
                    Some(addin_id),
                    None,
                );
                continue;
            };

            let id = match &description.id {
                Some(id) => id.clone(),
                None => self.generate_id(addin_id),
            };
            if siblings.iter().any(|s| s.id == id) {
                self.sink.report(
                    &format!("Duplicate node id '{}' at {}", id, parent_path),
                    Some(addin_id),
                    None,
                );
                continue;
            }

            let condition = match &description.condition {
                Some(source) => match Condition::parse(source) {
                    Ok(condition) => Some(Arc::new(condition)),
                    Err(e) => {
                        self.sink.report(
                            &format!("Invalid condition on node '{}' at {}", id, parent_path),
                            Some(addin_id),
                            Some(&e),
                        );
                        continue;
                    }
                },
                None => None,
            };

            let (children_set, object_type) = match allowed {
                Allowed::Any => (NodeSetDescription::default(), None),
                Allowed::Type(t) => (t.children, t.object_type),
            };
            let path = path::join(parent_path, &id);
            let mut node = BuilderNode {
                id,
                data: Arc::new(NodeData {
                    addin_id: addin_id.to_string(),
                    node_type: description.node_type.clone(),
                    attributes: description.attributes.clone(),
                    object_type,
                }),
                condition,
                children: Vec::new(),
                children_set,
            };
            self.add_nodes(
                &mut node.children,
                &node.children_set,
                addin_id,
                &description.children,
                &path,
            );

            let index = position(siblings, description);
            siblings.insert(index, node);
        }
    }

    fn allowed(&self, set: &NodeSetDescription, node_type: &str) -> Option<Allowed> {
        if set.is_open() {
            return Some(Allowed::Any);
        }
        let mut visited = HashSet::new();
        self.find_type(set, node_type, &mut visited).map(Allowed::Type)
    }

    fn find_type<'s>(
        &'s self,
        set: &'s NodeSetDescription,
        node_type: &str,
        visited: &mut HashSet<&'s str>,
    ) -> Option<NodeTypeDescription> {
        if let Some(found) = set.node_type(node_type) {
            return Some(found.clone());
        }
        for reference in &set.node_sets {
            if !visited.insert(reference.as_str()) {
                continue;
            }
            if let Some(named) = self.named_sets.get(reference) {
                if let Some(found) = self.find_type(named, node_type, visited) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Numbered within the add-in, so other contributors never shift it
    fn generate_id(&mut self, addin_id: &str) -> String {
        let counter = self.generated.entry(addin_id.to_string()).or_default();
        *counter += 1;
        format!("__{}_{}", addin_id, counter)
    }
}

/// Index honouring `insert-before` / `insert-after`; appends when the
/// referenced sibling is absent
fn position(siblings: &[BuilderNode], description: &NodeDescription) -> usize {
    let find = |id: &String| siblings.iter().position(|s| &s.id == id);
    if let Some(index) = description.insert_before.as_ref().and_then(find) {
        return index;
    }
    if let Some(index) = description.insert_after.as_ref().and_then(find) {
        return index + 1;
    }
    siblings.len()
}

/// Merge built nodes into the children of `parent`.
///
/// Existing children with the same id, add-in and type are kept (and merged
/// recursively), so only real additions and removals reach the diff. Nodes
/// without add-in data (path segments, extension point anchors) are kept
/// unless a built node takes their id. A new node whose path is a bound
/// extension point gets the binding and stays unloaded; its inline children
/// are dropped in favour of the extension point's contributors.
pub(crate) fn bake(
    ctx: &Arc<ContextInner>,
    parent: &Arc<TreeNode>,
    nodes: Vec<BuilderNode>,
    tx: &Transaction<'_>,
    bound_extension_point: &dyn Fn(&str) -> Option<Arc<ExtensionPointDescription>>,
) {
    let old = parent.children();
    let mut children: Vec<Arc<TreeNode>> = Vec::with_capacity(nodes.len());

    for built in nodes {
        let reused = old
            .iter()
            .find(|o| {
                o.id() == built.id
                    && o.data().is_some_and(|d| {
                        d.addin_id == built.data.addin_id && d.node_type == built.data.node_type
                    })
            })
            .cloned();

        let node = match reused {
            Some(existing) => {
                if existing.extension_point().is_none() {
                    bake(ctx, &existing, built.children, tx, bound_extension_point);
                }
                existing
            }
            None => {
                let node = TreeNode::contributed(parent, &built.id, built.data, built.condition);
                match bound_extension_point(node.path()) {
                    Some(ep) => {
                        node.set_extension_point(Some(ep));
                        node.set_loaded(false);
                    }
                    None => bake(ctx, &node, built.children, tx, bound_extension_point),
                }
                tx.node_added(ctx, &node);
                node
            }
        };
        children.push(node);
    }

    for anchor in old.iter().filter(|o| o.data().is_none()) {
        if !children.iter().any(|c| c.id() == anchor.id()) {
            children.push(anchor.clone());
        }
    }

    for removed in old
        .iter()
        .filter(|o| !children.iter().any(|c| c.key() == o.key()))
    {
        ctx.unbind_subtree(removed);
    }

    let unchanged = old.len() == children.len()
        && old.iter().zip(&children).all(|(a, b)| a.key() == b.key());
    if !unchanged {
        parent.set_children(children);
        tx.children_changed(ctx, parent);
    }
}
