//! Extension tree nodes
//!
//! A [`TreeNode`] is one path segment of a context's tree. Child lists are
//! immutable `Arc<Vec<_>>` values replaced wholesale, so readers clone the
//! current list and never observe a half-applied change. Every structural
//! edit goes through a [`Transaction`], which records the change for
//! notification.

use crate::context::{ContextInner, ExtensionNode, Transaction};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use trellis_conditions::Condition;
use trellis_core::path;
use trellis_core::types::ExtensionPointDescription;

/// Metadata of a node contributed by an add-in
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NodeData {
    pub addin_id: String,
    pub node_type: String,
    pub attributes: BTreeMap<String, String>,
    /// Object type declared by the node type, used when the attributes
    /// carry no `type`
    pub object_type: Option<String>,
}

pub(crate) struct TreeNode {
    key: u64,
    id: String,
    path: String,
    parent: Weak<TreeNode>,
    data: Option<Arc<NodeData>>,
    condition: Option<Arc<Condition>>,
    children: RwLock<Arc<Vec<Arc<TreeNode>>>>,
    loaded: AtomicBool,
    extension_point: RwLock<Option<Arc<ExtensionPointDescription>>>,
    extension_node: OnceLock<Arc<ExtensionNode>>,
}

fn next_key() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl TreeNode {
    fn build(
        parent: Option<&Arc<TreeNode>>,
        id: &str,
        data: Option<Arc<NodeData>>,
        condition: Option<Arc<Condition>>,
        extension_point: Option<Arc<ExtensionPointDescription>>,
    ) -> Arc<Self> {
        let path = match parent {
            Some(p) => path::join(p.path(), id),
            None => String::new(),
        };
        Arc::new(Self {
            key: next_key(),
            id: id.to_string(),
            path,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            data,
            condition,
            children: RwLock::new(Arc::new(Vec::new())),
            loaded: AtomicBool::new(extension_point.is_none()),
            extension_point: RwLock::new(extension_point),
            extension_node: OnceLock::new(),
        })
    }

    /// Tree root: empty id, always loaded
    pub fn root() -> Arc<Self> {
        Self::build(None, "", None, None, None)
    }

    /// Plain path segment leading towards an extension point
    pub fn segment(parent: &Arc<TreeNode>, id: &str) -> Arc<Self> {
        Self::build(Some(parent), id, None, None, None)
    }

    /// Node anchoring an extension point; starts unloaded
    pub fn anchor(
        parent: &Arc<TreeNode>,
        id: &str,
        extension_point: Arc<ExtensionPointDescription>,
    ) -> Arc<Self> {
        Self::build(Some(parent), id, None, None, Some(extension_point))
    }

    /// Node contributed by an add-in
    pub fn contributed(
        parent: &Arc<TreeNode>,
        id: &str,
        data: Arc<NodeData>,
        condition: Option<Arc<Condition>>,
    ) -> Arc<Self> {
        Self::build(Some(parent), id, Some(data), condition, None)
    }

    /// Local copy of a node from another context's tree. Children are not
    /// copied; an extension point binding is copied unloaded so the local
    /// context populates it itself.
    pub fn copy_of(parent: &Arc<TreeNode>, source: &TreeNode) -> Arc<Self> {
        Self::build(
            Some(parent),
            &source.id,
            source.data.clone(),
            source.condition.clone(),
            source.extension_point(),
        )
    }

    /// Process-unique key, stable for the node's lifetime
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<Arc<TreeNode>> {
        self.parent.upgrade()
    }

    pub fn data(&self) -> Option<&Arc<NodeData>> {
        self.data.as_ref()
    }

    pub fn condition(&self) -> Option<&Arc<Condition>> {
        self.condition.as_ref()
    }

    /// Current child list
    pub fn children(&self) -> Arc<Vec<Arc<TreeNode>>> {
        self.children.read().clone()
    }

    pub fn child(&self, id: &str) -> Option<Arc<TreeNode>> {
        self.children.read().iter().find(|c| c.id == id).cloned()
    }

    /// Neither contributed by an add-in nor anchoring an extension point
    pub fn is_bare(&self) -> bool {
        self.data.is_none() && self.extension_point.read().is_none()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::Release);
    }

    pub fn extension_point(&self) -> Option<Arc<ExtensionPointDescription>> {
        self.extension_point.read().clone()
    }

    /// Bind or clear the extension point. Callers hold the transaction lock.
    pub fn set_extension_point(&self, extension_point: Option<Arc<ExtensionPointDescription>>) {
        *self.extension_point.write() = extension_point;
    }

    /// Replace the child list. Callers hold the transaction lock and record
    /// the change on it when it must be notified.
    pub fn set_children(&self, children: Vec<Arc<TreeNode>>) {
        *self.children.write() = Arc::new(children);
    }

    /// Public wrapper for this node in `ctx`, created on first use
    pub fn extension_node(self: &Arc<Self>, ctx: &Arc<ContextInner>) -> Arc<ExtensionNode> {
        self.extension_node
            .get_or_init(|| Arc::new(ExtensionNode::new(self, ctx)))
            .clone()
    }

    /// Wrapper if one was created
    pub fn attached_extension_node(&self) -> Option<&Arc<ExtensionNode>> {
        self.extension_node.get()
    }

    pub fn get_or_create_child(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        ctx: &Arc<ContextInner>,
        id: &str,
    ) -> Arc<TreeNode> {
        if let Some(child) = self.child(id) {
            return child;
        }
        let child = TreeNode::segment(self, id);
        self.add_child(tx, ctx, child.clone());
        child
    }

    pub fn add_child(self: &Arc<Self>, tx: &Transaction<'_>, ctx: &Arc<ContextInner>, child: Arc<TreeNode>) {
        let len = self.children.read().len();
        self.insert_child(tx, ctx, len, child);
    }

    /// Insert a child created for this node at `index` (clamped)
    pub fn insert_child(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        ctx: &Arc<ContextInner>,
        index: usize,
        child: Arc<TreeNode>,
    ) {
        let mut children = self.children().as_ref().clone();
        let index = index.min(children.len());
        children.insert(index, child);
        self.set_children(children);
        tx.children_changed(ctx, self);
    }

    pub fn remove_child(
        self: &Arc<Self>,
        tx: &Transaction<'_>,
        ctx: &Arc<ContextInner>,
        id: &str,
    ) -> Option<Arc<TreeNode>> {
        let mut children = self.children().as_ref().clone();
        let index = children.iter().position(|c| c.id == id)?;
        let removed = children.remove(index);
        self.set_children(children);
        tx.children_changed(ctx, self);
        Some(removed)
    }

    /// This node and every node below it, parents first
    pub fn subtree(self: &Arc<Self>) -> Vec<Arc<TreeNode>> {
        let mut nodes = vec![self.clone()];
        let mut i = 0;
        while i < nodes.len() {
            let children = nodes[i].children();
            nodes.extend(children.iter().cloned());
            i += 1;
        }
        nodes
    }
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .field("children", &self.children.read().len())
            .finish()
    }
}
