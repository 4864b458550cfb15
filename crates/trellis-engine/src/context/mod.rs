//! Extension contexts
//!
//! An [`ExtensionContext`] is the query and subscription API over one
//! extension tree. The engine owns the root context; child contexts created
//! from it share its add-ins and structure but carry their own condition
//! types and properties. A path missing from a child context is copied from
//! the parent on first access, so overrides never touch the parent's tree.

mod extension_node;
mod snapshot;
mod transaction;

pub use extension_node::ExtensionNode;
pub(crate) use snapshot::ContextSnapshot;
pub(crate) use transaction::{Shared, Transaction};

use crate::engine::EngineInner;
use crate::error::{EngineError, Result};
use crate::events::{
    ExtensionEvent, ExtensionHandler, ExtensionNodeEvent, HandlerId, NodeLoadedHandler,
};
use crate::tree::TreeNode;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;
use trellis_conditions::{ConditionType, EvalContext, Value};
use trellis_core::path;

pub(crate) struct ContextInner {
    id: u64,
    parent: Option<Arc<ContextInner>>,
    pub(crate) shared: Arc<Shared>,
    engine: Weak<EngineInner>,
    root: Arc<TreeNode>,
    snapshot: RwLock<Arc<ContextSnapshot>>,
    children: Mutex<BTreeMap<u64, Weak<ContextInner>>>,
    extension_handlers: Mutex<Vec<(HandlerId, ExtensionHandler)>>,
    node_loaded_handlers: Mutex<Vec<(HandlerId, NodeLoadedHandler)>>,
    closed: AtomicBool,
}

fn next_context_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl ContextInner {
    pub fn new_root(shared: Arc<Shared>, engine: Weak<EngineInner>) -> Self {
        Self::build(None, shared, engine)
    }

    fn build(
        parent: Option<Arc<ContextInner>>,
        shared: Arc<Shared>,
        engine: Weak<EngineInner>,
    ) -> Self {
        Self {
            id: next_context_id(),
            parent,
            shared,
            engine,
            root: TreeNode::root(),
            snapshot: RwLock::new(Arc::new(ContextSnapshot::default())),
            children: Mutex::new(BTreeMap::new()),
            extension_handlers: Mutex::new(Vec::new()),
            node_loaded_handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> &Arc<TreeNode> {
        &self.root
    }

    pub fn engine(&self) -> Option<Arc<EngineInner>> {
        self.engine.upgrade()
    }

    pub fn begin(&self) -> Transaction<'_> {
        self.shared.begin()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Arc<ContextSnapshot> {
        self.snapshot.read().clone()
    }

    /// Edit the snapshot in place when unshared, otherwise publish a copy.
    /// Callers hold the transaction lock.
    fn edit_snapshot<R>(&self, f: impl FnOnce(&mut ContextSnapshot) -> R) -> R {
        let mut current = self.snapshot.write();
        f(Arc::make_mut(&mut current))
    }

    // Child contexts

    pub fn create_child(self: &Arc<Self>) -> Arc<ContextInner> {
        let child = Arc::new(Self::build(
            Some(self.clone()),
            self.shared.clone(),
            self.engine.clone(),
        ));
        self.children
            .lock()
            .insert(child.id, Arc::downgrade(&child));
        debug!("Created extension context {} under {}", child.id, self.id);
        child
    }

    pub fn child_contexts(&self) -> Vec<Arc<ContextInner>> {
        // Upgrade under the lock, drop outside it: releasing the last
        // handle runs Drop, which takes the same lock
        let children: Vec<_> = self
            .children
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        children.into_iter().filter(|c| !c.is_closed()).collect()
    }

    /// This context and every open context below it
    pub fn descendants(self: &Arc<Self>) -> Vec<Arc<ContextInner>> {
        let mut all = vec![self.clone()];
        let mut i = 0;
        while i < all.len() {
            let children = all[i].child_contexts();
            all.extend(children);
            i += 1;
        }
        all
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(parent) = &self.parent {
            parent.children.lock().remove(&self.id);
        }
        let _tx = self.begin();
        for (condition_type, subscription) in self.snapshot().subscriptions() {
            if let Some(signal) = condition_type.change_signal() {
                signal.unsubscribe(subscription);
            }
        }
        debug!("Closed extension context {}", self.id);
    }

    // Tree access

    /// Node at `path`, loading extension points on the way. Missing
    /// segments below plain path segments are looked up in the parent
    /// context, or in the root context by loading the add-ins defining
    /// extension points there.
    pub fn get_node(self: &Arc<Self>, node_path: &str) -> Option<Arc<TreeNode>> {
        let mut node = self.root.clone();
        for segment in path::segments(node_path) {
            self.ensure_loaded(&node);
            node = match node.child(segment) {
                Some(child) => child,
                None => self.materialize(&node, segment)?,
            };
        }
        self.ensure_loaded(&node);
        Some(node)
    }

    /// Node at `path` in the current structure, without loading anything
    pub fn find_node(&self, node_path: &str) -> Option<Arc<TreeNode>> {
        let mut node = self.root.clone();
        for segment in path::segments(node_path) {
            node = node.child(segment)?;
        }
        Some(node)
    }

    fn materialize(self: &Arc<Self>, parent: &Arc<TreeNode>, id: &str) -> Option<Arc<TreeNode>> {
        // Loaded extension points and contributed nodes are complete
        if !parent.is_bare() {
            return None;
        }
        let child_path = path::join(parent.path(), id);
        match &self.parent {
            Some(parent_ctx) => {
                let source = parent_ctx.get_node(&child_path)?;
                let tx = self.begin();
                if let Some(existing) = parent.child(id) {
                    return Some(existing);
                }
                let copy = TreeNode::copy_of(parent, &source);
                let mut children = parent.children().as_ref().clone();
                children.push(copy.clone());
                parent.set_children(children);
                tx.node_added(self, &copy);
                Some(copy)
            }
            None => {
                let engine = self.engine()?;
                engine.load_extension_point_owners(&child_path);
                parent.child(id)
            }
        }
    }

    /// Populate an extension point node on first access
    pub fn ensure_loaded(self: &Arc<Self>, node: &Arc<TreeNode>) {
        if node.is_loaded() {
            return;
        }
        let tx = self.begin();
        if node.is_loaded() || tx.is_loading(node.key()) {
            return;
        }
        if let (Some(ep), Some(engine)) = (node.extension_point(), self.engine()) {
            debug!("Loading extension point {} in context {}", ep.path, self.id);
            tx.start_loading(node.key());
            engine.populate(self, node, &ep, &tx, true);
            tx.finish_loading(node.key());
        }
        node.set_loaded(true);
    }

    /// Whether `node` passes its own condition
    pub fn is_visible(&self, node: &TreeNode) -> bool {
        match node.condition() {
            Some(condition) => condition.evaluate(&NodeEval {
                ctx: self,
                addin_id: node.data().map(|d| d.addin_id.as_str()),
            }),
            None => true,
        }
    }

    /// Whether `node` and every ancestor pass their conditions
    pub fn is_visible_path(&self, node: &Arc<TreeNode>) -> bool {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if !self.is_visible(&n) {
                return false;
            }
            current = n.parent();
        }
        true
    }

    pub fn visible_children(self: &Arc<Self>, node: &Arc<TreeNode>) -> Vec<Arc<TreeNode>> {
        self.ensure_loaded(node);
        node.children()
            .iter()
            .filter(|child| self.is_visible(child))
            .cloned()
            .collect()
    }

    // Conditions and properties

    pub fn bind_condition(&self, node: &Arc<TreeNode>) {
        if let Some(condition) = node.condition() {
            self.edit_snapshot(|s| s.bind(node, condition));
        }
    }

    /// Drop the condition bindings of `node` and everything below it
    pub fn unbind_subtree(&self, node: &Arc<TreeNode>) {
        let bound: Vec<_> = node
            .subtree()
            .into_iter()
            .filter(|n| n.condition().is_some())
            .collect();
        if bound.is_empty() {
            return;
        }
        self.edit_snapshot(|s| {
            for n in &bound {
                if let Some(condition) = n.condition() {
                    s.unbind(n.key(), condition);
                }
            }
        });
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        match self.snapshot().properties.get(name) {
            Some(value) => Some(value.clone()),
            None => self.parent.as_ref().and_then(|p| p.property(name)),
        }
    }

    pub fn condition_type(&self, id: &str) -> Option<Arc<dyn ConditionType>> {
        match self.snapshot().condition_type(id) {
            Some(condition_type) => Some(condition_type),
            None => self.parent.as_ref().and_then(|p| p.condition_type(id)),
        }
    }

    pub fn register_condition(self: &Arc<Self>, id: &str, condition_type: Arc<dyn ConditionType>) {
        let tx = self.begin();
        let subscription = condition_type.change_signal().map(|signal| {
            let ctx = Arc::downgrade(self);
            let condition_id = id.to_string();
            signal.subscribe(move || {
                if let Some(ctx) = ctx.upgrade() {
                    ctx.notify_condition_changed(&condition_id);
                }
            })
        });
        let previous = self.edit_snapshot(|s| {
            let info = s.conditions.entry(id.to_string()).or_default();
            let previous = info.condition_type.take().zip(info.subscription.take());
            info.condition_type = Some(condition_type);
            info.subscription = subscription;
            previous
        });
        unsubscribe(previous);
        debug!("Registered condition {} in context {}", id, self.id);
        self.mark_condition(&tx, id);
    }

    pub fn unregister_condition(self: &Arc<Self>, id: &str) -> bool {
        let tx = self.begin();
        let previous = self.edit_snapshot(|s| {
            let info = s.conditions.get_mut(id)?;
            let condition_type = info.condition_type.take()?;
            let subscription = info.subscription.take();
            Some((condition_type, subscription))
        });
        let Some((condition_type, subscription)) = previous else {
            return false;
        };
        unsubscribe(Some(condition_type).zip(subscription));
        self.mark_condition(&tx, id);
        true
    }

    pub fn notify_condition_changed(self: &Arc<Self>, id: &str) {
        let tx = self.begin();
        self.mark_condition(&tx, id);
    }

    fn mark_condition(self: &Arc<Self>, tx: &Transaction<'_>, id: &str) {
        for node in self.snapshot().nodes_bound_to_condition(id) {
            if let Some(parent) = node.parent() {
                tx.children_changed(self, &parent);
            }
        }
        for child in self.child_contexts() {
            if !child.snapshot().overrides_condition(id) {
                child.mark_condition(tx, id);
            }
        }
    }

    pub fn set_property(self: &Arc<Self>, name: &str, value: Value) {
        let tx = self.begin();
        self.edit_snapshot(|s| s.properties.insert(name.to_string(), value));
        self.mark_property(&tx, name);
    }

    pub fn remove_property(self: &Arc<Self>, name: &str) -> Option<Value> {
        let tx = self.begin();
        let removed = self.edit_snapshot(|s| s.properties.remove(name));
        if removed.is_some() {
            self.mark_property(&tx, name);
        }
        removed
    }

    fn mark_property(self: &Arc<Self>, tx: &Transaction<'_>, name: &str) {
        for node in self.snapshot().nodes_bound_to_property(name) {
            if let Some(parent) = node.parent() {
                tx.children_changed(self, &parent);
            }
        }
        for child in self.child_contexts() {
            if !child.snapshot().overrides_property(name) {
                child.mark_property(tx, name);
            }
        }
    }

    // Handlers

    pub fn extension_handlers(&self) -> Vec<ExtensionHandler> {
        self.extension_handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub fn node_loaded_handlers(&self) -> Vec<NodeLoadedHandler> {
        self.node_loaded_handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }
}

fn unsubscribe(registration: Option<(Arc<dyn ConditionType>, trellis_conditions::SubscriptionId)>) {
    if let Some((condition_type, subscription)) = registration {
        if let Some(signal) = condition_type.change_signal() {
            signal.unsubscribe(subscription);
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(parent) = &self.parent {
            parent.children.lock().remove(&self.id);
        }
    }
}

/// Evaluation environment for a node's condition in one context
struct NodeEval<'a> {
    ctx: &'a ContextInner,
    addin_id: Option<&'a str>,
}

impl EvalContext for NodeEval<'_> {
    fn property(&self, name: &str) -> Option<Value> {
        self.ctx.property(name)
    }

    fn condition_type(&self, name: &str) -> Option<Arc<dyn ConditionType>> {
        self.ctx.condition_type(name)
    }

    fn report_error(&self, message: &str, error: &dyn fmt::Display) {
        self.ctx.shared.sink.report(message, self.addin_id, Some(error));
    }
}

/// Query and subscription API over an extension tree
#[derive(Clone)]
pub struct ExtensionContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl ExtensionContext {
    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.is_closed() {
            Err(EngineError::ContextClosed)
        } else {
            Ok(())
        }
    }

    /// Visible node at `path`; `None` when the path does not exist or a
    /// condition on it is false
    pub fn get_extension_node(&self, path: &str) -> Option<Arc<ExtensionNode>> {
        if self.inner.is_closed() {
            return None;
        }
        let node = self.inner.get_node(path)?;
        if !self.inner.is_visible_path(&node) {
            return None;
        }
        Some(node.extension_node(&self.inner))
    }

    /// Visible children of the node at `path`; empty when it does not exist
    pub fn get_extension_nodes(&self, path: &str) -> Vec<Arc<ExtensionNode>> {
        match self.get_extension_node(path) {
            Some(node) => node.children(),
            None => Vec::new(),
        }
    }

    /// Visible children of the node at `path`, all of which must be of
    /// `node_type`
    pub fn get_extension_nodes_of_type(
        &self,
        path: &str,
        node_type: &str,
    ) -> Result<Vec<Arc<ExtensionNode>>> {
        self.check_open()?;
        let nodes = self.get_extension_nodes(path);
        if let Some(wrong) = nodes.iter().find(|n| n.node_type() != Some(node_type)) {
            return Err(EngineError::UnexpectedNodeType {
                path: wrong.path().to_string(),
                expected: node_type.to_string(),
                found: wrong.node_type().unwrap_or_default().to_string(),
            });
        }
        Ok(nodes)
    }

    /// Shared instances of the objects described by the children of `path`
    pub fn get_extension_objects<T: Any + Send + Sync>(&self, path: &str) -> Result<Vec<Arc<T>>> {
        self.check_open()?;
        self.get_extension_nodes(path)
            .iter()
            .map(|node| node.get_instance::<T>())
            .collect()
    }

    /// Subscribe to child changes under `path`. Existing children are
    /// delivered as `Added` before this returns.
    pub fn add_extension_node_handler(
        &self,
        path: &str,
        handler: impl Fn(&ExtensionNodeEvent) + Send + Sync + 'static,
    ) -> Result<HandlerId> {
        self.check_open()?;
        let node = self
            .inner
            .get_node(path)
            .ok_or_else(|| EngineError::path_not_found(path))?;
        node.extension_node(&self.inner).add_handler(handler)
    }

    pub fn remove_extension_node_handler(&self, path: &str, id: HandlerId) -> Result<bool> {
        self.check_open()?;
        let node = self
            .inner
            .find_node(path)
            .ok_or_else(|| EngineError::path_not_found(path))?;
        Ok(node
            .attached_extension_node()
            .is_some_and(|ext| ext.remove_handler(id)))
    }

    /// Subscribe to "the contents of a path changed" events for any path
    pub fn add_extension_changed_handler(
        &self,
        handler: impl Fn(&ExtensionEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId::next();
        self.inner
            .extension_handlers
            .lock()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_extension_changed_handler(&self, id: HandlerId) -> bool {
        remove_handler(&self.inner.extension_handlers, id)
    }

    /// Subscribe to the creation of contributed nodes in this context
    pub fn add_node_loaded_handler(
        &self,
        handler: impl Fn(&Arc<ExtensionNode>) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId::next();
        self.inner
            .node_loaded_handlers
            .lock()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_node_loaded_handler(&self, id: HandlerId) -> bool {
        remove_handler(&self.inner.node_loaded_handlers, id)
    }

    /// Register a condition type under `id`, overriding any registration
    /// inherited from the parent context
    pub fn register_condition(
        &self,
        id: &str,
        condition_type: impl ConditionType + 'static,
    ) -> Result<()> {
        self.register_condition_arc(id, Arc::new(condition_type))
    }

    pub fn register_condition_arc(
        &self,
        id: &str,
        condition_type: Arc<dyn ConditionType>,
    ) -> Result<()> {
        self.check_open()?;
        self.inner.register_condition(id, condition_type);
        Ok(())
    }

    /// Remove a condition type registered in this context
    pub fn unregister_condition(&self, id: &str) -> Result<bool> {
        self.check_open()?;
        Ok(self.inner.unregister_condition(id))
    }

    /// Re-evaluate every node whose condition calls `id`
    pub fn notify_condition_changed(&self, id: &str) {
        self.inner.notify_condition_changed(id);
    }

    /// Set a property readable by bare names in conditions
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.check_open()?;
        self.inner.set_property(name, value.into());
        Ok(())
    }

    pub fn remove_property(&self, name: &str) -> Result<Option<Value>> {
        self.check_open()?;
        Ok(self.inner.remove_property(name))
    }

    /// Property value, inherited from the parent context when not set here
    pub fn property(&self, name: &str) -> Option<Value> {
        self.inner.property(name)
    }

    pub fn create_child_context(&self) -> Result<ExtensionContext> {
        self.check_open()?;
        Ok(Self::from_inner(self.inner.create_child()))
    }

    pub fn parent(&self) -> Option<ExtensionContext> {
        self.inner.parent.clone().map(Self::from_inner)
    }

    /// Detach from the parent context. Dropping the last handle does the
    /// same; until then the parent keeps a registry entry.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

fn remove_handler<H>(handlers: &Mutex<Vec<(HandlerId, H)>>, id: HandlerId) -> bool {
    let mut handlers = handlers.lock();
    let before = handlers.len();
    handlers.retain(|(hid, _)| *hid != id);
    handlers.len() != before
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("id", &self.inner.id)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}
