//! Public extension nodes
//!
//! An [`ExtensionNode`] is the host-facing wrapper of one tree node in one
//! context. It exposes the node's metadata and visible children, creates the
//! objects the node describes, and delivers child added/removed events to
//! subscribed handlers.
//!
//! Events are computed by diffing the visible children against the list the
//! handlers last observed, so a delivery never reports a change twice or
//! misses one. Lock order is delivery, then observed state, then the
//! transaction lock. A handler that subscribes on another node while that
//! node's delivery holds the transaction lock can deadlock; hosts should not
//! subscribe from inside condition predicates or module loaders.

use super::ContextInner;
use crate::error::{EngineError, Result};
use crate::events::{ExtensionNodeEvent, HandlerId, NodeChange, NodeHandler};
use crate::module::Object;
use crate::tree::{NodeData, TreeNode};
use parking_lot::{Mutex, ReentrantMutex};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct ObservedState {
    /// Children as last delivered; `None` until the first subscription
    children: Option<Vec<Arc<ExtensionNode>>>,
    handlers: Vec<(HandlerId, NodeHandler)>,
}

pub struct ExtensionNode {
    tree: Weak<TreeNode>,
    context: Weak<ContextInner>,
    key: u64,
    id: String,
    path: String,
    data: Option<Arc<NodeData>>,
    state: Mutex<ObservedState>,
    delivery: ReentrantMutex<()>,
    instance: Mutex<Option<Object>>,
}

impl ExtensionNode {
    pub(crate) fn new(tree: &Arc<TreeNode>, context: &Arc<ContextInner>) -> Self {
        Self {
            tree: Arc::downgrade(tree),
            context: Arc::downgrade(context),
            key: tree.key(),
            id: tree.id().to_string(),
            path: tree.path().to_string(),
            data: tree.data().cloned(),
            state: Mutex::new(ObservedState::default()),
            delivery: ReentrantMutex::new(()),
            instance: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Contributing add-in; `None` for path segments and extension point
    /// anchors
    pub fn addin_id(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.addin_id.as_str())
    }

    pub fn node_type(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.node_type.as_str())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.attributes.get(name))
            .map(String::as_str)
    }

    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.data
            .as_ref()
            .map(|d| d.attributes.clone())
            .unwrap_or_default()
    }

    /// Visible children, loading the extension point on first access
    pub fn children(&self) -> Vec<Arc<ExtensionNode>> {
        match (self.tree.upgrade(), self.context.upgrade()) {
            (Some(tree), Some(ctx)) => ctx
                .visible_children(&tree)
                .iter()
                .map(|child| child.extension_node(&ctx))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn child(&self, id: &str) -> Option<Arc<ExtensionNode>> {
        self.children().into_iter().find(|c| c.id == id)
    }

    pub fn has_children(&self) -> bool {
        !self.children().is_empty()
    }

    /// Create a new instance of the object type this node describes: the
    /// `type` attribute, or the node type's declared object type
    pub fn create_instance<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let (type_name, object) = self.create_object()?;
        downcast(&type_name, object)
    }

    /// Shared instance, created on first call
    pub fn get_instance<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let existing = self.instance.lock().clone();
        let object = match existing {
            Some(object) => object,
            None => {
                let (_, created) = self.create_object()?;
                self.instance.lock().get_or_insert(created).clone()
            }
        };
        downcast(self.type_name().unwrap_or_default(), object)
    }

    fn type_name(&self) -> Option<&str> {
        let data = self.data.as_ref()?;
        data.attributes
            .get("type")
            .or(data.object_type.as_ref())
            .map(String::as_str)
    }

    fn create_object(&self) -> Result<(String, Object)> {
        let data = self.data.as_ref().ok_or_else(|| {
            EngineError::type_resolution("", &self.path, "node was not contributed by an add-in")
        })?;
        let type_name = self.type_name().ok_or_else(|| {
            EngineError::type_resolution(&data.addin_id, &self.path, "node declares no object type")
        })?;
        let ctx = self.context.upgrade().ok_or(EngineError::ContextClosed)?;
        let engine = ctx.engine().ok_or(EngineError::EngineShutdown)?;
        let object = engine.create_object(&data.addin_id, type_name)?;
        Ok((type_name.to_string(), object))
    }

    /// Subscribe to child changes. Every currently visible child is replayed
    /// as `Added` to this handler before returning.
    pub fn add_handler(
        &self,
        handler: impl Fn(&ExtensionNodeEvent) + Send + Sync + 'static,
    ) -> Result<HandlerId> {
        let ctx = self.context.upgrade().ok_or(EngineError::ContextClosed)?;
        let tree = self.tree.upgrade().ok_or(EngineError::ContextClosed)?;
        let handler: NodeHandler = Arc::new(handler);
        let id = HandlerId::next();

        let _frozen = ctx.shared.queue.freeze();
        let _delivery = self.delivery.lock();
        let replay = {
            let mut state = self.state.lock();
            if state.children.is_none() {
                // Materialize under the transaction lock so no commit can
                // slip between reading the children and attaching
                let _tx = ctx.begin();
                state.children = Some(self.visible(&ctx, &tree));
            }
            state.handlers.push((id, handler.clone()));
            state.children.clone().unwrap_or_default()
        };
        for child in replay {
            self.invoke(&ctx, &handler, NodeChange::Added, child);
        }
        Ok(id)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut state = self.state.lock();
        let before = state.handlers.len();
        state.handlers.retain(|(hid, _)| *hid != id);
        if state.handlers.is_empty() {
            state.children = None;
        }
        state.handlers.len() != before
    }

    /// Diff the visible children of `tree` against the observed list and
    /// notify. The caller keeps the tree node alive, so a node detached by
    /// the same transaction still reports its children as removed.
    pub(crate) fn deliver_changes(&self, ctx: &Arc<ContextInner>, tree: &Arc<TreeNode>) {
        let _delivery = self.delivery.lock();
        let (events, handlers) = {
            let mut state = self.state.lock();
            if state.handlers.is_empty() {
                return;
            }
            let current = self.visible(ctx, tree);
            let previous = state.children.take().unwrap_or_default();

            let mut events = Vec::new();
            for old in &previous {
                if !current.iter().any(|c| c.key == old.key) {
                    events.push((NodeChange::Removed, old.clone()));
                }
            }
            for new in &current {
                if !previous.iter().any(|p| p.key == new.key) {
                    events.push((NodeChange::Added, new.clone()));
                }
            }
            state.children = Some(current);
            let handlers: Vec<NodeHandler> =
                state.handlers.iter().map(|(_, h)| h.clone()).collect();
            (events, handlers)
        };

        for (change, node) in events {
            for handler in &handlers {
                self.invoke(ctx, handler, change, node.clone());
            }
        }
    }

    fn visible(&self, ctx: &Arc<ContextInner>, tree: &Arc<TreeNode>) -> Vec<Arc<ExtensionNode>> {
        ctx.visible_children(tree)
            .iter()
            .map(|child| child.extension_node(ctx))
            .collect()
    }

    fn invoke(
        &self,
        ctx: &ContextInner,
        handler: &NodeHandler,
        change: NodeChange,
        node: Arc<ExtensionNode>,
    ) {
        let addin = node.addin_id().map(String::from);
        let event = ExtensionNodeEvent {
            change,
            path: self.path.clone(),
            node,
        };
        ctx.shared
            .sink
            .guard(addin.as_deref(), "extension node handler", || handler(&event));
    }
}

fn downcast<T: Any + Send + Sync>(type_name: &str, object: Object) -> Result<Arc<T>> {
    object
        .downcast::<T>()
        .map_err(|_| EngineError::UnexpectedObjectType {
            type_name: type_name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
        })
}

impl fmt::Debug for ExtensionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionNode")
            .field("path", &self.path)
            .field("addin", &self.addin_id())
            .field("type", &self.node_type())
            .finish()
    }
}
