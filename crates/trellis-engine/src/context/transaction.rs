//! Extension context transactions
//!
//! One reentrant lock guards the tree structure, condition bindings and
//! add-in state of a whole context hierarchy. A [`Transaction`] holds it for
//! its scope and records what changed; when the outermost transaction on a
//! thread ends, the recorded changes are turned into notifications, the lock
//! is released, and only then are the notifications queued for delivery.

use super::ContextInner;
use crate::error_sink::ErrorSink;
use crate::events::{ExtensionEvent, ExtensionHandler, NodeLoadedHandler};
use crate::notification::{Notification, NotificationQueue};
use crate::tree::TreeNode;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

/// State shared by every context of one engine
pub(crate) struct Shared {
    lock: ReentrantMutex<RefCell<TxState>>,
    pub queue: NotificationQueue,
    pub sink: Arc<ErrorSink>,
}

impl Shared {
    pub fn new(sink: Arc<ErrorSink>) -> Self {
        Self {
            lock: ReentrantMutex::new(RefCell::new(TxState::default())),
            queue: NotificationQueue::new(sink.clone()),
            sink,
        }
    }

    /// Begin a transaction, joining the current one when this thread
    /// already holds the lock
    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.lock.lock();
        guard.borrow_mut().depth += 1;
        Transaction {
            shared: self,
            guard: Some(guard),
        }
    }
}

#[derive(Default)]
struct TxState {
    depth: usize,
    loading: HashSet<u64>,
    added: Vec<(Arc<ContextInner>, Arc<TreeNode>)>,
    changed: Vec<(Arc<ContextInner>, Arc<TreeNode>)>,
    deferred: Vec<Notification>,
}

pub(crate) struct Transaction<'a> {
    shared: &'a Shared,
    guard: Option<ReentrantMutexGuard<'a, RefCell<TxState>>>,
}

impl Transaction<'_> {
    // The guard is only taken in drop
    fn with_state<R: Default>(&self, f: impl FnOnce(&mut TxState) -> R) -> R {
        self.guard
            .as_ref()
            .map(|guard| f(&mut guard.borrow_mut()))
            .unwrap_or_default()
    }

    /// Record a node whose child list changed
    pub fn children_changed(&self, ctx: &Arc<ContextInner>, node: &Arc<TreeNode>) {
        self.with_state(|s| s.changed.push((ctx.clone(), node.clone())));
    }

    /// Record a newly created node: bind its condition and queue a
    /// "node loaded" notification
    pub fn node_added(&self, ctx: &Arc<ContextInner>, node: &Arc<TreeNode>) {
        ctx.bind_condition(node);
        self.with_state(|s| s.added.push((ctx.clone(), node.clone())));
    }

    pub fn is_loading(&self, key: u64) -> bool {
        self.with_state(|s| s.loading.contains(&key))
    }

    pub fn start_loading(&self, key: u64) {
        self.with_state(|s| s.loading.insert(key));
    }

    pub fn finish_loading(&self, key: u64) {
        self.with_state(|s| s.loading.remove(&key));
    }

    /// Run a notification after the transaction commits
    pub fn defer(&self, notification: Notification) {
        self.with_state(|s| s.deferred.push(notification));
    }

    fn commit(state: &mut TxState) -> Vec<Notification> {
        let mut notifications = Vec::new();

        for (ctx, node) in state.added.drain(..) {
            let handlers: Vec<NodeLoadedHandler> = ctx.node_loaded_handlers();
            if handlers.is_empty() {
                continue;
            }
            let addin = node.data().map(|d| d.addin_id.clone());
            let action = move || {
                let ext = node.extension_node(&ctx);
                for handler in &handlers {
                    ctx.shared
                        .sink
                        .guard(addin.as_deref(), "node loaded handler", || handler(&ext));
                }
            };
            notifications.push(Notification::new(action));
        }

        let mut seen_nodes = HashSet::new();
        let mut seen_paths = HashSet::new();
        for (ctx, node) in state.changed.drain(..) {
            if seen_nodes.insert(node.key()) {
                if let Some(ext) = node.attached_extension_node() {
                    let (ext, ctx, node) = (ext.clone(), ctx.clone(), node.clone());
                    notifications.push(Notification::new(move || ext.deliver_changes(&ctx, &node)));
                }
            }
            if seen_paths.insert((ctx.id(), node.path().to_string())) {
                let handlers: Vec<ExtensionHandler> = ctx.extension_handlers();
                if handlers.is_empty() {
                    continue;
                }
                let event = ExtensionEvent {
                    path: node.path().to_string(),
                };
                notifications.push(Notification::new(move || {
                    for handler in &handlers {
                        ctx.shared
                            .sink
                            .guard(None, "extension changed handler", || handler(&event));
                    }
                }));
            }
        }

        notifications.append(&mut state.deferred);
        notifications
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let notifications = {
            let mut state = guard.borrow_mut();
            state.depth -= 1;
            if state.depth > 0 {
                None
            } else {
                state.loading.clear();
                Some(Self::commit(&mut state))
            }
        };
        drop(guard);
        if let Some(notifications) = notifications {
            self.shared.queue.enqueue_all(notifications);
        }
    }
}
