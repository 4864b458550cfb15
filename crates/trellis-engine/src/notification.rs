//! Serialized delivery of change notifications
//!
//! Notifications are queued rather than invoked in place. The first thread
//! that enqueues while the queue is idle drains it; notifications raised
//! while draining (including from inside a callback) are appended and run by
//! the same thread, in order. A reference-counted freeze holds delivery back
//! while a handler subscribes and replays existing children.

use crate::error_sink::ErrorSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A queued callback, optionally attributed to an add-in for error reports
pub struct Notification {
    addin_id: Option<String>,
    action: Box<dyn FnOnce() + Send>,
}

impl Notification {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            addin_id: None,
            action: Box::new(action),
        }
    }

    pub fn for_addin(addin_id: impl Into<String>, action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            addin_id: Some(addin_id.into()),
            action: Box::new(action),
        }
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Notification>,
    draining: bool,
    frozen: usize,
}

pub struct NotificationQueue {
    state: Mutex<QueueState>,
    sink: Arc<ErrorSink>,
}

impl NotificationQueue {
    pub fn new(sink: Arc<ErrorSink>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            sink,
        }
    }

    /// Queue a notification, draining the queue if no other thread is
    #[cfg(test)]
    pub fn enqueue(&self, notification: Notification) {
        self.enqueue_all(std::iter::once(notification));
    }

    /// Queue notifications in order
    pub fn enqueue_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        {
            let mut state = self.state.lock();
            state.items.extend(notifications);
            if state.draining || state.frozen > 0 || state.items.is_empty() {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Suppress delivery until the returned guard is dropped
    pub fn freeze(&self) -> FreezeGuard<'_> {
        self.state.lock().frozen += 1;
        FreezeGuard { queue: self }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.state.lock().items.len()
    }

    fn unfreeze(&self) {
        {
            let mut state = self.state.lock();
            state.frozen = state.frozen.saturating_sub(1);
            if state.frozen > 0 || state.draining || state.items.is_empty() {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.frozen > 0 {
                    state.draining = false;
                    return;
                }
                match state.items.pop_front() {
                    Some(next) => next,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            let Notification { addin_id, action } = next;
            self.sink
                .guard(addin_id.as_deref(), "notification handler", action);
        }
    }
}

/// Holds the queue frozen while alive
pub struct FreezeGuard<'a> {
    queue: &'a NotificationQueue,
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        self.queue.unfreeze();
    }
}
