//! Engine-wide error reporting
//!
//! Recoverable failures (condition errors, handler panics, skipped nodes and
//! modules) are logged and forwarded to registered error handlers instead of
//! being raised to the caller.

use crate::events::{AddinErrorEvent, ErrorHandler, HandlerId};
use chrono::Utc;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

#[derive(Default)]
pub struct ErrorSink {
    handlers: Mutex<Vec<(HandlerId, ErrorHandler)>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: ErrorHandler) -> HandlerId {
        let id = HandlerId::next();
        self.handlers.lock().push((id, handler));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Log an error and forward it to every handler
    pub fn report(&self, message: &str, addin_id: Option<&str>, err: Option<&dyn fmt::Display>) {
        let event = AddinErrorEvent {
            message: message.to_string(),
            addin_id: addin_id.map(String::from),
            error: err.map(|e| e.to_string()),
            timestamp: Utc::now(),
        };
        error!("{}", event);

        let handlers: Vec<ErrorHandler> = self.handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            // A failing error handler is only logged
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!("Error handler panicked: {}", panic_message(&*payload));
            }
        }
    }

    /// Run a host callback, reporting a panic instead of propagating it
    pub fn guard(&self, addin_id: Option<&str>, what: &str, f: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            let message = panic_message(&*payload);
            self.report(&format!("Panic in {}", what), addin_id, Some(&message));
        }
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}

/// Extract the message of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
