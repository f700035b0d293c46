//! Named-event pub/sub with `before_*`/`after_*` interception semantics.
//!
//! A component (a node, an IO, the library) holds one `EventEmitter` and
//! fires `before_X`/`after_X` pairs around the body of a wrapped operation.
//! `before` handlers may veto by returning an error; `after` handlers never
//! stop the caller, their errors are only logged.

use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// A registered event handler: an async closure taking the event payload.
pub type Handler = Arc<dyn Fn(JsonValue) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Error returned when a `before_*` handler vetoes an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventVetoed {
    pub event: String,
    pub reason: String,
}

impl fmt::Display for EventVetoed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event '{}' vetoed: {}", self.event, self.reason)
    }
}

impl std::error::Error for EventVetoed {}

/// A named-event registry. Not thread-safe in the sense of reordering:
/// handlers always run sequentially, in registration order, even when the
/// emitter itself is shared behind an `Arc` and called from multiple tasks.
#[derive(Default, Clone)]
pub struct EventEmitter {
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
}

impl EventEmitter {
    /// Creates an emitter with no registered handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for the named event. Returns a handle that can be
    /// used to later identify the registration (not currently revocable,
    /// matching the reference's append-only handler lists).
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(JsonValue) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().expect("event emitter lock poisoned");
        handlers
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    fn handlers_for(&self, event: &str) -> Vec<Handler> {
        let handlers = self.handlers.read().expect("event emitter lock poisoned");
        handlers.get(event).cloned().unwrap_or_default()
    }

    /// Fires `before_<event>`. The first handler returning an error vetoes;
    /// remaining handlers are skipped and the error is propagated.
    pub async fn emit_before(
        &self,
        event: &str,
        payload: JsonValue,
    ) -> Result<(), EventVetoed> {
        let name = format!("before_{event}");
        for handler in self.handlers_for(&name) {
            if let Err(reason) = handler(payload.clone()).await {
                return Err(EventVetoed {
                    event: name,
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Fires `after_<event>`. Handler errors are logged and swallowed; the
    /// caller is never affected.
    pub async fn emit_after(&self, event: &str, payload: JsonValue) {
        let name = format!("after_{event}");
        for handler in self.handlers_for(&name) {
            if let Err(reason) = handler(payload.clone()).await {
                warn!(event = %name, %reason, "event handler failed");
            }
        }
    }

    /// Fires a plain, unwrapped event (no `before_`/`after_` prefix), used
    /// for terminal notifications like `error` or `triggererror` that have
    /// no surrounding operation to veto.
    pub async fn emit(&self, event: &str, payload: JsonValue) {
        for handler in self.handlers_for(event) {
            if let Err(reason) = handler(payload.clone()).await {
                warn!(%event, %reason, "event handler failed");
            }
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().expect("event emitter lock poisoned");
        f.debug_struct("EventEmitter")
            .field("events", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
