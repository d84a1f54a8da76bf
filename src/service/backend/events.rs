//! Event name to handler registry.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, RwLock},
};

use serde_json::{Map, Value};

use crate::base::types::Void;

use super::KchatBackend;

pub const POSTED: &str = "posted";
pub const STATUS_CHANGE: &str = "status_change";
pub const HELLO: &str = "pusher_internal:subscription_succeeded";
pub const USER_ADDED: &str = "user_added";
pub const USER_REMOVED: &str = "user_removed";

// Types.

pub type BoxedEventHandler = Arc<dyn Fn(KchatBackend, Map<String, Value>) -> Pin<Box<dyn Future<Output = Void> + Send>> + Send + Sync>;

/// A handler bound to an event name.
#[derive(Clone)]
pub enum EventHandler {
    Message,
    StatusChange,
    Hello,
    RoomJoined,
    RoomLeft,
    Custom(BoxedEventHandler),
}

impl EventHandler {
    /// Wraps an async closure as a custom handler.
    pub fn custom<F, Fut>(f: F) -> Self
    where
        F: Fn(KchatBackend, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Void> + Send + 'static,
    {
        EventHandler::Custom(Arc::new(move |bot, event| Box::pin(f(bot, event))))
    }
}

/// Registry of event handlers, shared across reconnects.
///
/// This is trivially cloneable; clones share the same registrations.
#[derive(Clone)]
pub struct EventRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        let handlers = HashMap::from([
            (POSTED.to_string(), vec![EventHandler::Message]),
            (STATUS_CHANGE.to_string(), vec![EventHandler::StatusChange]),
            (HELLO.to_string(), vec![EventHandler::Hello]),
            (USER_ADDED.to_string(), vec![EventHandler::RoomJoined]),
            (USER_REMOVED.to_string(), vec![EventHandler::RoomLeft]),
        ]);

        Self {
            inner: Arc::new(RwLock::new(handlers)),
        }
    }
}

impl EventRegistry {
    /// Appends a handler for `event`.
    pub fn register(&self, event: &str, handler: EventHandler) {
        if let Ok(mut handlers) = self.inner.write() {
            handlers.entry(event.to_string()).or_default().push(handler);
        }
    }

    /// The handlers registered for `event`, in registration order.
    pub fn handlers(&self, event: &str) -> Option<Vec<EventHandler>> {
        self.inner.read().ok().and_then(|handlers| handlers.get(event).cloned())
    }
}
