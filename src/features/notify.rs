use super::account::User;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

type Handler = Arc<dyn Fn(Option<&User>) + Send + Sync>;
type Handlers = Mutex<BTreeMap<u64, Handler>>;

/// Broadcast of "the session may have changed".
///
/// Handlers receive the session as it stands after the change, `None` once
/// logged out, and must not assume anything about which operation ran.
#[derive(Default)]
pub struct NotificationBus {
    handlers: Arc<Handlers>,
    next_id: u64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, handler: F) -> Subscription
    where
        F: Fn(Option<&User>) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(id, Arc::new(handler));
        }
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    pub fn publish(&self, session: Option<&User>) {
        // Snapshot the handlers so one may unsubscribe while being called
        let handlers: Vec<Handler> = match self.handlers.lock() {
            Ok(handlers) => handlers.values().cloned().collect(),
            Err(_) => {
                error!("Notification handlers poisoned, dropping event");
                return;
            }
        };

        trace!("Publishing session change to {} handlers", handlers.len());
        for handler in handlers {
            handler(session);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Keeps a handler registered; dropping it unsubscribes.
#[must_use = "the handler is removed as soon as the subscription is dropped"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    handlers: Weak<Handlers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            if let Ok(mut handlers) = handlers.lock() {
                handlers.remove(&self.id);
            }
        }
    }
}
