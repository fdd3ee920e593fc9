//! Publish/subscribe fan-out for classified upstream events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::messages::{RelayEvent, RelayEventKind};

/// Callback invoked synchronously for every matching event
pub type EventHandler = Arc<dyn Fn(&RelayEvent) + Send + Sync>;

struct Entry {
    id: u64,
    kind: RelayEventKind,
    handler: EventHandler,
}

/// Ordered registry of event handlers.
///
/// Handlers run in registration order on the publishing task. The handler
/// list is snapshotted before dispatch, so a handler may subscribe or
/// unsubscribe without deadlocking.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `handler` for `kind`; dropping the returned handle removes it
    pub fn subscribe(self: &Arc<Self>, kind: RelayEventKind, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry { id, kind, handler });
        trace!(id, %kind, "Subscriber added");

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a handler by id. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            trace!(id, "Subscriber removed");
        }
        removed
    }

    /// Deliver `event` to every handler registered for its kind
    pub fn publish(&self, event: &RelayEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.handler.clone())
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, kind: RelayEventKind) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.kind == kind)
            .count()
    }
}

/// Deregistration handle returned by [`SubscriberRegistry::subscribe`]
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    kind: RelayEventKind,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> RelayEventKind {
        self.kind
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}
