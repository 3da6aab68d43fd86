//! Synchronous event fan-out.
//!
//! Handlers are registered per event name or as catch-alls. `publish`
//! invokes every matching handler inline; handlers must be fast and must
//! not block (slow consumers belong behind their own channel).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use arena_domain::event::Event;

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    by_name: RwLock<HashMap<String, Vec<Handler>>>,
    all: RwLock<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event name.
    pub fn subscribe(&self, event_name: impl Into<String>, handler: Handler) {
        self.by_name
            .write()
            .entry(event_name.into())
            .or_default()
            .push(handler);
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self, handler: Handler) {
        self.all.write().push(handler);
    }

    /// Fan an event out to typed subscribers, then catch-alls.
    pub fn publish(&self, event: Event) {
        tracing::trace!(event = %event.name, run_id = %event.run_id, "publishing event");
        {
            let by_name = self.by_name.read();
            if let Some(handlers) = by_name.get(&event.name) {
                for handler in handlers {
                    handler(&event);
                }
            }
        }
        let all = self.all.read();
        for handler in all.iter() {
            handler(&event);
        }
    }
}
