//! Synchronous event bus
//!
//! Listeners on the same event fire synchronously in registration order.
//! The registry is written during boot and reload and read on the hot
//! path, so a read-write lock is enough.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// An event identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(&'static str);

impl Event {
    /// Fired when an application boots.
    pub const BOOT: Event = Event("anima:boot");

    /// Fired when an application reloads its configuration.
    pub const RELOAD: Event = Event("anima:reload");

    /// Fired when an application starts terminating.
    pub const TERMINATE: Event = Event("anima:terminate");

    /// Fired when a request or reply could not be processed.
    pub const PANIC: Event = Event("anima:panic");

    /// Fired by the TCP router when an unknown message kind arrives.
    pub const ROUTE_NOT_FOUND: Event = Event("anima:routing:notfound");

    /// Create a custom event identity.
    pub const fn new(name: &'static str) -> Self {
        Event(name)
    }

    /// The event name.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// An event listener, called with the payload the firer supplied.
pub type Listener = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Mapping from event identity to its ordered listener list.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<Event, Vec<Listener>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` on `event`.
    pub fn on(&self, event: Event, listener: Listener) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.entry(event).or_default().push(listener);
    }

    /// Fire `event`, invoking its listeners synchronously in registration
    /// order.
    pub fn fire(&self, event: Event, payload: &dyn Any) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        if let Some(registered) = listeners.get(&event) {
            for listener in registered {
                listener(payload);
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("EventBus")
            .field("events", &listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.on(
                Event::BOOT,
                Arc::new(move |_| order.lock().unwrap().push(tag)),
            );
        }

        bus.fire(Event::BOOT, &());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_fire_without_listeners_is_noop() {
        let bus = EventBus::new();
        bus.fire(Event::ROUTE_NOT_FOUND, &42u32);
    }

    #[test]
    fn test_payload_downcast() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = seen.clone();
        bus.on(
            Event::ROUTE_NOT_FOUND,
            Arc::new(move |payload| {
                if let Some(kind) = payload.downcast_ref::<u32>() {
                    *seen_clone.lock().unwrap() = Some(*kind);
                }
            }),
        );

        bus.fire(Event::ROUTE_NOT_FOUND, &102u32);
        assert_eq!(*seen.lock().unwrap(), Some(102));
    }
}
