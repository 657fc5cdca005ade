//! Hierarchical event bus (C8): two-level "source.event" taxonomy with
//! synchronous, recursive-safe fan-out.
//!
//! Firing order is global listeners, then source-level listeners, then
//! event-level listeners (Testable property #7). The registry is guarded
//! by a recursive mutex so a listener may register or unregister other
//! listeners from inside its own callback without deadlocking.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use tracing::trace;

/// Opaque payload handed to listeners. Listeners downcast via
/// [`Any::downcast_ref`] to the concrete event type they expect, matching
/// the "payload-to-structured-mapping function" described in spec.md §3.
pub type Payload<'a> = &'a (dyn Any + 'static);

pub type Listener = Box<dyn Fn(&str, &str, Payload<'_>) + Send + Sync>;

/// Internal, clonable handle to a registered listener. `fire` clones this
/// out of the registry and drops its borrow before invoking the callback,
/// so a listener that re-enters `on`/`off` doesn't hit a live `RefCell`
/// borrow from the frame that's calling it.
type SharedListener = Arc<dyn Fn(&str, &str, Payload<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Scope {
    Global,
    Source(String),
    Event(String, String),
}

struct Registration {
    id: ListenerId,
    scope: Scope,
    listener: SharedListener,
}

struct Registry {
    registrations: Vec<Registration>,
}

/// Synchronous event bus. One instance is shared (via `Arc`) across the
/// Cache, Adapter, and Dispatcher.
pub struct EventBus {
    registry: ReentrantMutex<RefCell<Registry>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            registry: ReentrantMutex::new(RefCell::new(Registry {
                registrations: Vec::new(),
            })),
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a listener for one specific "source.event" pair.
    pub fn on(&self, source: &str, event: &str, listener: Listener) -> ListenerId {
        let id = self.alloc_id();
        let guard = self.registry.lock();
        guard.borrow_mut().registrations.push(Registration {
            id,
            scope: Scope::Event(source.to_string(), event.to_string()),
            listener: Arc::from(listener),
        });
        id
    }

    /// Registers a listener for all events of one source.
    pub fn on_source(&self, source: &str, listener: Listener) -> ListenerId {
        let id = self.alloc_id();
        let guard = self.registry.lock();
        guard.borrow_mut().registrations.push(Registration {
            id,
            scope: Scope::Source(source.to_string()),
            listener: Arc::from(listener),
        });
        id
    }

    /// Registers a listener for every event, globally.
    pub fn on_any(&self, listener: Listener) -> ListenerId {
        let id = self.alloc_id();
        let guard = self.registry.lock();
        guard.borrow_mut().registrations.push(Registration {
            id,
            scope: Scope::Global,
            listener: Arc::from(listener),
        });
        id
    }

    pub fn off(&self, id: ListenerId) {
        let guard = self.registry.lock();
        guard.borrow_mut().registrations.retain(|r| r.id != id);
    }

    /// Fires `source.event` synchronously: global listeners, then
    /// source-scoped, then event-scoped, in that order. Re-entrant: a
    /// listener invoked here may call `on`/`off` (including on this same
    /// event) without deadlocking, because the mutex is reentrant and each
    /// listener is `Arc`-cloned out of the registry (and the `RefCell`
    /// borrow dropped) before it's invoked — a nested `on`/`off` call never
    /// races a live borrow from this frame.
    pub fn fire(&self, source: &str, event: &str, payload: Payload<'_>) {
        trace!(source, event, "firing event");
        let guard = self.registry.lock();

        // Re-index from scratch each step rather than snapshotting the
        // whole list up front; the Vec itself may grow/shrink during
        // callbacks (re-entrant register/unregister).
        for phase in 0..3 {
            let mut i = 0;
            loop {
                let listener = {
                    let reg = guard.borrow();
                    if i >= reg.registrations.len() {
                        break;
                    }
                    let r = &reg.registrations[i];
                    let hit = match (&r.scope, phase) {
                        (Scope::Global, 0) => true,
                        (Scope::Source(s), 1) => s == source,
                        (Scope::Event(s, e), 2) => s == source && e == event,
                        _ => false,
                    };
                    hit.then(|| r.listener.clone())
                };
                if let Some(listener) = listener {
                    listener(source, event, payload);
                }
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn fires_global_then_source_then_event() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        bus.on_any(Box::new(move |_, _, _| o.lock().unwrap().push("global")));
        let o = order.clone();
        bus.on_source("Adapter", Box::new(move |_, _, _| o.lock().unwrap().push("source")));
        let o = order.clone();
        bus.on("Adapter", "Locked", Box::new(move |_, _, _| o.lock().unwrap().push("event")));

        bus.fire("Adapter", "Locked", &());

        assert_eq!(*order.lock().unwrap(), vec!["global", "source", "event"]);
    }

    #[test]
    fn reentrant_registration_does_not_deadlock() {
        let bus = Arc::new(EventBus::new());
        let fired = Arc::new(Mutex::new(false));

        let bus2 = bus.clone();
        let fired2 = fired.clone();
        bus.on_any(Box::new(move |_, _, _| {
            let fired3 = fired2.clone();
            bus2.on_any(Box::new(move |_, _, _| {
                *fired3.lock().unwrap() = true;
            }));
        }));

        bus.fire("X", "Y", &());
        bus.fire("X", "Y", &());
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn unregister_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = bus.on("S", "E", Box::new(move |_, _, _| *c.lock().unwrap() += 1));
        bus.fire("S", "E", &());
        bus.off(id);
        bus.fire("S", "E", &());
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
