#![forbid(unsafe_code)]

//! Explicit watch registry: named callbacks fired by property name.
//!
//! This is a secondary pub-sub mechanism, fully independent of the
//! dependency graph: callbacks are registered under caller-chosen ids and
//! invoked with the property name that changed. It backs the `watch`
//! surface of the variable roles and of observed objects.
//!
//! # Failure Modes
//!
//! A panicking callback is caught and reported; the remaining callbacks
//! still run. One faulty watcher must not break the others.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tracing::error;

type WatchFn = Rc<dyn Fn(&str)>;

/// Registry of named change callbacks.
pub struct WatchRegistry {
    entries: RefCell<Vec<(u64, WatchFn)>>,
}

impl WatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    /// Register `callback` under `id`, replacing any previous callback with
    /// the same id.
    pub fn add_subscriber(&self, id: u64, callback: impl Fn(&str) + 'static) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|(existing, _)| *existing != id);
        entries.push((id, Rc::new(callback)));
    }

    /// Remove the callback registered under `id`, if any.
    pub fn remove_subscriber(&self, id: u64) {
        self.entries.borrow_mut().retain(|(e, _)| *e != id);
    }

    /// Invoke every callback with `property_name`, in registration order.
    /// Callbacks are snapshot before iteration, so a callback may register
    /// or remove watchers without poisoning the walk.
    pub fn notify(&self, property_name: &str) {
        let snapshot: Vec<(u64, WatchFn)> = self.entries.borrow().clone();
        for (id, callback) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(property_name)));
            if outcome.is_err() {
                error!(
                    watcher = id,
                    property = property_name,
                    "watch callback panicked; continuing with remaining watchers"
                );
            }
        }
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no callback is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn notifies_in_registration_order() {
        let registry = WatchRegistry::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for id in [3u64, 1, 2] {
            let o = Rc::clone(&order);
            registry.add_subscriber(id, move |_| o.borrow_mut().push(id));
        }
        registry.notify("field");
        assert_eq!(*order.borrow(), vec![3, 1, 2]);
    }

    #[test]
    fn callbacks_receive_property_name() {
        let registry = WatchRegistry::new();
        let seen = Rc::new(RefCell::new(String::new()));
        let s = Rc::clone(&seen);
        registry.add_subscriber(1, move |name| *s.borrow_mut() = name.to_owned());
        registry.notify("count");
        assert_eq!(*seen.borrow(), "count");
    }

    #[test]
    fn remove_stops_notifications() {
        let registry = WatchRegistry::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        registry.add_subscriber(7, move |_| h.set(h.get() + 1));

        registry.notify("x");
        registry.remove_subscriber(7);
        registry.notify("x");
        assert_eq!(hits.get(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn re_registering_same_id_replaces() {
        let registry = WatchRegistry::new();
        let hits = Rc::new(Cell::new(0));
        let h1 = Rc::clone(&hits);
        registry.add_subscriber(1, move |_| h1.set(h1.get() + 1));
        let h2 = Rc::clone(&hits);
        registry.add_subscriber(1, move |_| h2.set(h2.get() + 10));

        registry.notify("x");
        assert_eq!(hits.get(), 10);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let registry = WatchRegistry::new();
        let hits = Rc::new(Cell::new(0));

        registry.add_subscriber(1, |_| panic!("faulty watcher"));
        let h = Rc::clone(&hits);
        registry.add_subscriber(2, move |_| h.set(h.get() + 1));

        registry.notify("x");
        assert_eq!(hits.get(), 1);
    }
}
