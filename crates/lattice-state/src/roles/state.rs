#![forbid(unsafe_code)]

//! `LocalState`: root-owned, read/write state.
//!
//! The root of any provide/link/prop chain — it has no source. Writes wrap
//! plain aggregates for observability, then run the role's watch callbacks
//! when a real change occurred.

use std::fmt;
use std::rc::Rc;

use crate::cell::BackingCell;
use crate::engine::{Engine, ScopeId};
use crate::error::StateError;
use crate::node::DependencyNode;
use crate::observed::observe;
use crate::roles::Bindable;
use crate::value::Value;
use crate::watch::WatchRegistry;

pub(crate) struct StateInner {
    engine: Engine,
    owner: ScopeId,
    name: String,
    cell: BackingCell,
    watch: WatchRegistry,
}

impl StateInner {
    pub(crate) fn new(engine: &Engine, owner: ScopeId, name: String, initial: Value) -> Self {
        let initial = observe(engine, &name, initial);
        Self {
            engine: engine.clone(),
            owner,
            cell: BackingCell::new(name.clone(), initial),
            name,
            watch: WatchRegistry::new(),
        }
    }

    fn read(&self) -> Value {
        self.cell
            .get(&self.engine, self.engine.should_record(self.owner))
    }

    fn write(&self, value: Value) -> Result<bool, StateError> {
        self.engine.ensure_writable(&self.name)?;
        let wrapped = observe(&self.engine, &self.name, value);
        let changed = self.cell.set(wrapped);
        if changed {
            self.watch.notify(&self.name);
        }
        Ok(changed)
    }
}

impl Bindable for StateInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        self.read()
    }

    fn set_value(&self, value: Value) -> Result<bool, StateError> {
        self.write(value)
    }

    fn is_writable(&self) -> bool {
        true
    }
}

/// Root-owned, read/write state variable.
///
/// Cloning produces another handle to the same variable.
#[derive(Clone)]
pub struct LocalState {
    inner: Rc<StateInner>,
}

impl LocalState {
    /// Declare a state variable owned by `owner`. Plain-map initial values
    /// are wrapped for observability.
    #[must_use]
    pub fn new(engine: &Engine, owner: ScopeId, name: impl Into<String>, initial: Value) -> Self {
        Self {
            inner: Rc::new(StateInner::new(engine, owner, name.into(), initial)),
        }
    }

    /// Tracked read.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.read()
    }

    /// Write. Returns whether a change occurred; no-op sets are silent.
    ///
    /// Fails when a computed value is currently evaluating.
    pub fn set(&self, value: Value) -> Result<bool, StateError> {
        self.inner.write(value)
    }

    /// Register a watch callback fired with this variable's name on change.
    pub fn watch(&self, id: u64, callback: impl Fn(&str) + 'static) {
        self.inner.watch.add_subscriber(id, callback);
    }

    /// Remove a watch callback.
    pub fn unwatch(&self, id: u64) {
        self.inner.watch.remove_subscriber(id);
    }

    /// The variable's node, for diagnostics.
    #[must_use]
    pub fn node(&self) -> DependencyNode {
        self.inner.cell.node().clone()
    }

    /// The variable's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Handle usable as the source of a link or provider table entry.
    #[must_use]
    pub fn as_bindable(&self) -> Rc<dyn Bindable> {
        Rc::clone(&self.inner) as Rc<dyn Bindable>
    }
}

impl fmt::Debug for LocalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalState")
            .field("name", &self.inner.name)
            .field("value", &self.inner.cell.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::RenderConsumer;
    use std::cell::Cell;

    #[test]
    fn get_set_roundtrip() {
        let engine = Engine::new();
        let state = LocalState::new(&engine, engine.root_scope(), "count", Value::from(0));
        assert_eq!(state.get(), Value::from(0));
        assert!(state.set(Value::from(5)).unwrap());
        assert_eq!(state.get(), Value::from(5));
    }

    #[test]
    fn no_op_set_is_silent() {
        let engine = Engine::new();
        let state = LocalState::new(&engine, engine.root_scope(), "count", Value::from(1));
        let consumer = RenderConsumer::new(&engine, "view");

        consumer.render(|| {
            let _ = state.get();
        });
        assert!(!state.set(Value::from(1)).unwrap());
        assert!(!consumer.is_dirty());
        assert_eq!(state.node().version(), 0);
    }

    #[test]
    fn set_marks_readers_dirty() {
        let engine = Engine::new();
        let state = LocalState::new(&engine, engine.root_scope(), "count", Value::from(1));
        let consumer = RenderConsumer::new(&engine, "view");

        consumer.render(|| {
            let _ = state.get();
        });
        state.set(Value::from(2)).unwrap();
        assert!(consumer.is_dirty());
    }

    #[test]
    fn plain_map_values_get_wrapped() {
        let engine = Engine::new();
        let state = LocalState::new(
            &engine,
            engine.root_scope(),
            "user",
            Value::map_from([("age", Value::from(30))]),
        );
        assert!(state.get().as_observed().is_some());

        state
            .set(Value::map_from([("age", Value::from(31))]))
            .unwrap();
        assert!(state.get().as_observed().is_some());
    }

    #[test]
    fn watch_fires_on_change_only() {
        let engine = Engine::new();
        let state = LocalState::new(&engine, engine.root_scope(), "count", Value::from(0));
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        state.watch(1, move |name| {
            assert_eq!(name, "count");
            h.set(h.get() + 1);
        });

        state.set(Value::from(1)).unwrap();
        state.set(Value::from(1)).unwrap();
        state.set(Value::from(2)).unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn untracked_read_outside_any_frame() {
        let engine = Engine::new();
        let state = LocalState::new(&engine, engine.root_scope(), "count", Value::from(0));
        let _ = state.get();
        assert_eq!(state.node().subscriber_count(), 0);
        assert_eq!(state.node().reads(), 0);
    }
}
