#![forbid(unsafe_code)]

//! `InheritedProp`: parent→child one-way push with a locally mutable copy.
//!
//! # Design
//!
//! Two backing cells:
//!
//! - `source_mirror` — a silent record of what the parent last pushed,
//!   compared by identity to deduplicate repeated pushes. It is never read
//!   by consumers, so holding the parent's reference here is safe.
//! - `local` — the value this component actually reads, independently
//!   settable. It only ever holds a **deep copy** of what the parent pushed:
//!   the prop-holder must be able to edit its copy without perturbing the
//!   parent, and vice versa.
//!
//! A parent push (`update`) does not apply synchronously: the copy is
//! enqueued into the engine's deferred queue so a parent's re-render pass
//! never recursively triggers a child mutation mid-pass.

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

struct PropInner {
    engine: Engine,
    owner: ScopeId,
    name: String,
    /// What the parent last pushed, stored by reference, never exposed.
    source_mirror: BackingCell,
    /// The value read by this component: always an isolated deep copy.
    local: BackingCell,
    watch: WatchRegistry,
}

impl PropInner {
    fn read(&self) -> Value {
        self.local
            .get(&self.engine, self.engine.should_record(self.owner))
    }

    fn write_local(&self, value: Value) -> Result<bool, StateError> {
        self.engine.ensure_writable(&self.name)?;
        let wrapped = observe(&self.engine, &self.name, value);
        let changed = self.local.set(wrapped);
        if changed {
            self.watch.notify(&self.name);
        }
        Ok(changed)
    }
}

impl Bindable for PropInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        self.read()
    }

    fn set_value(&self, value: Value) -> Result<bool, StateError> {
        self.write_local(value)
    }

    fn is_writable(&self) -> bool {
        true
    }
}

/// One-way inherited prop with an independently mutable local copy.
///
/// Cloning produces another handle to the same variable.
#[derive(Clone)]
pub struct InheritedProp {
    inner: Rc<PropInner>,
}

impl InheritedProp {
    /// Declare a prop from the parent's initial push. The local copy starts
    /// as a deep copy of `initial_from_parent`.
    #[must_use]
    pub fn new(
        engine: &Engine,
        owner: ScopeId,
        name: impl Into<String>,
        initial_from_parent: Value,
    ) -> Self {
        let name = name.into();
        let local_copy = observe(engine, &name, initial_from_parent.deep_copy());
        Self {
            inner: Rc::new(PropInner {
                engine: engine.clone(),
                owner,
                source_mirror: BackingCell::new(format!("{name}.mirror"), initial_from_parent),
                local: BackingCell::new(name.clone(), local_copy),
                name,
                watch: WatchRegistry::new(),
            }),
        }
    }

    /// Tracked read of the local copy.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.read()
    }

    /// Local-only mutation (e.g. from an interactive control bound to the
    /// prop). Never propagates upward.
    pub fn set(&self, value: Value) -> Result<bool, StateError> {
        self.inner.write_local(value)
    }

    /// Framework entry point: the parent's source value changed.
    ///
    /// Identity-equal pushes are dropped. Otherwise the mirror silently
    /// records the parent's reference and a deep copy is queued for the
    /// local cell, applied at the next [`Engine::flush_deferred`]. Returns
    /// whether a push was accepted.
    pub fn update(&self, new_from_parent: Value) -> bool {
        if self.inner.source_mirror.peek() == new_from_parent {
            return false;
        }
        self.inner.source_mirror.set_silently(new_from_parent.clone());

        let copy = observe(&self.inner.engine, &self.inner.name, new_from_parent.deep_copy());
        let inner = Rc::clone(&self.inner);
        self.inner.engine.defer(move || {
            if inner.local.set(copy) {
                inner.watch.notify(&inner.name);
            }
        });
        true
    }

    /// Register a watch callback fired with this prop's name on change.
    pub fn watch(&self, id: u64, callback: impl Fn(&str) + 'static) {
        self.inner.watch.add_subscriber(id, callback);
    }

    /// Remove a watch callback.
    pub fn unwatch(&self, id: u64) {
        self.inner.watch.remove_subscriber(id);
    }

    /// The local cell's node, for diagnostics.
    #[must_use]
    pub fn node(&self) -> DependencyNode {
        self.inner.local.node().clone()
    }

    /// The prop's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Handle usable as the source of a link.
    #[must_use]
    pub fn as_bindable(&self) -> Rc<dyn Bindable> {
        Rc::clone(&self.inner) as Rc<dyn Bindable>
    }
}

impl fmt::Debug for InheritedProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InheritedProp")
            .field("name", &self.inner.name)
            .field("local", &self.inner.local.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::RenderConsumer;
    use crate::roles::LocalState;

    #[test]
    fn initial_value_is_isolated() {
        let engine = Engine::new();
        let parent_obj = Value::map_from([("n", Value::from(1))]);
        let prop = InheritedProp::new(&engine, engine.root_scope(), "p", parent_obj.clone());

        // Mutating the parent's plain map must not show up in the prop.
        parent_obj
            .as_map()
            .unwrap()
            .borrow_mut()
            .insert("n".into(), Value::from(99));
        let local = prop.get();
        assert_eq!(
            local.as_observed().unwrap().get("n"),
            Some(Value::from(1))
        );
    }

    #[test]
    fn update_applies_on_flush_not_synchronously() {
        let engine = Engine::new();
        let prop = InheritedProp::new(&engine, engine.root_scope(), "p", Value::from(1));

        assert!(prop.update(Value::from(2)));
        // Not applied yet: the parent's pass may still be unwinding.
        assert_eq!(prop.get(), Value::from(1));

        engine.flush_deferred();
        assert_eq!(prop.get(), Value::from(2));
    }

    #[test]
    fn identity_equal_push_is_dropped() {
        let engine = Engine::new();
        let shared = Value::map_from([("n", Value::from(1))]);
        let prop = InheritedProp::new(&engine, engine.root_scope(), "p", shared.clone());

        // Parent re-pushes the same object: nothing to do.
        assert!(!prop.update(shared));
        assert_eq!(engine.deferred_len(), 0);
    }

    #[test]
    fn local_set_does_not_touch_parent() {
        let engine = Engine::new();
        let parent = LocalState::new(
            &engine,
            engine.root_scope(),
            "src",
            Value::map_from([("n", Value::from(1))]),
        );
        let prop = InheritedProp::new(&engine, engine.root_scope(), "p", parent.get());

        prop.set(Value::map_from([("n", Value::from(50))])).unwrap();
        assert_eq!(
            parent.get().as_observed().unwrap().get("n"),
            Some(Value::from(1))
        );
    }

    #[test]
    fn parent_mutation_does_not_leak_into_local_copy() {
        let engine = Engine::new();
        let parent = LocalState::new(
            &engine,
            engine.root_scope(),
            "src",
            Value::map_from([("n", Value::from(1))]),
        );
        let prop = InheritedProp::new(&engine, engine.root_scope(), "p", parent.get());

        parent
            .get()
            .as_observed()
            .unwrap()
            .set("n", Value::from(99))
            .unwrap();
        assert_eq!(
            prop.get().as_observed().unwrap().get("n"),
            Some(Value::from(1))
        );
    }

    #[test]
    fn deferred_apply_notifies_readers_and_watchers() {
        let engine = Engine::new();
        let prop = InheritedProp::new(&engine, engine.root_scope(), "p", Value::from(1));
        let consumer = RenderConsumer::new(&engine, "view");
        let watched = Rc::new(std::cell::Cell::new(false));
        let w = Rc::clone(&watched);
        prop.watch(1, move |_| w.set(true));

        consumer.render(|| {
            let _ = prop.get();
        });
        prop.update(Value::from(2));
        assert!(!consumer.is_dirty());

        engine.flush_deferred();
        assert!(consumer.is_dirty());
        assert!(watched.get());
    }

    #[test]
    fn fresh_parent_value_resets_local_edits() {
        let engine = Engine::new();
        let prop = InheritedProp::new(&engine, engine.root_scope(), "p", Value::from(1));

        prop.set(Value::from(10)).unwrap();
        assert_eq!(prop.get(), Value::from(10));

        prop.update(Value::from(2));
        engine.flush_deferred();
        assert_eq!(prop.get(), Value::from(2));
    }
}
