#![forbid(unsafe_code)]

//! `ComputedValue`: pull-memoized, push-invalidated derivation.
//!
//! # Design
//!
//! The first `get()` evaluates the function and caches the result. Later
//! `get()`s return the cache and record a read on the computed's **own**
//! node — the function is never re-run on read, because invalidation is
//! push-driven: when any node the function read fires, the computed
//! re-evaluates immediately, and fires its own node only if the fresh
//! result differs from the cache. A stable result refreshes the cache
//! silently, so upstream churn that does not change the derived value never
//! cascades.
//!
//! # Invariants
//!
//! 1. Before every re-evaluation the old dependency edges are cleared, so
//!    the edge set always matches the latest run exactly.
//! 2. Writes attempted by the function observe
//!    [`StateError::IllegalMutationDuringComputation`](crate::StateError) at
//!    the `set` call site — the function must be pure with respect to
//!    state-role writes.
//!
//! # Failure Modes
//!
//! - **Function panics during re-evaluation**: the cache keeps the last
//!   successful result; the evaluation frame is restored by its guard and
//!   the panic propagates to whoever fired the change.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::engine::{Engine, EvalMode, ScopeId};
use crate::error::StateError;
use crate::node::{DependencyNode, Subscriber, SubscriberCore};
use crate::roles::Bindable;
use crate::value::Value;

struct ComputedInner {
    core: SubscriberCore,
    engine: Engine,
    owner: ScopeId,
    name: String,
    node: DependencyNode,
    compute: Box<dyn Fn() -> Value>,
    cached: RefCell<Option<Value>>,
    self_weak: Weak<ComputedInner>,
}

impl ComputedInner {
    /// Run the function under a `Computed` frame with fresh edges.
    ///
    /// With `notify`, fires the computed's own node when the result
    /// diverges from the cache (invalidation path); without, only seeds the
    /// cache (first `get`).
    fn evaluate(&self, notify: bool) {
        let Some(strong) = self.self_weak.upgrade() else {
            return;
        };
        self.core.clear_bindings();

        let fresh = {
            let subscriber: Rc<dyn Subscriber> = strong as Rc<dyn Subscriber>;
            let _guard =
                self.engine
                    .enter(EvalMode::Computed, Some(subscriber), Some(self.owner));
            (self.compute)()
        };

        let diverged = {
            let cached = self.cached.borrow();
            cached.as_ref().is_some_and(|old| *old != fresh)
        };
        *self.cached.borrow_mut() = Some(fresh);

        if notify && diverged {
            self.node.fire_change();
        }
    }

    fn read(&self) -> Value {
        if self.cached.borrow().is_none() {
            self.evaluate(false);
        }
        if self.engine.should_record(self.owner) {
            self.node.add_ref(&self.engine);
        }
        self.cached.borrow().clone().unwrap_or(Value::Null)
    }
}

impl Subscriber for ComputedInner {
    fn id(&self) -> u64 {
        self.core.id()
    }

    fn label(&self) -> &str {
        self.core.label()
    }

    fn core(&self) -> &SubscriberCore {
        &self.core
    }

    fn on_dependency_changed(&self) {
        self.evaluate(true);
    }
}

impl Bindable for ComputedInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        self.read()
    }

    fn set_value(&self, _value: Value) -> Result<bool, StateError> {
        Err(StateError::ReadOnlySourceWrite {
            name: self.name.clone(),
        })
    }

    fn is_writable(&self) -> bool {
        false
    }
}

/// Memoized derived value.
///
/// Cloning produces another handle to the same computation.
#[derive(Clone)]
pub struct ComputedValue {
    inner: Rc<ComputedInner>,
}

impl ComputedValue {
    /// Declare a computed value. `compute` runs lazily on first `get()` and
    /// eagerly on every upstream change after that.
    ///
    /// The function must not write state roles; a write inside it fails
    /// with [`StateError::IllegalMutationDuringComputation`].
    #[must_use]
    pub fn new(
        engine: &Engine,
        owner: ScopeId,
        name: impl Into<String>,
        compute: impl Fn() -> Value + 'static,
    ) -> Self {
        let name = name.into();
        let inner = Rc::new_cyclic(|weak| ComputedInner {
            core: SubscriberCore::new(engine, name.clone()),
            engine: engine.clone(),
            owner,
            node: DependencyNode::new(name.clone()),
            name,
            compute: Box::new(compute),
            cached: RefCell::new(None),
            self_weak: weak.clone(),
        });
        Self { inner }
    }

    /// The current value: cached, recomputed only when a dependency changed
    /// since the last evaluation. Records a read on the computed's own node
    /// when called under a tracking frame.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.read()
    }

    /// Whether the function has run at least once.
    #[must_use]
    pub fn is_evaluated(&self) -> bool {
        self.inner.cached.borrow().is_some()
    }

    /// Change counter of the computed's own node: bumped once per result
    /// divergence, never on a stable re-evaluation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.node.version()
    }

    /// The computed's own node, for diagnostics.
    #[must_use]
    pub fn node(&self) -> DependencyNode {
        self.inner.node.clone()
    }

    /// The computed's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Read-only handle usable as the source of a link.
    #[must_use]
    pub fn as_bindable(&self) -> Rc<dyn Bindable> {
        Rc::clone(&self.inner) as Rc<dyn Bindable>
    }
}

impl fmt::Debug for ComputedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedValue")
            .field("name", &self.inner.name)
            .field("cached", &*self.inner.cached.borrow())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::RenderConsumer;
    use crate::roles::LocalState;
    use std::cell::Cell;

    fn int(state: &LocalState) -> i64 {
        state.get().as_int().unwrap_or(0)
    }

    #[test]
    fn lazy_first_evaluation() {
        let engine = Engine::new();
        let root = engine.root_scope();
        let runs = Rc::new(Cell::new(0u32));

        let state = LocalState::new(&engine, root, "n", Value::from(10));
        let s = state.clone();
        let r = Rc::clone(&runs);
        let doubled = ComputedValue::new(&engine, root, "doubled", move || {
            r.set(r.get() + 1);
            Value::from(int(&s) * 2)
        });

        assert!(!doubled.is_evaluated());
        assert_eq!(runs.get(), 0);

        assert_eq!(doubled.get(), Value::from(20));
        assert_eq!(runs.get(), 1);

        // Cached: no re-run on read.
        assert_eq!(doubled.get(), Value::from(20));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn upstream_change_recomputes_eagerly() {
        let engine = Engine::new();
        let root = engine.root_scope();
        let runs = Rc::new(Cell::new(0u32));

        let state = LocalState::new(&engine, root, "n", Value::from(1));
        let s = state.clone();
        let r = Rc::clone(&runs);
        let doubled = ComputedValue::new(&engine, root, "doubled", move || {
            r.set(r.get() + 1);
            Value::from(int(&s) * 2)
        });

        let _ = doubled.get();
        state.set(Value::from(3)).unwrap();
        // Push-invalidated: already recomputed before the next get.
        assert_eq!(runs.get(), 2);
        assert_eq!(doubled.get(), Value::from(6));
    }

    #[test]
    fn stable_result_does_not_cascade() {
        let engine = Engine::new();
        let root = engine.root_scope();
        let state = LocalState::new(&engine, root, "n", Value::from(1));
        let s = state.clone();
        // Parity is stable across 1 -> 3.
        let parity = ComputedValue::new(&engine, root, "parity", move || {
            Value::from(int(&s) % 2)
        });

        let consumer = RenderConsumer::new(&engine, "view");
        consumer.render(|| {
            let _ = parity.get();
        });

        state.set(Value::from(3)).unwrap();
        assert!(!consumer.is_dirty());
        assert_eq!(parity.version(), 0);

        state.set(Value::from(4)).unwrap();
        assert!(consumer.is_dirty());
        assert_eq!(parity.version(), 1);
    }

    #[test]
    fn write_during_evaluation_is_rejected() {
        let engine = Engine::new();
        let root = engine.root_scope();
        let state = LocalState::new(&engine, root, "n", Value::from(1));
        let s = state.clone();
        let observed_err = Rc::new(RefCell::new(None));
        let oe = Rc::clone(&observed_err);

        let impure = ComputedValue::new(&engine, root, "impure", move || {
            *oe.borrow_mut() = s.set(Value::from(99)).err();
            s.get()
        });

        let _ = impure.get();
        assert_eq!(
            *observed_err.borrow(),
            Some(StateError::IllegalMutationDuringComputation { name: "n".into() })
        );
        // The write did not land.
        assert_eq!(state.get(), Value::from(1));
    }

    #[test]
    fn edges_track_the_latest_run_only() {
        let engine = Engine::new();
        let root = engine.root_scope();
        let toggle = LocalState::new(&engine, root, "toggle", Value::from(true));
        let a = LocalState::new(&engine, root, "a", Value::from(1));
        let b = LocalState::new(&engine, root, "b", Value::from(2));

        let (t, av, bv) = (toggle.clone(), a.clone(), b.clone());
        let picked = ComputedValue::new(&engine, root, "picked", move || {
            if t.get() == Value::from(true) {
                av.get()
            } else {
                bv.get()
            }
        });

        let _ = picked.get();
        assert_eq!(a.node().subscriber_count(), 1);
        assert_eq!(b.node().subscriber_count(), 0);

        toggle.set(Value::from(false)).unwrap();
        assert_eq!(picked.get(), Value::from(2));
        // The stale edge to `a` is gone.
        assert_eq!(a.node().subscriber_count(), 0);
        assert_eq!(b.node().subscriber_count(), 1);
    }

    #[test]
    fn computed_over_computed_cascades() {
        let engine = Engine::new();
        let root = engine.root_scope();
        let state = LocalState::new(&engine, root, "n", Value::from(1));

        let s = state.clone();
        let doubled = ComputedValue::new(&engine, root, "doubled", move || {
            Value::from(int(&s) * 2)
        });
        let d = doubled.clone();
        let quadrupled = ComputedValue::new(&engine, root, "quadrupled", move || {
            Value::from(d.get().as_int().unwrap_or(0) * 2)
        });

        assert_eq!(quadrupled.get(), Value::from(4));
        state.set(Value::from(5)).unwrap();
        assert_eq!(quadrupled.get(), Value::from(20));
    }

    #[test]
    fn nested_evaluation_restores_outer_frame() {
        let engine = Engine::new();
        let root = engine.root_scope();
        let state = LocalState::new(&engine, root, "n", Value::from(1));
        let s = state.clone();
        let derived = ComputedValue::new(&engine, root, "derived", move || s.get());

        let consumer = RenderConsumer::new(&engine, "view");
        consumer.render(|| {
            // Reading the computed nests a Computed frame inside Render.
            let _ = derived.get();
            assert_eq!(engine.current_mode(), Some(EvalMode::Render));
        });
        assert_eq!(engine.current_mode(), None);

        // The consumer depends on the computed's node, so a divergence
        // reaches it.
        state.set(Value::from(2)).unwrap();
        assert!(consumer.is_dirty());
    }
}
