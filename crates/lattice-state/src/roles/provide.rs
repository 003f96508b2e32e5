#![forbid(unsafe_code)]

//! `ProvidedContext` / `ConsumedContext`: named provide/consume across the
//! component scope tree.
//!
//! A provider owns its value like a [`LocalState`](crate::roles::LocalState)
//! and registers itself under a name in its scope. A consumer resolves the
//! name at construction by walking outward through ancestor scopes, then
//! behaves exactly like a two-way link against the provider: read-through,
//! write-through, no node of its own.

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

// ─── ProvidedContext ─────────────────────────────────────────────────────────

struct ProvidedInner {
    engine: Engine,
    owner: ScopeId,
    name: String,
    cell: BackingCell,
    watch: WatchRegistry,
}

impl ProvidedInner {
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

impl Bindable for ProvidedInner {
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

/// Context value provided to a component subtree under a name.
///
/// Cloning produces another handle to the same variable. Dropping the last
/// handle retires the registration: later consumers fail to resolve it.
#[derive(Clone)]
pub struct ProvidedContext {
    inner: Rc<ProvidedInner>,
}

impl ProvidedContext {
    /// Provide `initial` under `name` in `scope`.
    ///
    /// `allow_override` controls whether a *nested* provider may later
    /// shadow this one. Registration fails with
    /// [`StateError::ContextAlreadyProvided`] when an ancestor already
    /// provides `name` and forbids overriding.
    pub fn new(
        engine: &Engine,
        scope: ScopeId,
        name: impl Into<String>,
        initial: Value,
        allow_override: bool,
    ) -> Result<Self, StateError> {
        let name = name.into();
        let initial = observe(engine, &name, initial);
        let inner = Rc::new(ProvidedInner {
            engine: engine.clone(),
            owner: scope,
            cell: BackingCell::new(name.clone(), initial),
            name: name.clone(),
            watch: WatchRegistry::new(),
        });
        let as_bindable: Rc<dyn Bindable> = Rc::clone(&inner) as Rc<dyn Bindable>;
        engine.provide(scope, &name, Rc::downgrade(&as_bindable), allow_override)?;
        Ok(Self { inner })
    }

    /// Tracked read.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.read()
    }

    /// Write. Consumers anywhere in the subtree are notified through this
    /// provider's node.
    pub fn set(&self, value: Value) -> Result<bool, StateError> {
        self.inner.write(value)
    }

    /// Register a watch callback.
    pub fn watch(&self, id: u64, callback: impl Fn(&str) + 'static) {
        self.inner.watch.add_subscriber(id, callback);
    }

    /// Remove a watch callback.
    pub fn unwatch(&self, id: u64) {
        self.inner.watch.remove_subscriber(id);
    }

    /// The provider's node, for diagnostics.
    #[must_use]
    pub fn node(&self) -> DependencyNode {
        self.inner.cell.node().clone()
    }

    /// The provided name.
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

impl fmt::Debug for ProvidedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvidedContext")
            .field("name", &self.inner.name)
            .field("value", &self.inner.cell.peek())
            .finish()
    }
}

// ─── ConsumedContext ─────────────────────────────────────────────────────────

struct ConsumedInner {
    name: String,
    source: Rc<dyn Bindable>,
}

impl Bindable for ConsumedInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        self.source.value()
    }

    fn set_value(&self, value: Value) -> Result<bool, StateError> {
        self.source.set_value(value)
    }

    fn is_writable(&self) -> bool {
        self.source.is_writable()
    }

    fn link_target(&self) -> Option<Rc<dyn Bindable>> {
        Some(Rc::clone(&self.source))
    }
}

/// Context consumed from the nearest ancestor provider of the same name.
///
/// Cloning produces another handle to the same binding.
#[derive(Clone)]
pub struct ConsumedContext {
    inner: Rc<ConsumedInner>,
}

impl ConsumedContext {
    /// Resolve `name` by walking outward from `scope`.
    ///
    /// Fails with [`StateError::UnresolvedContext`] when no live provider
    /// is visible.
    pub fn new(engine: &Engine, scope: ScopeId, name: impl Into<String>) -> Result<Self, StateError> {
        let name = name.into();
        let source = engine.resolve_context(scope, &name)?;
        Ok(Self {
            inner: Rc::new(ConsumedInner { name, source }),
        })
    }

    /// Read through to the provider. Tracking happens at the provider's
    /// node.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.value()
    }

    /// Write through to the provider.
    pub fn set(&self, value: Value) -> Result<bool, StateError> {
        self.inner.set_value(value)
    }

    /// The consumed name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Handle usable as the source of a link; collapses to the provider.
    #[must_use]
    pub fn as_bindable(&self) -> Rc<dyn Bindable> {
        Rc::clone(&self.inner) as Rc<dyn Bindable>
    }
}

impl fmt::Debug for ConsumedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumedContext")
            .field("name", &self.inner.name)
            .field("provider", &self.inner.source.name())
            .finish()
    }
}
