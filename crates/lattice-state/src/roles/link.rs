#![forbid(unsafe_code)]

//! `TwoWayLink`: read-through/write-through binding to a source role.
//!
//! A link owns no dependency node. Reads delegate to the source's `value()`,
//! so tracking happens entirely at the source's node — a component bound
//! through a link and one bound directly to the source receive identical
//! notifications. Chains of links collapse at construction: building a link
//! over another link resolves the *transitive* source.

use std::fmt;
use std::rc::Rc;

use crate::engine::{Engine, ScopeId};
use crate::error::StateError;
use crate::roles::Bindable;
use crate::value::Value;

struct LinkInner {
    name: String,
    source: Rc<dyn Bindable>,
}

impl Bindable for LinkInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        self.source.value()
    }

    fn set_value(&self, value: Value) -> Result<bool, StateError> {
        if !self.source.is_writable() {
            return Err(StateError::ReadOnlySourceWrite {
                name: self.name.clone(),
            });
        }
        self.source.set_value(value)
    }

    fn is_writable(&self) -> bool {
        self.source.is_writable()
    }

    fn link_target(&self) -> Option<Rc<dyn Bindable>> {
        Some(Rc::clone(&self.source))
    }
}

/// Two-way binding against a source role.
///
/// Cloning produces another handle to the same link.
#[derive(Clone)]
pub struct TwoWayLink {
    inner: Rc<LinkInner>,
}

impl TwoWayLink {
    /// Bind against `source`, collapsing any chain of intermediate links to
    /// the underlying effective source.
    #[must_use]
    pub fn new(
        _engine: &Engine,
        _owner: ScopeId,
        name: impl Into<String>,
        source: Rc<dyn Bindable>,
    ) -> Self {
        let mut effective = source;
        while let Some(next) = effective.link_target() {
            effective = next;
        }
        Self {
            inner: Rc::new(LinkInner {
                name: name.into(),
                source: effective,
            }),
        }
    }

    /// Read through to the source. Dependency tracking happens at the
    /// source's node.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.value()
    }

    /// Write through to the source.
    ///
    /// Fails with [`StateError::ReadOnlySourceWrite`] when the resolved
    /// source offers no setter, and with
    /// [`StateError::IllegalMutationDuringComputation`] when a computed
    /// value is evaluating (enforced at the source).
    pub fn set(&self, value: Value) -> Result<bool, StateError> {
        self.inner.set_value(value)
    }

    /// Whether the resolved source accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    /// The link's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Handle usable as the source of a further link. Constructing a link
    /// over this handle collapses to this link's own source.
    #[must_use]
    pub fn as_bindable(&self) -> Rc<dyn Bindable> {
        Rc::clone(&self.inner) as Rc<dyn Bindable>
    }
}

impl fmt::Debug for TwoWayLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoWayLink")
            .field("name", &self.inner.name)
            .field("source", &self.inner.source.name())
            .field("writable", &self.is_writable())
            .finish()
    }
}
