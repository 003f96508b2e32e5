#![forbid(unsafe_code)]

//! `BackingCell`: one mutable value paired with one dependency node.
//!
//! The lowest-level storage primitive shared by most variable roles. The
//! cell does not know about evaluation modes or proxy wrapping; roles layer
//! those concerns on top.
//!
//! # Invariants
//!
//! 1. `set` stores and fires only when the new value is identity/value
//!    distinct from the current one (see [`Value`]'s `PartialEq`); a no-op
//!    set produces no notification.
//! 2. `set_silently` never notifies; it exists for synchronizing a value in
//!    from a source when the caller will notify at a more precise moment.

use std::cell::RefCell;
use std::fmt;

use crate::engine::Engine;
use crate::node::DependencyNode;
use crate::value::Value;

/// Single-value storage plus its change-notification node.
pub struct BackingCell {
    value: RefCell<Value>,
    node: DependencyNode,
}

impl BackingCell {
    /// Create a cell holding `initial`, with a node labeled `label`.
    #[must_use]
    pub fn new(label: impl Into<String>, initial: Value) -> Self {
        Self {
            value: RefCell::new(initial),
            node: DependencyNode::new(label),
        }
    }

    /// Read the value, optionally recording the read on the cell's node.
    #[must_use]
    pub fn get(&self, engine: &Engine, track: bool) -> Value {
        if track {
            self.node.add_ref(engine);
        }
        self.value.borrow().clone()
    }

    /// Read without ever recording a dependency.
    #[must_use]
    pub fn peek(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Store `new_value` and fire the node, unless it equals the current
    /// value. Returns whether a change actually occurred.
    pub fn set(&self, new_value: Value) -> bool {
        {
            let current = self.value.borrow();
            if *current == new_value {
                return false;
            }
        }
        *self.value.borrow_mut() = new_value;
        self.node.fire_change();
        true
    }

    /// Store without notifying.
    pub fn set_silently(&self, new_value: Value) {
        *self.value.borrow_mut() = new_value;
    }

    /// The cell's node.
    #[must_use]
    pub fn node(&self) -> &DependencyNode {
        &self.node
    }
}

impl fmt::Debug for BackingCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingCell")
            .field("value", &*self.value.borrow())
            .field("node", &self.node)
            .finish()
    }
}
