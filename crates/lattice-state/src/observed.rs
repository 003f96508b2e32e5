#![forbid(unsafe_code)]

//! Observed aggregates: deep observability for externally supplied data.
//!
//! # Design
//!
//! [`observe`] is the wrapping entry point. Wrapping decisions follow the
//! [`Value`] sum type: plain maps wrap into an [`ObservedObject`], plain
//! lists into an [`ObservedList`] (both recursively, so aggregates nested at
//! any depth become observable too), already-observed values pass through
//! unchanged (idempotence), primitives pass through untouched.
//!
//! Both wrappers route every element get through a per-key (or per-index)
//! [`KeyedDependencyNode`] and every element set through `fire_change` plus
//! the aggregate's [`WatchRegistry`] — the same protocol the variable roles
//! use, applied per key. The `label` threaded through `observe` names the
//! owning role, so per-key nodes carry diagnostic labels like `user.age` or
//! `todos.2`.
//!
//! # Invariants
//!
//! 1. Wrapping an already-wrapped value is a no-op, never double-wrapping.
//! 2. An element set that stores an identity-equal value is silent.
//! 3. Once wrapped, the observed aggregate is the authoritative container:
//!    wrapping snapshots the plain aggregate's contents, and later mutations
//!    of the original plain `Rc` are not visible through the wrapper.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::engine::Engine;
use crate::error::StateError;
use crate::node::{DependencyNode, KeyedDependencyNode};
use crate::value::Value;
use crate::watch::WatchRegistry;

/// Wrap `value` for observability, labeling its nodes after `label` (the
/// owning role's name).
///
/// Plain maps become [`ObservedObject`]s, plain lists [`ObservedList`]s
/// (nested aggregates wrap recursively); observed values are returned
/// unchanged; primitives pass through.
#[must_use]
pub fn observe(engine: &Engine, label: &str, value: Value) -> Value {
    match value {
        Value::Map(fields) => {
            let snapshot: AHashMap<String, Value> = fields.borrow().clone();
            Value::Observed(ObservedObject::from_map(engine, label, snapshot))
        }
        Value::List(items) => {
            let snapshot: Vec<Value> = items.borrow().clone();
            Value::ObservedList(ObservedList::from_vec(engine, label, snapshot))
        }
        other => other,
    }
}

// ─── ObservedObject ──────────────────────────────────────────────────────────

struct ObservedInner {
    engine: Engine,
    label: String,
    fields: RefCell<AHashMap<String, Value>>,
    keys: KeyedDependencyNode,
    watch: WatchRegistry,
}

/// A keyed aggregate whose per-field reads and writes route through the
/// dependency graph.
///
/// Cloning produces another handle to the **same** object.
#[derive(Clone)]
pub struct ObservedObject {
    inner: Rc<ObservedInner>,
}

impl ObservedObject {
    /// Build an observed object over `fields`, wrapping nested values.
    #[must_use]
    pub fn from_map(engine: &Engine, label: &str, fields: AHashMap<String, Value>) -> Self {
        let wrapped: AHashMap<String, Value> = fields
            .into_iter()
            .map(|(k, v)| {
                let nested = observe(engine, &format!("{label}.{k}"), v);
                (k, nested)
            })
            .collect();
        Self {
            inner: Rc::new(ObservedInner {
                engine: engine.clone(),
                label: label.to_owned(),
                fields: RefCell::new(wrapped),
                keys: KeyedDependencyNode::new(label),
                watch: WatchRegistry::new(),
            }),
        }
    }

    /// Read a field, recording a per-key dependency.
    ///
    /// Reading a missing key still subscribes to it, so a later insertion
    /// notifies the reader.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.keys.add_ref(&key.to_owned(), &self.inner.engine);
        self.inner.fields.borrow().get(key).cloned()
    }

    /// Write a field. Stores, fires the key's node, and notifies watchers —
    /// unless the new value is identity-equal to the current one. The new
    /// value is wrapped for observability first.
    ///
    /// Fails when a computed value is currently evaluating.
    pub fn set(&self, key: &str, value: Value) -> Result<bool, StateError> {
        self.inner.engine.ensure_writable(key)?;
        let wrapped = observe(
            &self.inner.engine,
            &format!("{}.{key}", self.inner.label),
            value,
        );
        {
            let mut fields = self.inner.fields.borrow_mut();
            if fields.get(key) == Some(&wrapped) {
                return Ok(false);
            }
            fields.insert(key.to_owned(), wrapped);
        }
        self.inner.keys.fire_change(&key.to_owned());
        self.inner.watch.notify(key);
        Ok(true)
    }

    /// Remove a field, firing its key and notifying watchers if it existed.
    pub fn remove(&self, key: &str) -> Result<bool, StateError> {
        self.inner.engine.ensure_writable(key)?;
        let removed = self.inner.fields.borrow_mut().remove(key).is_some();
        if removed {
            self.inner.keys.fire_change(&key.to_owned());
            self.inner.watch.notify(key);
        }
        Ok(removed)
    }

    /// Whether a field exists, without recording a dependency.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.borrow().contains_key(key)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    /// Whether the object has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.fields.borrow().is_empty()
    }

    /// Current field names, untracked.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    /// Untracked snapshot of all fields (for serialization and copying).
    #[must_use]
    pub fn snapshot(&self) -> AHashMap<String, Value> {
        self.inner.fields.borrow().clone()
    }

    /// Register a named watch callback, fired with the field name on every
    /// field write.
    pub fn watch(&self, id: u64, callback: impl Fn(&str) + 'static) {
        self.inner.watch.add_subscriber(id, callback);
    }

    /// Remove a watch callback.
    pub fn unwatch(&self, id: u64) {
        self.inner.watch.remove_subscriber(id);
    }

    /// The diagnostic label this object's nodes are named after.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// A fresh observed object (new nodes, empty watch registry) over
    /// deep-copied fields. Shares no notification channel with `self`.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let copied: AHashMap<String, Value> = self
            .inner
            .fields
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy()))
            .collect();
        Self::from_map(&self.inner.engine, &self.inner.label, copied)
    }

    /// Identity comparison: two handles to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObservedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedObject")
            .field("label", &self.inner.label)
            .field("fields", &self.len())
            .field("tracked_keys", &self.inner.keys.len())
            .finish()
    }
}

// ─── ObservedList ────────────────────────────────────────────────────────────

struct ObservedListInner {
    engine: Engine,
    label: String,
    items: RefCell<Vec<Value>>,
    indices: KeyedDependencyNode<usize>,
    /// Fired by every length-changing operation.
    len_node: DependencyNode,
    watch: WatchRegistry,
}

/// An ordered aggregate whose per-index reads and writes route through the
/// dependency graph.
///
/// Cloning produces another handle to the **same** list.
#[derive(Clone)]
pub struct ObservedList {
    inner: Rc<ObservedListInner>,
}

impl ObservedList {
    /// Build an observed list over `items`, wrapping nested values.
    #[must_use]
    pub fn from_vec(engine: &Engine, label: &str, items: Vec<Value>) -> Self {
        let wrapped: Vec<Value> = items
            .into_iter()
            .enumerate()
            .map(|(i, v)| observe(engine, &format!("{label}.{i}"), v))
            .collect();
        Self {
            inner: Rc::new(ObservedListInner {
                engine: engine.clone(),
                label: label.to_owned(),
                items: RefCell::new(wrapped),
                indices: KeyedDependencyNode::new(label),
                len_node: DependencyNode::new(format!("{label}.len")),
                watch: WatchRegistry::new(),
            }),
        }
    }

    /// Read an element, recording a per-index dependency.
    ///
    /// Reading past the end still subscribes to that index, so a later push
    /// that materializes it notifies the reader.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.indices.add_ref(&index, &self.inner.engine);
        self.inner.items.borrow().get(index).cloned()
    }

    /// Write an element in place. Stores, fires the index's node, and
    /// notifies watchers — unless the new value is identity-equal to the
    /// current one. Out-of-range indices store nothing and return `false`.
    ///
    /// Fails when a computed value is currently evaluating.
    pub fn set(&self, index: usize, value: Value) -> Result<bool, StateError> {
        self.inner.engine.ensure_writable(&self.inner.label)?;
        let wrapped = observe(
            &self.inner.engine,
            &format!("{}.{index}", self.inner.label),
            value,
        );
        {
            let mut items = self.inner.items.borrow_mut();
            match items.get(index) {
                Some(current) if *current == wrapped => return Ok(false),
                Some(_) => items[index] = wrapped,
                None => return Ok(false),
            }
        }
        self.inner.indices.fire_change(&index);
        self.inner.watch.notify(&index.to_string());
        Ok(true)
    }

    /// Append an element, firing the new index and the length node.
    pub fn push(&self, value: Value) -> Result<(), StateError> {
        self.inner.engine.ensure_writable(&self.inner.label)?;
        let index = self.inner.items.borrow().len();
        let wrapped = observe(
            &self.inner.engine,
            &format!("{}.{index}", self.inner.label),
            value,
        );
        self.inner.items.borrow_mut().push(wrapped);
        // Readers that looked past the old end get notified now.
        self.inner.indices.fire_change(&index);
        self.inner.len_node.fire_change();
        self.inner.watch.notify("length");
        Ok(())
    }

    /// Remove and return the last element, firing its index and the length
    /// node. `None` on an empty list, with no notification.
    pub fn pop(&self) -> Result<Option<Value>, StateError> {
        self.inner.engine.ensure_writable(&self.inner.label)?;
        let popped = self.inner.items.borrow_mut().pop();
        if popped.is_some() {
            let index = self.inner.items.borrow().len();
            self.inner.indices.fire_change(&index);
            self.inner.len_node.fire_change();
            self.inner.watch.notify("length");
        }
        Ok(popped)
    }

    /// Tracked length: a reader re-runs when the list grows or shrinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len_node.add_ref(&self.inner.engine);
        self.inner.items.borrow().len()
    }

    /// Tracked emptiness check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Untracked snapshot of all elements (for serialization and copying).
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Register a named watch callback, fired with the index (or `length`)
    /// on every write.
    pub fn watch(&self, id: u64, callback: impl Fn(&str) + 'static) {
        self.inner.watch.add_subscriber(id, callback);
    }

    /// Remove a watch callback.
    pub fn unwatch(&self, id: u64) {
        self.inner.watch.remove_subscriber(id);
    }

    /// The diagnostic label this list's nodes are named after.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// A fresh observed list (new nodes, empty watch registry) over
    /// deep-copied elements. Shares no notification channel with `self`.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let copied: Vec<Value> = self
            .inner
            .items
            .borrow()
            .iter()
            .map(Value::deep_copy)
            .collect();
        Self::from_vec(&self.inner.engine, &self.inner.label, copied)
    }

    /// Identity comparison: two handles to the same list.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObservedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedList")
            .field("label", &self.inner.label)
            .field("items", &self.inner.items.borrow().len())
            .field("tracked_indices", &self.inner.indices.len())
            .finish()
    }
}
