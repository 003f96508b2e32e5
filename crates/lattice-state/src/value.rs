#![forbid(unsafe_code)]

//! Dynamic value model for state variables.
//!
//! # Design
//!
//! [`Value`] is a closed sum type over three kinds of data:
//!
//! - **Primitives** (`Null`, `Bool`, `Int`, `Float`, `Str`) — compared and
//!   copied by value.
//! - **Plain aggregates** (`List`, `Map`) — `Rc`-shared mutable containers
//!   that have not been instrumented for change tracking.
//! - **Observed aggregates** (`Observed`, `ObservedList`) — containers
//!   wrapped by [`observe`](crate::observed::observe) so that per-key (or
//!   per-index) reads and writes route through the dependency graph.
//!
//! Replacing runtime "is this already wrapped?" reflection with this sum
//! type makes wrapping decisions total: every variant has exactly one
//! wrapping behavior.
//!
//! # Invariants
//!
//! 1. `PartialEq` is *identity* equality for aggregates (same `Rc`), value
//!    equality for primitives. This is the comparison used for no-op `set`
//!    detection and monitor dirtiness; it is never a deep structural diff.
//! 2. `deep_copy` never aliases any aggregate reachable from the original.
//!
//! Cyclic aggregates are not supported; `deep_copy` on a self-referential
//! value would recurse without bound.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::observed::{ObservedList, ObservedObject};

/// A dynamically-typed state value.
#[derive(Clone)]
pub enum Value {
    /// Absent / unset.
    Null,
    /// Boolean primitive.
    Bool(bool),
    /// Integer primitive.
    Int(i64),
    /// Floating-point primitive.
    Float(f64),
    /// Immutable shared string.
    Str(Rc<str>),
    /// Plain (untracked) ordered aggregate.
    List(Rc<RefCell<Vec<Value>>>),
    /// Plain (untracked) keyed aggregate.
    Map(Rc<RefCell<AHashMap<String, Value>>>),
    /// Keyed aggregate instrumented for per-key change tracking.
    Observed(ObservedObject),
    /// Ordered aggregate instrumented for per-index change tracking.
    ObservedList(ObservedList),
}

impl Value {
    /// Build a shared string value.
    #[must_use]
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    /// Build an empty plain map.
    #[must_use]
    pub fn new_map() -> Self {
        Self::Map(Rc::new(RefCell::new(AHashMap::new())))
    }

    /// Build a plain map from key/value pairs.
    #[must_use]
    pub fn map_from<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        let map: AHashMap<String, Value> =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::Map(Rc::new(RefCell::new(map)))
    }

    /// Build a plain list from values.
    #[must_use]
    pub fn list_from(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// Short variant name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Observed(_) => "observed",
            Self::ObservedList(_) => "observed_list",
        }
    }

    /// Whether this value is an aggregate (plain or observed).
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Self::List(_) | Self::Map(_) | Self::Observed(_) | Self::ObservedList(_)
        )
    }

    /// Access the plain map handle, if this is a plain map.
    #[must_use]
    pub fn as_map(&self) -> Option<&Rc<RefCell<AHashMap<String, Value>>>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Access the plain list handle, if this is a plain list.
    #[must_use]
    pub fn as_list(&self) -> Option<&Rc<RefCell<Vec<Value>>>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Access the observed object, if this value has been wrapped.
    #[must_use]
    pub fn as_observed(&self) -> Option<&ObservedObject> {
        match self {
            Self::Observed(o) => Some(o),
            _ => None,
        }
    }

    /// Access the observed list, if this value has been wrapped.
    #[must_use]
    pub fn as_observed_list(&self) -> Option<&ObservedList> {
        match self {
            Self::ObservedList(l) => Some(l),
            _ => None,
        }
    }

    /// Integer accessor, for tests and simple bindings.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String accessor.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Recursively copy this value so that no aggregate is aliased.
    ///
    /// Primitives copy by value. Plain aggregates copy into fresh `Rc`
    /// containers. Observed aggregates copy into a *fresh* observed object
    /// (new per-key nodes, empty watch registry) over deep-copied fields, so
    /// the copy stays observable but shares no notification channel with
    /// the original.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::Str(s) => Self::Str(Rc::clone(s)),
            Self::List(items) => {
                let copied: Vec<Value> = items.borrow().iter().map(Value::deep_copy).collect();
                Self::List(Rc::new(RefCell::new(copied)))
            }
            Self::Map(fields) => {
                let copied: AHashMap<String, Value> = fields
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect();
                Self::Map(Rc::new(RefCell::new(copied)))
            }
            Self::Observed(obj) => Self::Observed(obj.deep_copy()),
            Self::ObservedList(list) => Self::ObservedList(list.deep_copy()),
        }
    }
}

/// Identity/equality comparison (never a deep structural diff).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            (Self::Observed(a), Self::Observed(b)) => a.ptr_eq(b),
            (Self::ObservedList(a), Self::ObservedList(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "list(len={})", items.borrow().len())
            }
            Self::Map(fields) => {
                write!(f, "map(len={})", fields.borrow().len())
            }
            Self::Observed(obj) => obj.fmt(f),
            Self::ObservedList(list) => list.fmt(f),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_compare_by_value() {
        assert_eq!(Value::from(3), Value::from(3));
        assert_ne!(Value::from(3), Value::from(4));
        assert_eq!(Value::from("a"), Value::from("a"));
        assert_ne!(Value::from("a"), Value::from(1));
        assert_eq!(Value::Null, Value::Null);
    }

    #[test]
    fn aggregates_compare_by_identity() {
        let a = Value::map_from([("x", Value::from(1))]);
        let b = a.clone();
        // Same Rc: equal.
        assert_eq!(a, b);
        // Structurally identical but distinct Rc: not equal.
        let c = Value::map_from([("x", Value::from(1))]);
        assert_ne!(a, c);

        let l1 = Value::list_from([Value::from(1)]);
        let l2 = l1.clone();
        assert_eq!(l1, l2);
        assert_ne!(l1, Value::list_from([Value::from(1)]));
    }

    #[test]
    fn deep_copy_never_aliases() {
        let inner = Value::map_from([("y", Value::from(2))]);
        let outer = Value::map_from([("inner", inner.clone()), ("x", Value::from(1))]);

        let copy = outer.deep_copy();
        assert_ne!(copy, outer);

        // Mutating the original must not show up in the copy.
        let orig_map = outer.as_map().unwrap();
        orig_map
            .borrow_mut()
            .insert("x".into(), Value::from(99));
        let copy_map = copy.as_map().unwrap();
        assert_eq!(copy_map.borrow().get("x"), Some(&Value::from(1)));

        // Nested aggregates are fresh too.
        let copied_inner = copy_map.borrow().get("inner").cloned().unwrap();
        assert_ne!(copied_inner, inner);
    }

    #[test]
    fn deep_copy_of_list_copies_elements() {
        let shared = Value::map_from([("k", Value::from(1))]);
        let list = Value::list_from([shared.clone(), Value::from(2)]);
        let copy = list.deep_copy();

        let copied_first = copy.as_list().unwrap().borrow()[0].clone();
        assert_ne!(copied_first, shared);
    }

    #[test]
    fn type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::from(1.5).type_name(), "float");
        assert_eq!(Value::new_map().type_name(), "map");
        assert!(Value::new_map().is_aggregate());
        assert!(!Value::from(true).is_aggregate());
    }
}
