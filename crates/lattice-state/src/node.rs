#![forbid(unsafe_code)]

//! Dependency graph core: nodes, subscribers, and the weak edges between
//! them.
//!
//! # Design
//!
//! A [`DependencyNode`] is the unit of change notification. Every tracked
//! read records a *bidirectional weak edge*: the node remembers the active
//! subscriber (`Weak<dyn Subscriber>`) and the subscriber remembers the node
//! (`Weak<NodeInner>`) in its reverse set. Both halves are weak; liveness is
//! decided solely by the owner's lifetime elsewhere.
//!
//! # Invariants
//!
//! 1. A node never holds a strong reference to a subscriber.
//! 2. `fire_change` snapshots the subscriber set before iterating, so
//!    re-entrant removal (a computed re-run clearing its old edges mid-walk)
//!    is safe.
//! 3. Before any re-evaluation a subscriber calls
//!    [`SubscriberCore::clear_bindings`], dropping every forward edge held by
//!    the nodes in its reverse set. Stale edges therefore never survive a
//!    re-evaluation.
//! 4. `add_ref` deduplicates: reading the same node twice in one evaluation
//!    produces one edge.
//!
//! # Failure Modes
//!
//! - **Dead subscriber encountered during notification**: the weak upgrade
//!   fails; the entry is pruned and notification continues.
//! - **Subscriber re-run panics**: the panic propagates to the mutation that
//!   fired the change; the evaluation-frame guard restores context state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::trace;

use crate::engine::Engine;

// ─── Subscriber ──────────────────────────────────────────────────────────────

/// A tracked consumer of dependency nodes: a rendering consumer, a computed
/// value, or one path of a watched monitor.
pub(crate) trait Subscriber {
    /// Stable identity, unique per engine.
    fn id(&self) -> u64;

    /// Diagnostic label.
    fn label(&self) -> &str;

    /// Shared bookkeeping (reverse-binding set).
    fn core(&self) -> &SubscriberCore;

    /// React to a change on a node this subscriber depends on: mark dirty
    /// (rendering consumer), re-run (computed value), or re-read (monitor
    /// path).
    fn on_dependency_changed(&self);
}

/// Reverse-binding bookkeeping shared by every subscriber kind.
pub(crate) struct SubscriberCore {
    id: u64,
    label: String,
    /// Weak references to every node this subscriber currently depends on.
    deps: RefCell<Vec<Weak<NodeInner>>>,
}

impl SubscriberCore {
    pub(crate) fn new(engine: &Engine, label: impl Into<String>) -> Self {
        Self {
            id: engine.next_id(),
            label: label.into(),
            deps: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Record a reverse edge to `node`, deduplicated by node identity.
    fn record_dep(&self, node: &Rc<NodeInner>) {
        let mut deps = self.deps.borrow_mut();
        let weak = Rc::downgrade(node);
        if !deps.iter().any(|w| Weak::ptr_eq(w, &weak)) {
            deps.push(weak);
        }
    }

    /// Ask every node in the reverse set to drop its forward edge to this
    /// subscriber, then clear the reverse set. Called before re-evaluation.
    pub(crate) fn clear_bindings(&self) {
        let deps = self.deps.take();
        if !deps.is_empty() {
            trace!(subscriber = %self.label, edges = deps.len(), "clearing bindings");
        }
        for weak in deps {
            if let Some(node) = weak.upgrade() {
                node.remove_subscriber(self.id);
            }
        }
    }

    /// Number of live nodes in the reverse set.
    pub(crate) fn dependency_count(&self) -> usize {
        self.deps
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

// ─── DependencyNode ──────────────────────────────────────────────────────────

pub(crate) struct NodeInner {
    label: String,
    /// Bumped on every `add_ref`, even untracked ones.
    reads: Cell<u64>,
    /// Bumped on every `fire_change`.
    version: Cell<u64>,
    subscribers: RefCell<Vec<Weak<dyn Subscriber>>>,
}

impl NodeInner {
    fn new(label: String) -> Self {
        Self {
            label,
            reads: Cell::new(0),
            version: Cell::new(0),
            subscribers: RefCell::new(Vec::new()),
        }
    }

    /// Record a read. If an evaluation frame with a subscriber is active,
    /// install the bidirectional weak edge; otherwise this is only a counter
    /// bump.
    pub(crate) fn add_ref(self: &Rc<Self>, engine: &Engine) {
        self.reads.set(self.reads.get() + 1);
        let Some(sub) = engine.active_subscriber() else {
            return;
        };
        let id = sub.id();
        {
            let mut subs = self.subscribers.borrow_mut();
            let already = subs
                .iter()
                .any(|w| w.upgrade().is_some_and(|s| s.id() == id));
            if !already {
                trace!(node = %self.label, subscriber = %sub.label(), "edge added");
                subs.push(Rc::downgrade(&sub));
            }
        }
        sub.core().record_dep(self);
    }

    /// Notify every live subscriber; prune dead entries encountered along
    /// the way. The set is snapshotted first so subscribers may re-enter and
    /// mutate it while we iterate.
    pub(crate) fn fire_change(&self) {
        self.version.set(self.version.get() + 1);
        let snapshot: Vec<Weak<dyn Subscriber>> = self.subscribers.borrow().clone();
        let mut saw_dead = false;
        for weak in &snapshot {
            match weak.upgrade() {
                Some(sub) => sub.on_dependency_changed(),
                None => saw_dead = true,
            }
        }
        if saw_dead {
            self.subscribers
                .borrow_mut()
                .retain(|w| w.strong_count() > 0);
        }
    }

    /// Drop the forward edge to exactly one subscriber.
    pub(crate) fn remove_subscriber(&self, id: u64) {
        self.subscribers
            .borrow_mut()
            .retain(|w| w.upgrade().is_some_and(|s| s.id() != id));
    }

    fn live_subscribers(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// The unit of change notification.
///
/// Cloning produces another handle to the **same** node.
#[derive(Clone)]
pub struct DependencyNode {
    inner: Rc<NodeInner>,
}

impl DependencyNode {
    /// Create a node with a diagnostic label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(NodeInner::new(label.into())),
        }
    }

    /// Record a read (see [`NodeInner::add_ref`]).
    pub fn add_ref(&self, engine: &Engine) {
        self.inner.add_ref(engine);
    }

    /// Notify and invalidate all live subscribers.
    pub fn fire_change(&self) {
        self.inner.fire_change();
    }

    /// Change counter: bumped once per `fire_change`.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Read counter: bumped once per `add_ref`.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.inner.reads.get()
    }

    /// Number of live subscribers currently attached.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.live_subscribers()
    }

    /// Diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyNode")
            .field("label", &self.inner.label)
            .field("version", &self.inner.version.get())
            .field("subscribers", &self.inner.live_subscribers())
            .finish()
    }
}

// ─── KeyedDependencyNode ─────────────────────────────────────────────────────

/// A map of key → [`DependencyNode`], for keyed collections.
///
/// Generic over the key: observed objects key by field name (`String`),
/// observed lists by index (`usize`). Nodes are created lazily on first use
/// of a key, so a collection with many keys only pays for the keys that were
/// actually read or written.
pub struct KeyedDependencyNode<K = String> {
    label: String,
    entries: RefCell<AHashMap<K, DependencyNode>>,
}

impl<K: Eq + std::hash::Hash + Clone + fmt::Display> KeyedDependencyNode<K> {
    /// Create an empty keyed node.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: RefCell::new(AHashMap::new()),
        }
    }

    /// The node for `key`, created on demand and labeled `<owner>.<key>`.
    #[must_use]
    pub fn node_for(&self, key: &K) -> DependencyNode {
        let mut entries = self.entries.borrow_mut();
        if let Some(node) = entries.get(key) {
            return node.clone();
        }
        let node = DependencyNode::new(format!("{}.{key}", self.label));
        entries.insert(key.clone(), node.clone());
        node
    }

    /// Record a read of `key`.
    pub fn add_ref(&self, key: &K, engine: &Engine) {
        self.node_for(key).add_ref(engine);
    }

    /// Fire the node for `key`, if one exists. A key that has never been
    /// read has no node and no subscribers, so firing it is a no-op.
    pub fn fire_change(&self, key: &K) {
        let node = self.entries.borrow().get(key).cloned();
        if let Some(node) = node {
            node.fire_change();
        }
    }

    /// Number of keys with materialized nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no key has a materialized node yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl<K> fmt::Debug for KeyedDependencyNode<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedDependencyNode")
            .field("label", &self.label)
            .field("keys", &self.entries.borrow().len())
            .finish()
    }
}
