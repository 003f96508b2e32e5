#![forbid(unsafe_code)]

//! `WatchedMonitor`: multi-path change observation with before/now capture.
//!
//! # Design
//!
//! Each monitored path is its own subscriber with its own dependency edges,
//! so one path changing never forces the others to re-read. When an edge
//! fires, the path re-reads **immediately** under a `Monitor` frame (keeping
//! its edge set current) and marks itself dirty when the fresh value differs
//! from the value last delivered. Delivery itself is batched: [`tick`]
//! collects every dirty path into one callback invocation, so a burst of
//! writes between ticks coalesces into a single report per path with
//! `before` anchored at the previous delivery.
//!
//! [`tick`]: WatchedMonitor::tick
//!
//! # Failure Modes
//!
//! - **Callback panics**: the panic is caught and logged; dirty flags were
//!   already reset, so the next tick reports only changes made after the
//!   failed delivery.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::engine::{Engine, EvalMode, ScopeId};
use crate::node::{Subscriber, SubscriberCore};
use crate::value::Value;

/// One delivered change: which path, what it was at the previous delivery,
/// and what it is now.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorChange {
    pub path: String,
    pub before: Value,
    pub now: Value,
}

// ─── Monitored paths ─────────────────────────────────────────────────────────

struct PathInner {
    core: SubscriberCore,
    engine: Engine,
    owner: ScopeId,
    path: String,
    read: Box<dyn Fn() -> Value>,
    /// Value as of the last delivery (or construction).
    before: RefCell<Value>,
    /// Value as of the most recent re-read.
    now: RefCell<Value>,
    dirty: Cell<bool>,
    self_weak: Weak<PathInner>,
}

impl PathInner {
    /// Re-read the path under a `Monitor` frame with fresh edges.
    ///
    /// `prime` seeds both captures without dirtying, for construction.
    fn refresh(&self, prime: bool) {
        let Some(strong) = self.self_weak.upgrade() else {
            return;
        };
        self.core.clear_bindings();

        let fresh = {
            let subscriber: Rc<dyn Subscriber> = strong as Rc<dyn Subscriber>;
            let _guard =
                self.engine
                    .enter(EvalMode::Monitor, Some(subscriber), Some(self.owner));
            (self.read)()
        };

        if prime {
            *self.before.borrow_mut() = fresh.clone();
            *self.now.borrow_mut() = fresh;
            self.dirty.set(false);
            return;
        }

        let changed = *self.before.borrow() != fresh;
        *self.now.borrow_mut() = fresh;
        // A change that reverts before delivery cancels out.
        self.dirty.set(changed);
    }
}

impl Subscriber for PathInner {
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
        self.refresh(false);
    }
}

// ─── WatchedMonitor ──────────────────────────────────────────────────────────

struct MonitorInner {
    name: String,
    paths: Vec<Rc<PathInner>>,
    callback: Box<dyn Fn(&[MonitorChange])>,
}

/// Observes a set of named read paths and reports coalesced changes.
///
/// Built through [`MonitorBuilder`]. Cloning produces another handle to the
/// same monitor. Dropping the last handle retires every path's edges.
#[derive(Clone)]
pub struct WatchedMonitor {
    inner: Rc<MonitorInner>,
}

impl WatchedMonitor {
    /// Start declaring a monitor.
    #[must_use]
    pub fn builder(engine: &Engine, owner: ScopeId, name: impl Into<String>) -> MonitorBuilder {
        MonitorBuilder {
            engine: engine.clone(),
            owner,
            name: name.into(),
            paths: Vec::new(),
        }
    }

    /// Deliver every pending change in one callback invocation.
    ///
    /// Returns how many paths were reported. Dirty flags and `before`
    /// captures reset before the callback runs, so a callback that writes
    /// state re-dirties paths for the *next* tick instead of looping this
    /// one.
    pub fn tick(&self) -> usize {
        let mut changes = Vec::new();
        for path in &self.inner.paths {
            if !path.dirty.take() {
                continue;
            }
            let now = path.now.borrow().clone();
            let before = {
                let mut before = path.before.borrow_mut();
                std::mem::replace(&mut *before, now.clone())
            };
            changes.push(MonitorChange {
                path: path.path.clone(),
                before,
                now,
            });
        }
        if changes.is_empty() {
            return 0;
        }

        let count = changes.len();
        let callback = &self.inner.callback;
        if catch_unwind(AssertUnwindSafe(|| callback(&changes))).is_err() {
            tracing::error!(monitor = %self.inner.name, "monitor callback panicked");
        }
        count
    }

    /// Labels of paths with undelivered changes.
    #[must_use]
    pub fn dirty_paths(&self) -> Vec<String> {
        self.inner
            .paths
            .iter()
            .filter(|p| p.dirty.get())
            .map(|p| p.path.clone())
            .collect()
    }

    /// The monitor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl fmt::Debug for WatchedMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedMonitor")
            .field("name", &self.inner.name)
            .field("paths", &self.inner.paths.len())
            .field("dirty", &self.dirty_paths())
            .finish()
    }
}

/// Declares the paths and callback of a [`WatchedMonitor`].
pub struct MonitorBuilder {
    engine: Engine,
    owner: ScopeId,
    name: String,
    paths: Vec<(String, Box<dyn Fn() -> Value>)>,
}

impl MonitorBuilder {
    /// Add a monitored path. `read` is re-run whenever anything it read
    /// changes; it must not write state roles.
    #[must_use]
    pub fn path(mut self, label: impl Into<String>, read: impl Fn() -> Value + 'static) -> Self {
        self.paths.push((label.into(), Box::new(read)));
        self
    }

    /// Finish with the aggregate change callback. Every path reads once
    /// immediately to seed its captures and edges.
    #[must_use]
    pub fn on_change(self, callback: impl Fn(&[MonitorChange]) + 'static) -> WatchedMonitor {
        let paths: Vec<Rc<PathInner>> = self
            .paths
            .into_iter()
            .map(|(label, read)| {
                let inner = Rc::new_cyclic(|weak| PathInner {
                    core: SubscriberCore::new(&self.engine, format!("{}:{label}", self.name)),
                    engine: self.engine.clone(),
                    owner: self.owner,
                    path: label,
                    read,
                    before: RefCell::new(Value::Null),
                    now: RefCell::new(Value::Null),
                    dirty: Cell::new(false),
                    self_weak: weak.clone(),
                });
                inner.refresh(true);
                inner
            })
            .collect();

        WatchedMonitor {
            inner: Rc::new(MonitorInner {
                name: self.name,
                paths,
                callback: Box::new(callback),
            }),
        }
    }
}
