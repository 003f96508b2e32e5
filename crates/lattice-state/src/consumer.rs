#![forbid(unsafe_code)]

//! The renderer-facing subscriber handle.
//!
//! A [`RenderConsumer`] stands for one rendering unit (a component's view
//! function). The external renderer wraps each evaluation in
//! [`RenderConsumer::render`]; every state read inside records an edge, and
//! any later write to those states marks the consumer dirty. The renderer
//! polls [`take_dirty`](RenderConsumer::take_dirty) (or installs an
//! invalidation hook) to decide what to re-render — this crate never decides
//! *when* a repaint happens.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::engine::{Engine, EvalMode};
use crate::node::{Subscriber, SubscriberCore};

struct ConsumerInner {
    core: SubscriberCore,
    engine: Engine,
    dirty: Cell<bool>,
    invalidate_hook: RefCell<Option<Rc<dyn Fn()>>>,
}

impl Subscriber for ConsumerInner {
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
        self.dirty.set(true);
        let hook = self.invalidate_hook.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// One rendering unit's subscription identity.
///
/// Cloning produces another handle to the same consumer.
#[derive(Clone)]
pub struct RenderConsumer {
    inner: Rc<ConsumerInner>,
}

impl RenderConsumer {
    /// Create a consumer with a diagnostic label.
    #[must_use]
    pub fn new(engine: &Engine, label: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(ConsumerInner {
                core: SubscriberCore::new(engine, label),
                engine: engine.clone(),
                dirty: Cell::new(false),
                invalidate_hook: RefCell::new(None),
            }),
        }
    }

    /// Evaluate `f` with this consumer as the active subscriber.
    ///
    /// Stale edges from the previous evaluation are dropped first, so after
    /// `f` returns the consumer depends on exactly the nodes it read this
    /// time. The evaluation frame is restored even if `f` panics. A fresh
    /// render also clears the dirty flag: the output now reflects current
    /// state.
    pub fn render<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.core.clear_bindings();
        self.inner.dirty.set(false);
        let subscriber: Rc<dyn Subscriber> = Rc::clone(&self.inner) as Rc<dyn Subscriber>;
        let _guard = self
            .inner
            .engine
            .enter(EvalMode::Render, Some(subscriber), None);
        f()
    }

    /// Whether any dependency changed since the last render.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Read and clear the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.inner.dirty.replace(false)
    }

    /// Install a hook invoked every time the consumer is marked dirty.
    /// Typically used by the renderer to schedule a repaint.
    pub fn on_invalidate(&self, hook: impl Fn() + 'static) {
        *self.inner.invalidate_hook.borrow_mut() = Some(Rc::new(hook));
    }

    /// Number of live nodes this consumer currently depends on.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.core.dependency_count()
    }

    /// Diagnostic label.
    #[must_use]
    pub fn label(&self) -> &str {
        self.inner.core.label()
    }
}

impl fmt::Debug for RenderConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConsumer")
            .field("label", &self.label())
            .field("dirty", &self.is_dirty())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
