#![forbid(unsafe_code)]

//! The evaluation-context engine.
//!
//! # Design
//!
//! [`Engine`] replaces the source design's process-wide mutable singleton
//! with an explicitly passed handle: cheaply cloneable (`Rc` inner), so any
//! number of independent engines can coexist and tests can construct them
//! freely. It owns three pieces of shared machinery:
//!
//! - The **evaluation frame stack**: who is currently reading state
//!   (rendering consumer, computed evaluator, or monitor evaluator). Entry is
//!   guarded by [`EvalGuard`], whose `Drop` restores the exact prior stack
//!   even on panic or early return — nested evaluation (a render pass reading
//!   a computed which reads a link which reads a state) is the normal case.
//! - The **scope tree** used by provide/consume context resolution.
//! - The **deferred-mutation queue** flushed by the framework driver at safe
//!   points between render passes.
//!
//! # Invariants
//!
//! 1. Frames are strictly stack-disciplined: a guard restores the depth it
//!    captured, unconditionally.
//! 2. Writes are rejected while the active mode is [`EvalMode::Computed`];
//!    no other mode restricts writes.
//! 3. Provider registration and lookup walk the scope chain outward; an
//!    inner provider may shadow an outer one only when the outer provider
//!    allows it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::trace;

use crate::error::StateError;
use crate::node::Subscriber;
use crate::queue::DeferredQueue;
use crate::roles::Bindable;

// ─── Evaluation modes and frames ─────────────────────────────────────────────

/// What kind of evaluation is currently reading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// A rendering consumer is evaluating its view.
    Render,
    /// A computed value is evaluating its function. Writes are forbidden.
    Computed,
    /// A watched-monitor path is evaluating its expression.
    Monitor,
}

struct Frame {
    mode: EvalMode,
    subscriber: Option<Rc<dyn Subscriber>>,
    /// Declaring scope of the evaluating role, for diagnostics.
    owner: Option<ScopeId>,
}

/// RAII guard for one evaluation frame. Dropping it pops the frame even when
/// the evaluated body panics.
pub struct EvalGuard {
    engine: Engine,
    depth: usize,
}

impl Drop for EvalGuard {
    fn drop(&mut self) {
        self.engine.shared.frames.borrow_mut().truncate(self.depth);
    }
}

impl fmt::Debug for EvalGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalGuard")
            .field("depth", &self.depth)
            .finish()
    }
}

// ─── Scopes ──────────────────────────────────────────────────────────────────

/// Identifier of a component scope in the provide/consume tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

struct ProviderEntry {
    role: Weak<dyn Bindable>,
    allow_override: bool,
}

struct ScopeData {
    parent: Option<ScopeId>,
    providers: AHashMap<String, ProviderEntry>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

struct EngineShared {
    frames: RefCell<Vec<Frame>>,
    scopes: RefCell<Vec<ScopeData>>,
    queue: DeferredQueue,
    next_id: Cell<u64>,
}

/// Shared evaluation-context handle. Cheap to clone; all clones see the same
/// frame stack, scope tree, and deferred queue.
#[derive(Clone)]
pub struct Engine {
    shared: Rc<EngineShared>,
}

impl Engine {
    /// Create an engine with a single root scope.
    #[must_use]
    pub fn new() -> Self {
        let root = ScopeData {
            parent: None,
            providers: AHashMap::new(),
        };
        Self {
            shared: Rc::new(EngineShared {
                frames: RefCell::new(Vec::new()),
                scopes: RefCell::new(vec![root]),
                queue: DeferredQueue::new(),
                next_id: Cell::new(1),
            }),
        }
    }

    /// The root component scope.
    #[must_use]
    pub fn root_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Create a child scope under `parent`. Mirrors the component tree: each
    /// component instance gets its own scope for provide/consume resolution.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` scopes have been created; aliasing two
    /// scopes onto one id would silently corrupt context resolution.
    #[must_use]
    pub fn create_scope(&self, parent: ScopeId) -> ScopeId {
        let mut scopes = self.shared.scopes.borrow_mut();
        let id = ScopeId(u32::try_from(scopes.len()).expect("scope id space exhausted"));
        scopes.push(ScopeData {
            parent: Some(parent),
            providers: AHashMap::new(),
        });
        id
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);
        id
    }

    // ── Evaluation frames ────────────────────────────────────────────

    /// Push an evaluation frame; the returned guard pops it on drop.
    pub(crate) fn enter(
        &self,
        mode: EvalMode,
        subscriber: Option<Rc<dyn Subscriber>>,
        owner: Option<ScopeId>,
    ) -> EvalGuard {
        let mut frames = self.shared.frames.borrow_mut();
        let depth = frames.len();
        frames.push(Frame {
            mode,
            subscriber,
            owner,
        });
        EvalGuard {
            engine: self.clone(),
            depth,
        }
    }

    /// Mode of the innermost active evaluation frame, if any.
    #[must_use]
    pub fn current_mode(&self) -> Option<EvalMode> {
        self.shared.frames.borrow().last().map(|f| f.mode)
    }

    pub(crate) fn active_subscriber(&self) -> Option<Rc<dyn Subscriber>> {
        self.shared
            .frames
            .borrow()
            .last()
            .and_then(|f| f.subscriber.clone())
    }

    /// Whether a read by the variable declared in `owner` should record a
    /// dependency edge. True whenever an evaluation frame with a live
    /// subscriber is active: computed and monitor evaluators must observe
    /// every read (including same-owner reads) to be re-runnable at all, and
    /// reads with no active frame can never be recorded.
    #[must_use]
    pub fn should_record(&self, owner: ScopeId) -> bool {
        let frames = self.shared.frames.borrow();
        match frames.last() {
            Some(frame) if frame.subscriber.is_some() => {
                trace!(
                    mode = ?frame.mode,
                    owner = ?owner,
                    frame_owner = ?frame.owner,
                    "recording read"
                );
                true
            }
            _ => false,
        }
    }

    /// Reject writes while a computed value is evaluating.
    pub(crate) fn ensure_writable(&self, name: &str) -> Result<(), StateError> {
        if self.current_mode() == Some(EvalMode::Computed) {
            return Err(StateError::IllegalMutationDuringComputation {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    // ── Deferred mutations ───────────────────────────────────────────

    /// Queue a mutation to run at the next flush point.
    pub fn defer(&self, f: impl FnOnce() + 'static) {
        self.shared.queue.enqueue(f);
    }

    /// Run all queued mutations in FIFO order, draining to empty. The
    /// framework driver calls this at safe points between render passes.
    pub fn flush_deferred(&self) {
        self.shared.queue.flush();
    }

    /// Number of mutations currently queued.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.shared.queue.len()
    }

    // ── Provide / consume ────────────────────────────────────────────

    /// Register a provider for `name` in `scope`.
    ///
    /// Fails with [`StateError::ContextAlreadyProvided`] when an ancestor
    /// (or the scope itself) already provides `name` without allowing
    /// override.
    pub(crate) fn provide(
        &self,
        scope: ScopeId,
        name: &str,
        role: Weak<dyn Bindable>,
        allow_override: bool,
    ) -> Result<(), StateError> {
        let mut scopes = self.shared.scopes.borrow_mut();
        let mut cursor = Some(scope);
        while let Some(ScopeId(idx)) = cursor {
            let data = &scopes[idx as usize];
            if let Some(existing) = data.providers.get(name) {
                // A dropped provider no longer blocks re-registration.
                if existing.role.strong_count() > 0 && !existing.allow_override {
                    return Err(StateError::ContextAlreadyProvided {
                        name: name.to_owned(),
                    });
                }
            }
            cursor = data.parent;
        }
        scopes[scope.0 as usize].providers.insert(
            name.to_owned(),
            ProviderEntry {
                role,
                allow_override,
            },
        );
        Ok(())
    }

    /// Resolve `name` by walking outward from `scope` through ancestors.
    pub(crate) fn resolve_context(
        &self,
        scope: ScopeId,
        name: &str,
    ) -> Result<Rc<dyn Bindable>, StateError> {
        let scopes = self.shared.scopes.borrow();
        let mut cursor = Some(scope);
        while let Some(ScopeId(idx)) = cursor {
            let data = &scopes[idx as usize];
            if let Some(entry) = data.providers.get(name) {
                // A dropped provider is treated as absent; keep walking, an
                // outer provider of the same name may still be live.
                if let Some(role) = entry.role.upgrade() {
                    return Ok(role);
                }
            }
            cursor = data.parent;
        }
        Err(StateError::UnresolvedContext {
            name: name.to_owned(),
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("frame_depth", &self.shared.frames.borrow().len())
            .field("scopes", &self.shared.scopes.borrow().len())
            .field("deferred", &self.shared.queue.len())
            .finish()
    }
}
