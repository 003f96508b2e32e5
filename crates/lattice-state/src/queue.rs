#![forbid(unsafe_code)]

//! Deferred-mutation queue.
//!
//! Mutations produced while a parent render pass is still unwinding (most
//! notably a parent→child prop push) must not apply synchronously: a child
//! mutating state inside the parent's fire-change cascade is the re-entrancy
//! hazard this queue exists to break. The framework driver owns the flush
//! point.
//!
//! # Invariants
//!
//! 1. FIFO: mutations run in enqueue order.
//! 2. Drain-to-empty: a mutation enqueued *during* `flush` runs within the
//!    same flush pass, not a later tick.
//! 3. A nested `flush` call while a drain is in progress is a no-op; the
//!    outer drain picks the new items up.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

type Mutation = Box<dyn FnOnce()>;

/// FIFO queue of zero-argument mutations.
pub struct DeferredQueue {
    items: RefCell<VecDeque<Mutation>>,
    draining: Cell<bool>,
}

/// Clears the draining flag even if a mutation panics mid-flush.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl DeferredQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
        }
    }

    /// Append a mutation.
    pub fn enqueue(&self, f: impl FnOnce() + 'static) {
        self.items.borrow_mut().push_back(Box::new(f));
    }

    /// Run all queued mutations in FIFO order until the queue is empty.
    pub fn flush(&self) {
        if self.draining.get() {
            return;
        }
        self.draining.set(true);
        let _guard = DrainGuard(&self.draining);
        loop {
            // Pop outside the call so a mutation may enqueue more work
            // without re-entering the borrow.
            let next = self.items.borrow_mut().pop_front();
            match next {
                Some(mutation) => mutation(),
                None => break,
            }
        }
    }

    /// Number of queued mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("len", &self.len())
            .field("draining", &self.draining.get())
            .finish()
    }
}
