#![forbid(unsafe_code)]

//! The eight variable roles, each a distinct synchronization protocol
//! composed from [`BackingCell`](crate::cell::BackingCell),
//! [`DependencyNode`](crate::node::DependencyNode), and
//! [`WatchRegistry`](crate::watch::WatchRegistry):
//!
//! - [`LocalState`] — root-owned, read/write; the root of any chain.
//! - [`InheritedProp`] — parent→child one-way push with an independently
//!   mutable local copy.
//! - [`TwoWayLink`] — read-through/write-through to a source role; owns no
//!   node of its own.
//! - [`ProvidedContext`] / [`ConsumedContext`] — named provide/consume
//!   across the component scope tree.
//! - [`ComputedValue`] — pull-memoized, push-invalidated derivation.
//! - [`WatchedMonitor`] — explicit multi-path batch diffing.
//! - [`StorageProp`] — LocalState synchronized write-through with a
//!   [`StorageBackend`].
//!
//! Which roles own a dependency node is part of the design, not an
//! accident: roles with a source (link, consumed context) forward reads to
//! the source's node so that bound and direct readers are indistinguishable;
//! InheritedProp and ComputedValue own nodes because they keep a local
//! copy/cache.

use std::rc::Rc;

use crate::error::StateError;
use crate::value::Value;

pub mod computed;
pub mod link;
pub mod monitor;
pub mod prop;
pub mod provide;
pub mod state;
pub mod storage;

pub use computed::ComputedValue;
pub use link::TwoWayLink;
pub use monitor::{MonitorChange, MonitorBuilder, WatchedMonitor};
pub use prop::InheritedProp;
pub use provide::{ConsumedContext, ProvidedContext};
pub use state::LocalState;
pub use storage::{MemoryStorage, StorageBackend, StorageProp};

#[cfg(feature = "state-persistence")]
pub use storage::FileStorage;

/// Object-safe seam for roles that can stand upstream of a link or a
/// consumed context.
///
/// Reads through `value()` are tracked at the *source's* node — a link
/// contributes no node of its own, so a component bound through a link and
/// one bound directly to the source see identical notifications.
pub trait Bindable {
    /// The role's human-readable name.
    fn name(&self) -> &str;

    /// Tracked read.
    fn value(&self) -> Value;

    /// Write-through. Read-only roles return
    /// [`StateError::ReadOnlySourceWrite`].
    fn set_value(&self, value: Value) -> Result<bool, StateError>;

    /// Whether `set_value` can succeed at all.
    fn is_writable(&self) -> bool;

    /// For link-like roles: the source this role mirrors. Used to collapse
    /// chains of links to a single effective source at construction time.
    fn link_target(&self) -> Option<Rc<dyn Bindable>> {
        None
    }
}
