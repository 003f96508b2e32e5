#![forbid(unsafe_code)]

//! Fine-grained reactive state graph: dependency tracking, change
//! notification, and the variable-role protocols built on top of them.
//!
//! The crate is a state engine, not a renderer. An external renderer wraps
//! each view evaluation in [`RenderConsumer::render`]; every state read
//! inside records a weak edge from the state's [`DependencyNode`] to the
//! consumer, and every later write walks those edges to mark exactly the
//! consumers that read it. Between the two sit the variable roles
//! ([`roles`]): eight synchronization protocols (owned state, inherited
//! props, two-way links, provide/consume context, computed values, watched
//! monitors, persisted props) composed from the same few primitives.
//!
//! All of it is single-threaded by design — `Rc`/`RefCell`, no locks. One
//! [`Engine`] per UI thread; everything created from it stays on it.

pub mod cell;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod node;
pub mod observed;
pub mod queue;
pub mod roles;
pub mod value;
pub mod watch;

pub use cell::BackingCell;
pub use consumer::RenderConsumer;
pub use engine::{Engine, EvalGuard, EvalMode, ScopeId};
pub use error::StateError;
pub use node::{DependencyNode, KeyedDependencyNode};
pub use observed::{ObservedList, ObservedObject, observe};
pub use queue::DeferredQueue;
pub use value::Value;
pub use watch::WatchRegistry;

pub use roles::{
    Bindable, ComputedValue, ConsumedContext, InheritedProp, LocalState, MemoryStorage,
    MonitorBuilder, MonitorChange, ProvidedContext, StorageBackend, StorageProp, TwoWayLink,
    WatchedMonitor,
};

#[cfg(feature = "state-persistence")]
pub use roles::FileStorage;
