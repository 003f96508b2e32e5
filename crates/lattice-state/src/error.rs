#![forbid(unsafe_code)]

//! Error taxonomy for the state graph.
//!
//! Structural and programming errors surface as hard `Err` values at the
//! faulting call. Faults inside user-supplied callbacks (monitor functions,
//! watch callbacks) are **not** represented here: they are contained at the
//! call site and reported through `tracing`, never propagated.

use thiserror::Error;

/// Errors raised by variable-role operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// A write was attempted while a computed value was evaluating.
    ///
    /// Computed functions must be pure with respect to state-role writes;
    /// hitting this is a logic error in the computed function, so it is
    /// surfaced immediately rather than swallowed.
    #[error("illegal mutation of '{name}' during computed evaluation")]
    IllegalMutationDuringComputation {
        /// Name of the variable the write targeted.
        name: String,
    },

    /// A consumed context found no matching provider in any ancestor scope.
    #[error("no provided context named '{name}' is visible from this scope")]
    UnresolvedContext {
        /// The context name that failed to resolve.
        name: String,
    },

    /// A two-way link's `set` resolved to a source with no setter.
    #[error("two-way link '{name}' resolves to a read-only source")]
    ReadOnlySourceWrite {
        /// Name of the link (or consumed context) the write went through.
        name: String,
    },

    /// A nested provider tried to shadow an outer provider that forbids it.
    #[error("context '{name}' is already provided by an ancestor that forbids overriding")]
    ContextAlreadyProvided {
        /// The contested context name.
        name: String,
    },
}
