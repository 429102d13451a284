//! Error kinds shared by every component of the engine.

use std::fmt;

/// The closed set of error kinds the engine can raise.
///
/// See `spec.md` \S7 for the propagation policy associated with each
/// variant. `Bug` signals a violated internal invariant; callers that
/// observe it should treat the affected engine instance as poisoned.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A typed access (cell read/write, port bind) used the wrong Rust
    /// type or the wrong scalar/vector shape.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The type the caller expected.
        expected: String,
        /// The type actually stored.
        found: String,
    },

    /// An operation required a bound source/target but none is set.
    #[error("not bound: {0}")]
    NotBound(String),

    /// An operation was attempted at the wrong point in a lifecycle.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Cancellation was observed while blocked acquiring a lock or
    /// publishing data.
    #[error("execution aborted")]
    ExecutionAborted,

    /// A module, proxy or logger name is already registered.
    #[error("name conflict: {0}")]
    NameConflict(String),

    /// An internal invariant was violated. Fatal: callers should treat
    /// the owning `Engine` as no longer usable.
    #[error("internal invariant violated: {0}")]
    Bug(String),
}

impl EngineError {
    /// Convenience constructor for [`EngineError::NotBound`].
    pub fn not_bound(what: impl fmt::Display) -> Self {
        EngineError::NotBound(what.to_string())
    }

    /// Convenience constructor for [`EngineError::InvalidState`].
    pub fn invalid_state(what: impl fmt::Display) -> Self {
        EngineError::InvalidState(what.to_string())
    }

    /// Convenience constructor for [`EngineError::NameConflict`].
    pub fn name_conflict(what: impl fmt::Display) -> Self {
        EngineError::NameConflict(what.to_string())
    }

    /// True for the one variant the propagation policy treats as fatal
    /// rather than task-local.
    pub fn is_bug(&self) -> bool {
        matches!(self, EngineError::Bug(_))
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
