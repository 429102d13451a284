//! Stable integer handles used to break the source/target reference
//! cycle (`spec.md` \S9 "Cycles and back-references").
//!
//! The `Dispatcher` is the only place that resolves a [`PortId`] back to
//! a live port; every other component only ever stores the id.

use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide unique handle to a port, proxy, logger or parameter
/// worker registered with the [`crate::dispatcher::Dispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl PortId {
    /// Allocates a fresh, never-before-issued id.
    pub fn fresh() -> PortId {
        PortId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tagged discriminant for "what a `DataTarget` is", replacing the
/// `dynamic_cast` chain in the original C++ (`spec.md` \S9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// A module's input port.
    InPort,
    /// A module's trigger port (accepts any type).
    TrigPort,
    /// A data logger sink.
    Logger,
    /// A data proxy's target half.
    Proxy,
    /// A parameter setter.
    ParamSetter,
}
