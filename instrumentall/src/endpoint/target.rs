//! The target half of the data-readiness protocol (`spec.md` \S4.2) and
//! the common cancel/reset fan-out contract every target kind obeys.
//!
//! Grounded on `original_source/src/DataTarget.{h,cpp}`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::dispatcher::Dispatcher;
use crate::ids::{PortId, TargetKind};

thread_local! {
    /// Per-thread re-entrancy guard for `wait_cancelled`, preventing a
    /// cycle of targets waiting on each other from deadlocking
    /// (`spec.md` \S5 "already waiting" flag).
    static WAITING: RefCell<HashSet<PortId>> = RefCell::new(HashSet::new());
}

/// Runs `body` guarded against re-entrant waits on `id` from the same
/// thread. Returns `None` (without invoking `body`) if this thread is
/// already waiting on `id`.
pub fn guarded_wait<R>(id: PortId, body: impl FnOnce() -> R) -> Option<R> {
    let already = WAITING.with(|w| !w.borrow_mut().insert(id));
    if already {
        return None;
    }
    let result = body();
    WAITING.with(|w| {
        w.borrow_mut().remove(&id);
    });
    Some(result)
}

/// Shared logic every data target embeds: its id, kind tag, and the
/// single optional bound source (`spec.md` \S3 "a Target holds at most
/// one source").
pub struct TargetCore {
    id: PortId,
    kind: TargetKind,
    source: Mutex<Option<PortId>>,
}

impl TargetCore {
    /// Creates a new target core of the given kind with a fresh id.
    pub fn new(kind: TargetKind) -> Self {
        TargetCore {
            id: PortId::fresh(),
            kind,
            source: Mutex::new(None),
        }
    }

    /// This target's stable id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// The tagged kind of this target.
    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// The currently bound source, if any.
    pub fn source(&self) -> Option<PortId> {
        *self.source.lock().unwrap()
    }

    /// Sets the bound source, replacing whatever was bound before.
    /// Binding itself (asking the old/new source to update their
    /// target sets) is the [`Dispatcher`]'s job; this only updates the
    /// target's own pointer.
    pub fn set_source(&self, source: Option<PortId>) {
        *self.source.lock().unwrap() = source;
    }
}

/// Implemented by every kind of data target: in-port, trigger port,
/// data logger, data proxy, parameter setter (`spec.md` \S9 tagged
/// variant note). The [`Dispatcher`] holds these as trait objects so it
/// can fan out notify/cancel/reset without knowing the concrete kind.
pub trait Target: Send + Sync {
    /// This target's stable id.
    fn id(&self) -> PortId;

    /// The tagged kind of this target, for diagnostics and for callers
    /// that need to special-case one kind (e.g. module start-condition
    /// computation skipping trigger ports).
    fn kind(&self) -> TargetKind;

    /// Whether this target accepts the given data type; a `TrigPort`
    /// accepts everything.
    fn accepts_type(&self, data_type: crate::types::DataType) -> bool;

    /// The source currently bound to this target, if any.
    fn bound_source(&self) -> Option<PortId>;

    /// Updates the bound source pointer. Called only by the
    /// [`Dispatcher`] as part of `bind`/`unbind`.
    fn set_bound_source(&self, source: Option<PortId>);

    /// Called by the dispatcher once this target has been registered
    /// pending on `source`. Performs (directly, or by scheduling a
    /// task) the reserve -> read-lock -> consume -> release sequence.
    fn try_run_target(&self, dispatcher: &Dispatcher, source: PortId);

    /// Propagates cancellation to this target and, through it, further
    /// downstream.
    fn cancel(&self, dispatcher: &Dispatcher);

    /// Blocks until this target (and everything reachable downstream
    /// from it) has observed cancellation. Re-entrancy safe.
    fn wait_cancelled(&self, dispatcher: &Dispatcher);

    /// Clears cancellation state; only valid once `wait_cancelled`
    /// would return immediately.
    fn reset(&self, dispatcher: &Dispatcher);
}
