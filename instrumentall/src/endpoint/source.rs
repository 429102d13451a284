//! The source half of the data-readiness protocol (`spec.md` \S4.2).
//!
//! Grounded on `original_source/src/DataSource.{h,cpp}`. Embedded as a
//! field (composition over the original's virtual inheritance, per
//! `spec.md` \S9) inside [`crate::port::out_port::OutPort`],
//! `DataProxy`'s source half and `ParameterGetter`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::attribute::Attribute;
use crate::cell::{CellReadGuard, CellWriteGuard, DataCell};
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::ids::PortId;

/// Shared logic every data source embeds: the cell, the notifying flag,
/// and the per-notify-round pending/reserved target bookkeeping.
pub struct SourceCore {
    id: PortId,
    cell: DataCell,
    notifying: AtomicBool,
    cancelling: AtomicBool,
    pending: Mutex<HashSet<PortId>>,
    reserved: Mutex<HashSet<PortId>>,
}

impl SourceCore {
    /// Creates a new source core with a fresh id.
    pub fn new() -> Self {
        SourceCore {
            id: PortId::fresh(),
            cell: DataCell::new(),
            notifying: AtomicBool::new(false),
            cancelling: AtomicBool::new(false),
            pending: Mutex::new(HashSet::new()),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// This source's stable id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// The underlying data cell.
    pub fn cell(&self) -> &DataCell {
        &self.cell
    }

    /// Whether the source is mid cancellation; any protocol operation
    /// raises [`EngineError::ExecutionAborted`] while this holds.
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::SeqCst)
    }

    /// Sets or clears the cancelling flag. Clearing is only valid once
    /// propagation has reached a fixed point (`reset`, \S4.6).
    pub fn set_cancelling(&self, value: bool) {
        self.cancelling.store(value, Ordering::SeqCst);
    }

    fn check_not_cancelling(&self) -> Result<()> {
        if self.is_cancelling() {
            Err(EngineError::ExecutionAborted)
        } else {
            Ok(())
        }
    }

    /// Phase 1: reserve the write lock. Fails while the source is
    /// notifying, while any targets are still pending from a prior
    /// round, or while the cell lock is already held.
    pub fn try_write_data_lock(&self) -> Result<CellWriteGuard<'_>> {
        self.check_not_cancelling()?;
        if self.notifying.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("source is notifying"));
        }
        if !self.pending.lock().unwrap().is_empty() {
            return Err(EngineError::invalid_state("source has pending targets"));
        }
        self.cell
            .try_write_lock()
            .ok_or_else(|| EngineError::invalid_state("data cell is locked"))
    }

    /// Phase 3: publish. Stamps the attribute, drops the write guard,
    /// then asks the dispatcher to enqueue every currently bound
    /// target. Cancellation observed during the window raises
    /// `ExecutionAborted` and unwinds the notifying flag.
    pub fn notify_ready(
        &self,
        mut guard: CellWriteGuard<'_>,
        attribute: Attribute,
        dispatcher: &Dispatcher,
    ) -> Result<()> {
        guard.set_attribute(attribute);
        drop(guard);

        self.notifying.store(true, Ordering::SeqCst);
        let result = if self.is_cancelling() {
            Err(EngineError::ExecutionAborted)
        } else {
            dispatcher.set_output_data_ready(self.id);
            Ok(())
        };
        self.notifying.store(false, Ordering::SeqCst);
        result
    }

    /// Dispatcher-side: registers `target` as pending before scheduling
    /// its work.
    pub fn register_pending_target(&self, target: PortId) -> Result<()> {
        self.check_not_cancelling()?;
        self.pending.lock().unwrap().insert(target);
        Ok(())
    }

    /// Target-side: attempts to move `target` from pending to reserved.
    /// Returns `true` exactly when `target` was pending and not already
    /// reserved.
    pub fn try_reserve_data_for_target(&self, target: PortId) -> bool {
        let pending = self.pending.lock().unwrap();
        if !pending.contains(&target) {
            return false;
        }
        drop(pending);
        self.reserved.lock().unwrap().insert(target)
    }

    /// Target-side: acquires the read lock after a successful
    /// reservation. Panics if `target` was never reserved, matching the
    /// original's contract.
    pub fn read_lock_data_for_target(&self, target: PortId) -> CellReadGuard<'_> {
        assert!(
            self.reserved.lock().unwrap().contains(&target),
            "read_lock_data_for_target called without a successful reservation"
        );
        self.cell.read_lock()
    }

    /// Releases `target` from both the pending and reserved sets.
    /// Idempotent: removal is unconditional regardless of prior state.
    pub fn release_target(&self, target: PortId) {
        self.pending.lock().unwrap().remove(&target);
        self.reserved.lock().unwrap().remove(&target);
    }

    /// Alias used when a target was registered pending but failed to
    /// reserve, for readability at call sites.
    pub fn target_release_read_on_failure(&self, target: PortId) {
        self.release_target(target);
    }

    /// Snapshot of pending target ids, used by the dispatcher to
    /// compute "exactly the targets bound at notify-ready start"
    /// (`spec.md` \S8 first invariant).
    pub fn pending_snapshot(&self) -> HashSet<PortId> {
        self.pending.lock().unwrap().clone()
    }
}

impl Default for SourceCore {
    fn default() -> Self {
        SourceCore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::types::DataValue;

    #[test]
    fn write_lock_refused_while_targets_pending() {
        let src = SourceCore::new();
        src.register_pending_target(PortId::fresh()).unwrap();
        assert!(src.try_write_data_lock().is_err());
    }

    #[test]
    fn reserve_then_release_is_idempotent() {
        let src = SourceCore::new();
        let t = PortId::fresh();
        src.register_pending_target(t).unwrap();
        assert!(src.try_reserve_data_for_target(t));
        assert!(!src.try_reserve_data_for_target(t));
        src.release_target(t);
        src.release_target(t);
        assert!(!src.try_reserve_data_for_target(t));
    }

    #[test]
    fn cancelling_rejects_new_reservations() {
        let src = SourceCore::new();
        src.set_cancelling(true);
        assert!(matches!(
            src.register_pending_target(PortId::fresh()),
            Err(EngineError::ExecutionAborted)
        ));
    }

    #[test]
    fn produce_then_notify_round_trips() {
        let _engine = Engine::new();
        let src = SourceCore::new();
        let mut guard = src.try_write_data_lock().unwrap();
        guard.set_new_data(DataValue::I32(7));
        assert_eq!(guard.get_data::<i32>().unwrap(), 7);
    }
}
