//! The explicit per-invocation context passed to `process`, replacing
//! the original's thread-local "current task" lookup
//! (`spec.md` \S9 "Thread-local current task").
//!
//! Grounded on the helper surface of `original_source/src/Module.h`
//! (`sleep`, `yield`, `isCancelled`, `setProgress`) and
//! `InPortLockUnlock.h` / `OutPortLockUnlock.h` (scoped lock release).

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use crate::attribute::Attribute;
use crate::cell::CellWriteGuard;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::ids::PortId;
use crate::module::Module;
use crate::task::ModuleTask;
use crate::types::TypedData;

/// Module-author surface available inside `process` (`spec.md` \S6).
///
/// Dropping the context releases every in-port reservation still held
/// and any reserved-but-unpublished out-port write lock, mirroring the
/// original's `InPortLockUnlock`/`OutPortLockUnlock` RAII guards.
pub struct ProcessContext<'m> {
    module: &'m Module,
    task: &'m ModuleTask,
    dispatcher: &'m Dispatcher,
    caught_in_ports: RefCell<Vec<usize>>,
    reserved_out: RefCell<HashMap<usize, CellWriteGuard<'m>>>,
}

impl<'m> ProcessContext<'m> {
    pub(crate) fn new(module: &'m Module, task: &'m ModuleTask, dispatcher: &'m Dispatcher) -> Self {
        ProcessContext {
            module,
            task,
            dispatcher,
            caught_in_ports: RefCell::new(Vec::new()),
            reserved_out: RefCell::new(HashMap::new()),
        }
    }

    /// The in-port that triggered this task, if any (a direct run has
    /// none).
    pub fn triggering_port(&self) -> Option<PortId> {
        self.task.triggering_port()
    }

    /// Sleeps for `duration`, waking early if cancellation is
    /// requested. Returns `true` if cancellation was observed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let step = Duration::from_millis(20).min(duration);
        let mut remaining = duration;
        loop {
            if self.task.is_cancel_requested() {
                return true;
            }
            if remaining.is_zero() {
                return false;
            }
            let this_step = step.min(remaining);
            std::thread::sleep(this_step);
            remaining -= this_step;
        }
    }

    /// Cooperative yield point. Returns `true` if cancellation was
    /// observed.
    pub fn yield_now(&self) -> bool {
        std::thread::yield_now();
        self.task.is_cancel_requested()
    }

    /// Whether cancellation has been requested for this task.
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancel_requested()
    }

    /// Requests immediate cancellation of the whole module, as opposed
    /// to just this task (`spec.md` \S9: task-initiated cancel is
    /// immediate, unlike an externally-initiated one).
    pub fn cancel_module(&self) {
        self.module.cancel_immediate(self.dispatcher);
    }

    /// Reports fractional progress, `0.0..=1.0`, for UIs to display.
    pub fn set_progress(&self, fraction: f32) {
        self.task.set_progress(fraction);
    }

    /// Non-blocking attempt to reserve and lock in-port `idx`
    /// (`try-catch-source` applied to one port).
    pub fn try_catch_source(&self, idx: usize) -> Result<bool> {
        let port = self.module.in_port(idx)?;
        let caught = port.try_catch_source(self.dispatcher)?;
        if caught {
            self.caught_in_ports.borrow_mut().push(idx);
        }
        Ok(caught)
    }

    /// Reads the currently held data of in-port `idx`.
    pub fn read_in_port_data<T: TypedData>(&self, idx: usize) -> Result<T> {
        self.module.in_port(idx)?.read_data::<T>(self.dispatcher)
    }

    /// Reads the attribute of the currently held data of in-port `idx`.
    pub fn read_in_port_data_attribute(&self, idx: usize) -> Result<Attribute> {
        self.module.in_port(idx)?.read_data_attribute(self.dispatcher)
    }

    /// Releases in-port `idx`'s reservation, if held.
    pub fn release_in_port(&self, idx: usize) {
        if let Ok(port) = self.module.in_port(idx) {
            port.release(self.dispatcher);
        }
        self.caught_in_ports.borrow_mut().retain(|&i| i != idx);
    }

    /// Releases every in-port reservation still held.
    pub fn release_all_in_ports(&self) {
        let caught = std::mem::take(&mut *self.caught_in_ports.borrow_mut());
        for idx in caught {
            if let Ok(port) = self.module.in_port(idx) {
                port.release(self.dispatcher);
            }
        }
    }

    /// Reserves out-port `idx`'s write lock ahead of a publish.
    pub fn reserve_out_port(&self, idx: usize) -> Result<()> {
        let port = self.module.out_port(idx)?;
        let guard = port.reserve()?;
        self.reserved_out.borrow_mut().insert(idx, guard);
        Ok(())
    }

    /// Reserves every listed out-port.
    pub fn reserve_out_ports(&self, idxs: &[usize]) -> Result<()> {
        for &idx in idxs {
            self.reserve_out_port(idx)?;
        }
        Ok(())
    }

    /// Writes `value` into the already-reserved out-port `idx`.
    pub fn get_data_to_write<T: TypedData>(&self, idx: usize, value: T) -> Result<()> {
        let mut reserved = self.reserved_out.borrow_mut();
        let guard = reserved
            .get_mut(&idx)
            .ok_or_else(|| EngineError::invalid_state("out-port not reserved"))?;
        guard.set_new_data(value.into_value());
        Ok(())
    }

    /// Publishes out-port `idx`'s reserved write, releasing the lock
    /// and fanning out to bound targets.
    pub fn notify_out_port_ready(&self, idx: usize, attribute: Attribute) -> Result<()> {
        let guard = self
            .reserved_out
            .borrow_mut()
            .remove(&idx)
            .ok_or_else(|| EngineError::invalid_state("out-port not reserved"))?;
        let port = self.module.out_port(idx)?;
        port.notify_ready(self.dispatcher, guard, attribute)
    }

    /// Publishes every currently reserved out-port with the same
    /// attribute.
    pub fn notify_all_out_port_ready(&self, attribute: Attribute) -> Result<()> {
        let idxs: Vec<usize> = self.reserved_out.borrow().keys().copied().collect();
        for idx in idxs {
            self.notify_out_port_ready(idx, attribute.clone())?;
        }
        Ok(())
    }

    /// Drops every reserved-but-unpublished out-port write lock.
    pub fn release_all_out_ports(&self) {
        self.reserved_out.borrow_mut().clear();
    }
}

impl Drop for ProcessContext<'_> {
    fn drop(&mut self) {
        self.release_all_in_ports();
        self.release_all_out_ports();
    }
}
