//! `ModuleTask`: one dispatched run of a module's `process`
//! (`spec.md` \S4.3, \S4.6).
//!
//! Grounded on `original_source/src/ModuleTask.{h,cpp}`. The original's
//! thread-local "current task" pointer is replaced here by an explicit
//! [`crate::context::ProcessContext`] borrowing this task for the
//! duration of one `run` call.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::dispatcher::Dispatcher;
use crate::ids::PortId;
use crate::module::Module;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Running,
    Done,
}

/// A single scheduled invocation of a module's `process`. At most one
/// `ModuleTask` per module runs at a time; additional wakes that arrive
/// while one is running are offered to it via [`ModuleTask::try_merge`]
/// instead of queuing a redundant run.
pub struct ModuleTask {
    id: usize,
    name: String,
    module: Arc<Module>,
    triggering_port: Option<PortId>,
    cancel_requested: AtomicBool,
    progress_bits: AtomicU32,
    state: Mutex<TaskState>,
    done: Condvar,
}

impl ModuleTask {
    /// Creates a new, not-yet-queued task.
    pub fn new(id: usize, module: Arc<Module>, triggering_port: Option<PortId>) -> Arc<ModuleTask> {
        let name = format!("{}-t{}", module.internal_name(), id);
        Arc::new(ModuleTask {
            id,
            name,
            module,
            triggering_port,
            cancel_requested: AtomicBool::new(false),
            progress_bits: AtomicU32::new(0.0f32.to_bits()),
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        })
    }

    /// The task's generated name, `"<module>-t<id>"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's process-wide id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The in-port that woke this task, if it was not a direct run.
    pub fn triggering_port(&self) -> Option<PortId> {
        self.triggering_port
    }

    /// Whether this task (or its module, at large) has been asked to
    /// cancel.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst) || self.module.is_cancelling()
    }

    /// Marks the task itself for cancellation (distinct from the
    /// module-wide flag set by [`Module::cancel_immediate`] /
    /// [`Module::cancel_lazy`]).
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Reports fractional progress, clamped to `0.0..=1.0`.
    pub fn set_progress(&self, fraction: f32) {
        self.progress_bits.store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// The last reported progress.
    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Relaxed))
    }

    /// Offers to absorb `other`'s wake into this task's still-pending
    /// (or running) pass, so `other` never itself runs. Fails once this
    /// task has finished, since there is no pass left to absorb into.
    pub fn try_merge(&self, _other: &Arc<ModuleTask>) -> bool {
        *self.state.lock().unwrap() != TaskState::Done
    }

    /// Runs the module's start-condition loop and `process`, then marks
    /// the task done and wakes any waiter. Called once, from the
    /// thread-pool worker that was handed this task.
    pub fn run(self: &Arc<Self>, module: &Arc<Module>, dispatcher: &Dispatcher) {
        *self.state.lock().unwrap() = TaskState::Running;
        if let Err(err) = module.run_task(self, dispatcher) {
            log::warn!("task {} failed: {err}", self.name);
        }
        let mut state = self.state.lock().unwrap();
        *state = TaskState::Done;
        self.done.notify_all();
    }

    /// Blocks the calling thread until this task has finished running.
    pub fn wait_done(&self) {
        let mut state = self.state.lock().unwrap();
        while *state != TaskState::Done {
            state = self.done.wait(state).unwrap();
        }
    }

    /// Whether this task has finished running.
    pub fn is_done(&self) -> bool {
        *self.state.lock().unwrap() == TaskState::Done
    }
}
