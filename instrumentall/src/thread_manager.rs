//! A bounded worker pool dispatching [`crate::task::ModuleTask`] runs
//! (`spec.md` \S4.5).
//!
//! Grounded on `TimelyDataflow-timely-dataflow`'s
//! `communication/src/initialize.rs`, which spawns one `std::thread`
//! per worker up front and hands each a closure to run; here the pool
//! is fixed-size and work is submitted through a channel instead of
//! each thread owning a fixed dataflow, since module tasks are
//! short-lived and arrive at unpredictable times.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::engine::Engine;
use crate::module::Module;
use crate::task::ModuleTask;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs [`ModuleTask`]s on a fixed-size pool of named worker threads.
pub struct ThreadManager {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: Mutex<Vec<Arc<ModuleTask>>>,
    pool_size: usize,
}

impl ThreadManager {
    /// Spawns `pool_size` worker threads, each named `instrumentall-worker-N`.
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(pool_size);
        for n in 0..pool_size {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("instrumentall-worker-{n}"))
                .spawn(move || loop {
                    let job = {
                        let guard = receiver.lock().unwrap();
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
                .expect("failed to spawn instrumentall worker thread");
            workers.push(handle);
        }
        ThreadManager {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            running: Mutex::new(Vec::new()),
            pool_size,
        }
    }

    /// The configured pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Adds `task` to the directory of tasks currently dispatched to the
    /// pool (`spec.md` \S4.5's `register-new-module-task`).
    fn register_new_module_task(&self, task: &Arc<ModuleTask>) {
        self.running.lock().unwrap().push(task.clone());
    }

    fn unregister_module_task(&self, task: &Arc<ModuleTask>) {
        self.running.lock().unwrap().retain(|t| !Arc::ptr_eq(t, task));
    }

    /// Submits a module task to the pool. Runs the task, then notifies
    /// the owning module so it can dispatch whatever is queued next.
    pub fn start_module_task(&self, task: Arc<ModuleTask>, module: Arc<Module>, engine: Arc<Engine>) {
        self.register_new_module_task(&task);
        let job: Job = Box::new(move || {
            task.run(&module, engine.dispatcher());
            engine.thread_manager().unregister_module_task(&task);
            module.on_task_finished(&task);
        });
        let sender = self.sender.lock().unwrap();
        if let Some(sender) = sender.as_ref() {
            if sender.send(job).is_err() {
                log::warn!("instrumentall thread pool channel closed; task {} dropped", task.name());
            }
        }
    }

    /// Runs a module task synchronously on the calling thread, bypassing
    /// the pool. Used by tests and by callers that need a deterministic
    /// happens-before relationship with the task's completion.
    pub fn start_sync_module_task(&self, task: Arc<ModuleTask>, module: Arc<Module>, dispatcher: &crate::dispatcher::Dispatcher) {
        self.register_new_module_task(&task);
        task.run(&module, dispatcher);
        self.unregister_module_task(&task);
        module.on_task_finished(&task);
    }

    /// The number of tasks currently dispatched to the pool (queued or
    /// running a `process` call), per `spec.md` \S4.5's `count`.
    pub fn count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Sets the cancel flag on every currently dispatched task and blocks
    /// until each has finished, per `spec.md` \S4.5's `cancel-all`.
    pub fn cancel_all(&self) {
        let tasks = self.running.lock().unwrap().clone();
        for task in &tasks {
            task.request_cancel();
        }
        for task in &tasks {
            task.wait_done();
        }
    }

    /// Blocks until every currently dispatched task has finished, without
    /// requesting cancellation (`spec.md` \S4.5's `wait-all`).
    pub fn wait_all(&self) {
        let tasks = self.running.lock().unwrap().clone();
        for task in &tasks {
            task.wait_done();
        }
    }

    /// Closes the submission channel so worker threads exit their loops
    /// once their queue drains, then joins them.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap().take();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::context::ProcessContext;
    use crate::engine::Engine;
    use crate::error::Result;
    use crate::module::{ModuleBuilder, ModuleLogic, StartCondition};

    struct SleepUntilCancelled {
        cancelled: Arc<AtomicBool>,
    }
    impl ModuleLogic for SleepUntilCancelled {
        fn process(&self, ctx: &ProcessContext<'_>, _start: StartCondition) -> Result<()> {
            while !ctx.sleep(Duration::from_millis(5)) {}
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn count_tracks_in_flight_tasks_and_cancel_all_unblocks_them() {
        let engine = Engine::with_pool_size(2);
        let cancelled = Arc::new(AtomicBool::new(false));
        let module = ModuleBuilder::new("m.sleeper", "Sleeper")
            .build(&engine, Box::new(SleepUntilCancelled { cancelled: cancelled.clone() }))
            .unwrap();

        module.run_direct().unwrap();
        for _ in 0..200 {
            if engine.thread_manager().count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.thread_manager().count(), 1);

        engine.thread_manager().cancel_all();
        assert!(cancelled.load(Ordering::SeqCst));
        for _ in 0..200 {
            if engine.thread_manager().count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.thread_manager().count(), 0);
    }

    struct NoOp;
    impl ModuleLogic for NoOp {
        fn process(&self, _ctx: &ProcessContext<'_>, _start: StartCondition) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn wait_all_blocks_until_dispatched_tasks_finish() {
        let engine = Engine::with_pool_size(1);
        let module = ModuleBuilder::new("m.gen", "Gen").build(&engine, Box::new(NoOp)).unwrap();
        module.run_direct().unwrap();
        engine.thread_manager().wait_all();
        for _ in 0..200 {
            if engine.thread_manager().count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.thread_manager().count(), 0);
    }
}
