//! The `Engine` handle: owns every piece of process-wide mutable state
//! so that independent engines (e.g. one per test) never interfere.
//!
//! `spec.md` \S9 "Global mutable state": the original has three
//! process-wide counters (value index, sequence index, unique names).
//! Here they live behind one `Arc`-shared handle instead of statics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::module::ModuleHandle;
use crate::thread_manager::ThreadManager;

#[derive(Debug, Default)]
struct Counters {
    value_index: AtomicUsize,
    sequence_index: AtomicUsize,
    task_id: AtomicUsize,
}

impl Counters {
    fn next_value_index(&self) -> usize {
        self.value_index.fetch_add(1, Ordering::Relaxed)
    }

    fn next_sequence_index(&self) -> usize {
        self.sequence_index.fetch_add(1, Ordering::Relaxed)
    }

    fn next_task_id(&self) -> usize {
        self.task_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// The two-name registry used by modules, proxies and loggers alike
/// (`spec.md` \S3 "Module... Two unique names").
#[derive(Debug, Default)]
struct NameRegistry {
    names: std::collections::HashSet<String>,
}

impl NameRegistry {
    fn reserve(&mut self, internal: &str, user: &str) -> Result<()> {
        if self.names.contains(internal) {
            return Err(EngineError::name_conflict(internal));
        }
        if self.names.contains(user) {
            return Err(EngineError::name_conflict(user));
        }
        self.names.insert(internal.to_string());
        self.names.insert(user.to_string());
        Ok(())
    }

    fn release(&mut self, internal: &str, user: &str) {
        self.names.remove(internal);
        self.names.remove(user);
    }
}

/// Owns the process-wide counters, the [`Dispatcher`], the
/// [`ThreadManager`] and the module name registry. Created once per
/// independent computation; tests typically create one `Engine` each.
pub struct Engine {
    counters: Counters,
    names: Mutex<NameRegistry>,
    modules: Mutex<std::collections::HashMap<String, ModuleHandle>>,
    dispatcher: Dispatcher,
    threads: ThreadManager,
}

impl Engine {
    /// Creates a new engine with a thread pool sized to the available
    /// hardware parallelism (`spec.md` \S4.5 default).
    pub fn new() -> Arc<Engine> {
        Self::with_pool_size(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    /// Creates a new engine with an explicit worker pool size.
    pub fn with_pool_size(pool_size: usize) -> Arc<Engine> {
        Arc::new(Engine {
            counters: Counters::default(),
            names: Mutex::new(NameRegistry::default()),
            modules: Mutex::new(std::collections::HashMap::new()),
            dispatcher: Dispatcher::new(),
            threads: ThreadManager::new(pool_size),
        })
    }

    /// The engine's global dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The engine's thread manager.
    pub fn thread_manager(&self) -> &ThreadManager {
        &self.threads
    }

    /// Draws the next process-wide value index (`spec.md` \S3 A4/I.1).
    pub fn next_value_index(&self) -> usize {
        self.counters.next_value_index()
    }

    /// Draws the next process-wide sequence identifier.
    pub fn next_sequence_index(&self) -> usize {
        self.counters.next_sequence_index()
    }

    /// Draws the next process-wide task id.
    pub fn next_task_id(&self) -> usize {
        self.counters.next_task_id()
    }

    /// Registers a module's two unique names, rejecting a collision
    /// with `NameConflict` (`spec.md` \S3, \S7).
    pub fn register_names(&self, internal: &str, user: &str) -> Result<()> {
        self.names.lock().unwrap().reserve(internal, user)
    }

    /// Releases both names, e.g. on module teardown.
    pub fn release_names(&self, internal: &str, user: &str) {
        self.names.lock().unwrap().release(internal, user);
    }

    /// Records a module handle in the engine-wide registry so it can be
    /// looked up by either unique name.
    pub fn register_module(&self, handle: ModuleHandle) {
        let mut modules = self.modules.lock().unwrap();
        modules.insert(handle.internal_name().to_string(), handle.clone());
        modules.insert(handle.user_name().to_string(), handle);
    }

    /// Looks a module up by either of its unique names.
    pub fn get_module(&self, name: &str) -> Option<ModuleHandle> {
        self.modules.lock().unwrap().get(name).cloned()
    }

    /// Removes a module from the registry and releases its names.
    pub fn unregister_module(&self, internal: &str, user: &str) {
        let mut modules = self.modules.lock().unwrap();
        modules.remove(internal);
        modules.remove(user);
        drop(modules);
        self.release_names(internal, user);
    }
}
