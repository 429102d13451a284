//! `Module`: a named, parameterized processing node with typed in/out
//! ports (`spec.md` \S3, \S4.1, \S4.6).
//!
//! Grounded on `original_source/src/Module.{h,cpp}` and
//! `ModuleManager.h` (the registry half, folded here into
//! [`crate::engine::Engine`] per `spec.md`'s \S3 addition of a
//! `ModuleRegistry`). Task scheduling (at most one running task per
//! module, with same-module tasks free to coalesce) is grounded on the
//! same file's `enqueueTask`/`taskFinished` pair.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use crate::context::ProcessContext;
use crate::dispatcher::Dispatcher;
use crate::endpoint::{SeqTarget, Source, Target};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::ids::PortId;
use crate::parameter::{ParamValue, ParameterSet};
use crate::port::{InPort, OutPort};
use crate::task::ModuleTask;
use crate::types::{DataType, ElemType};

/// What a task's start-condition loop found before `process` ran
/// (`spec.md` \S4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartCondition {
    /// The module has no in-ports at all.
    NoData,
    /// Every declared in-port, bound or not, was caught.
    AllData,
    /// Every currently-bound in-port was caught; unbound ports were
    /// skipped.
    AllPluggedData,
    /// Cancellation was observed before every bound port was caught.
    Cancelled,
}

/// The module-author's actual computation, invoked once per dispatched
/// task with the start condition the engine computed
/// (`original_source/src/Module.h`'s pure-virtual `process`).
pub trait ModuleLogic: Send + Sync {
    /// Runs one step of the module's computation.
    fn process(&self, ctx: &ProcessContext<'_>, start: StartCondition) -> Result<()>;

    /// Called once when the module is cancelled (lazily or
    /// immediately); default is a no-op since most modules only need
    /// `ctx.is_cancelled()` checked inside `process`.
    fn on_cancel(&self) {}

    /// Called once when the module is reset out of a cancelled state.
    fn on_reset(&self) {}
}

struct QueueState {
    queue: VecDeque<Arc<ModuleTask>>,
    running: Option<Arc<ModuleTask>>,
}

/// An owning handle to a module, shared between the [`Engine`]'s
/// registry, its ports' `Weak<Module>` back-references, and callers
/// that built it via [`ModuleBuilder`].
pub type ModuleHandle = Arc<Module>;

/// A dataflow processing node (`spec.md` \S3 "Module").
pub struct Module {
    internal_name: String,
    user_name: String,
    engine: Weak<Engine>,
    logic: Box<dyn ModuleLogic>,
    in_ports: Vec<Arc<InPort>>,
    out_ports: Vec<Arc<OutPort>>,
    parameters: ParameterSet,
    queue: Mutex<QueueState>,
    cancelling: std::sync::atomic::AtomicBool,
}

impl Module {
    /// The module's internal (stable, machine-facing) name.
    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    /// The module's user-facing display name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// The owning engine, if still alive.
    pub fn engine(&self) -> Option<Arc<Engine>> {
        self.engine.upgrade()
    }

    /// This module's declared parameters.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// In-port `idx`, including trigger ports.
    pub fn in_port(&self, idx: usize) -> Result<&Arc<InPort>> {
        self.in_ports
            .get(idx)
            .ok_or_else(|| EngineError::not_bound(format!("in-port index {idx}")))
    }

    /// Out-port `idx`.
    pub fn out_port(&self, idx: usize) -> Result<&Arc<OutPort>> {
        self.out_ports
            .get(idx)
            .ok_or_else(|| EngineError::not_bound(format!("out-port index {idx}")))
    }

    /// Number of declared in-ports.
    pub fn in_port_count(&self) -> usize {
        self.in_ports.len()
    }

    /// Number of declared out-ports.
    pub fn out_port_count(&self) -> usize {
        self.out_ports.len()
    }

    /// Whether the module is currently in a cancelled state (awaiting
    /// `reset`).
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Called by an in-port's `Target::try_run_target` when a wake
    /// arrives: builds a task and either merges it into whatever is
    /// running or enqueues it (`spec.md` \S4.3 "creates a runnable task
    /// per wake").
    pub(crate) fn on_in_port_woken(self: &Arc<Self>, triggering: PortId) {
        if self.is_cancelling() {
            return;
        }
        let Some(engine) = self.engine.upgrade() else { return };
        let task = ModuleTask::new(engine.next_task_id(), self.clone(), Some(triggering));
        self.enqueue_task(task);
    }

    /// Schedules a direct (untriggered) run, as used for source modules
    /// with no in-ports, or to force a re-evaluation of bound-but-not
    /// woken ports.
    pub fn run_direct(self: &Arc<Self>) -> Result<()> {
        let engine = self.engine.upgrade().ok_or_else(|| EngineError::invalid_state("engine dropped"))?;
        let task = ModuleTask::new(engine.next_task_id(), self.clone(), None);
        self.enqueue_task(task);
        Ok(())
    }

    fn enqueue_task(self: &Arc<Self>, task: Arc<ModuleTask>) {
        let mut state = self.queue.lock().unwrap();
        if let Some(running) = state.running.clone() {
            if running.try_merge(&task) {
                log::debug!("module {}: merged {} into running {}", self.internal_name, task.name(), running.name());
                return;
            }
        }
        state.queue.push_back(task);
        self.dispatch_next(&mut state);
    }

    fn dispatch_next(self: &Arc<Self>, state: &mut QueueState) {
        if state.running.is_some() {
            return;
        }
        let Some(task) = state.queue.pop_front() else { return };
        state.running = Some(task.clone());
        if let Some(engine) = self.engine.upgrade() {
            let module = self.clone();
            engine.thread_manager().start_module_task(task, module, engine.clone());
        }
    }

    /// Called by the thread pool worker after a task's `run` returns,
    /// to clear the running slot and dispatch whatever is next in
    /// queue.
    pub(crate) fn on_task_finished(self: &Arc<Self>, finished: &Arc<ModuleTask>) {
        let mut state = self.queue.lock().unwrap();
        if matches!(&state.running, Some(running) if Arc::ptr_eq(running, finished)) {
            state.running = None;
        }
        self.dispatch_next(&mut state);
    }

    /// Runs the start-condition loop and then the module's `process`
    /// (`spec.md` \S4.6). Called from [`ModuleTask::run`].
    pub(crate) fn run_task(self: &Arc<Self>, task: &ModuleTask, dispatcher: &Dispatcher) -> Result<()> {
        for out_port in &self.out_ports {
            out_port.expire();
        }
        self.parameters.try_apply_parameters()?;
        let start = self.compute_start_condition(task, dispatcher)?;
        if start == StartCondition::Cancelled {
            return Ok(());
        }
        let ctx = ProcessContext::new(self, task, dispatcher);
        self.logic.process(&ctx, start)
    }

    fn compute_start_condition(&self, task: &ModuleTask, dispatcher: &Dispatcher) -> Result<StartCondition> {
        if self.in_ports.is_empty() {
            return Ok(StartCondition::NoData);
        }
        if task.triggering_port().is_none() {
            // A direct run takes one non-blocking pass: whatever is
            // ready right now is what the module gets.
            let mut caught_any = false;
            let mut all_bound_caught = true;
            let mut any_unbound = false;
            for port in &self.in_ports {
                if port.bound_source().is_none() {
                    any_unbound = true;
                    continue;
                }
                if port.try_catch_source(dispatcher)? {
                    caught_any = true;
                } else {
                    all_bound_caught = false;
                }
            }
            if !caught_any {
                return Ok(StartCondition::NoData);
            }
            return Ok(if any_unbound || !all_bound_caught {
                StartCondition::AllPluggedData
            } else {
                StartCondition::AllData
            });
        }
        loop {
            if task.is_cancel_requested() {
                return Ok(StartCondition::Cancelled);
            }
            let mut all_done = true;
            let mut any_unbound = false;
            for port in &self.in_ports {
                if port.is_held() {
                    continue;
                }
                if port.bound_source().is_none() {
                    any_unbound = true;
                    continue;
                }
                if !port.try_catch_source(dispatcher)? {
                    all_done = false;
                }
            }
            if all_done {
                return Ok(if any_unbound {
                    StartCondition::AllPluggedData
                } else {
                    StartCondition::AllData
                });
            }
            std::thread::yield_now();
        }
    }

    /// Task-self-initiated cancellation: the running task's own
    /// `process` decided to abort, so the module stops immediately
    /// rather than waiting for the current pass to finish naturally
    /// (`spec.md` \S9, resolved Open Question: task-initiated cancel is
    /// immediate).
    pub fn cancel_immediate(&self, dispatcher: &Dispatcher) {
        if !self.cancelling.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.logic.on_cancel();
            for port in &self.out_ports {
                dispatcher.dispatch_target_cancel(Source::id(port.as_ref()));
            }
        }
    }

    /// Externally-initiated cancellation (e.g. a UI action): lazy,
    /// letting any currently running task return before the module's
    /// out-ports propagate cancellation downstream (`spec.md` \S9,
    /// resolved Open Question).
    pub fn cancel_lazy(&self, dispatcher: &Dispatcher) {
        self.cancelling.store(true, std::sync::atomic::Ordering::SeqCst);
        self.wait_running_task();
        self.logic.on_cancel();
        for port in &self.out_ports {
            dispatcher.dispatch_target_cancel(Source::id(port.as_ref()));
        }
    }

    fn wait_running_task(&self) {
        let running = self.queue.lock().unwrap().running.clone();
        if let Some(task) = running {
            task.wait_done();
        }
    }

    /// Clears a cancelled module back to runnable, resetting every
    /// out-port downstream.
    pub fn reset(&self, dispatcher: &Dispatcher) -> Result<()> {
        if !self.is_cancelling() {
            return Err(EngineError::invalid_state("reset requires a cancelled module"));
        }
        for port in &self.out_ports {
            dispatcher.dispatch_target_reset(Source::id(port.as_ref()));
        }
        for port in &self.in_ports {
            Target::reset(port.as_ref(), dispatcher);
        }
        self.logic.on_reset();
        self.cancelling.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

/// Builds a [`Module`], declaring its ports and parameters before it is
/// registered with an [`Engine`] (`original_source/src/Module.h`'s
/// constructor-time port/parameter declarations).
pub struct ModuleBuilder {
    internal_name: String,
    user_name: String,
    in_ports: Vec<InPortSpec>,
    out_ports: Vec<(String, String, DataType)>,
    parameters: Vec<(String, String, ParamValue)>,
}

struct InPortSpec {
    name: String,
    description: String,
    data_type: DataType,
    trigger: bool,
}

impl ModuleBuilder {
    /// Starts a new builder with the module's two unique names.
    pub fn new(internal_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        ModuleBuilder {
            internal_name: internal_name.into(),
            user_name: user_name.into(),
            in_ports: Vec::new(),
            out_ports: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Declares a typed in-port.
    pub fn add_in_port(mut self, name: impl Into<String>, description: impl Into<String>, data_type: DataType) -> Self {
        self.in_ports.push(InPortSpec {
            name: name.into(),
            description: description.into(),
            data_type,
            trigger: false,
        });
        self
    }

    /// Declares a trigger port (an in-port accepting any type, used
    /// only for its attribute).
    pub fn add_trig_port(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.in_ports.push(InPortSpec {
            name: name.into(),
            description: description.into(),
            data_type: DataType::Undefined,
            trigger: true,
        });
        self
    }

    /// Declares a typed out-port.
    pub fn add_out_port(mut self, name: impl Into<String>, description: impl Into<String>, data_type: DataType) -> Self {
        self.out_ports.push((name.into(), description.into(), data_type));
        self
    }

    /// Declares a parameter with its default value.
    pub fn add_parameter(mut self, name: impl Into<String>, description: impl Into<String>, default: ParamValue) -> Self {
        self.parameters.push((name.into(), description.into(), default));
        self
    }

    /// Overrides every declared parameter's default with whatever
    /// `resolver` has for its name, leaving unresolved ones untouched
    /// (`spec.md` \S6 ambient config hook).
    pub fn with_defaults_from(mut self, resolver: &dyn crate::config::ParamDefaultResolver) -> Self {
        let module_name = self.internal_name.clone();
        for (name, _, default) in &mut self.parameters {
            *default = crate::config::apply_override(resolver, &module_name, name, default.clone());
        }
        self
    }

    /// Registers the module's names with `engine`, builds every port,
    /// registers them with the dispatcher, and returns the finished
    /// handle.
    pub fn build(self, engine: &Arc<Engine>, logic: Box<dyn ModuleLogic>) -> Result<ModuleHandle> {
        engine.register_names(&self.internal_name, &self.user_name)?;

        let parameters = ParameterSet::new();
        for (name, description, default) in &self.parameters {
            parameters.add_parameter(name, description, default.clone());
        }

        let module = Arc::new_cyclic(|weak: &Weak<Module>| {
            let in_ports: Vec<Arc<InPort>> = self
                .in_ports
                .iter()
                .enumerate()
                .map(|(idx, spec)| {
                    if spec.trigger {
                        InPort::new_trig(&spec.name, &spec.description, idx, weak.clone())
                    } else {
                        InPort::new(&spec.name, &spec.description, spec.data_type, idx, weak.clone())
                    }
                })
                .collect();
            let out_ports: Vec<Arc<OutPort>> = self
                .out_ports
                .iter()
                .enumerate()
                .map(|(idx, (name, description, data_type))| OutPort::new(name, description, *data_type, idx, weak.clone()))
                .collect();
            Module {
                internal_name: self.internal_name.clone(),
                user_name: self.user_name.clone(),
                engine: Arc::downgrade(engine),
                logic,
                in_ports,
                out_ports,
                parameters,
                queue: Mutex::new(QueueState { queue: VecDeque::new(), running: None }),
                cancelling: std::sync::atomic::AtomicBool::new(false),
            }
        });

        let dispatcher = engine.dispatcher();
        for port in &module.in_ports {
            let target: Arc<dyn Target> = port.clone();
            dispatcher.register_target(&target);
            let seq_target: Arc<dyn SeqTarget> = port.clone();
            dispatcher.register_seq_target(&seq_target);
        }
        for port in &module.out_ports {
            let source: Arc<dyn Source> = port.clone();
            dispatcher.register_source(&source);
        }

        engine.register_module(module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessContext;

    struct NoOp;
    impl ModuleLogic for NoOp {
        fn process(&self, _ctx: &ProcessContext<'_>, _start: StartCondition) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builder_registers_ports_and_names() {
        let engine = Engine::with_pool_size(1);
        let module = ModuleBuilder::new("m.src", "Source")
            .add_out_port("out", "", DataType::Scalar(ElemType::I32))
            .build(&engine, Box::new(NoOp))
            .unwrap();
        assert_eq!(module.out_port_count(), 1);
        assert!(engine.get_module("m.src").is_some());
        assert!(engine.get_module("Source").is_some());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let engine = Engine::with_pool_size(1);
        ModuleBuilder::new("m.a", "A").build(&engine, Box::new(NoOp)).unwrap();
        let err = ModuleBuilder::new("m.a", "B").build(&engine, Box::new(NoOp));
        assert!(err.is_err());
    }

    #[test]
    fn no_in_ports_means_no_data() {
        let engine = Engine::with_pool_size(1);
        let module = ModuleBuilder::new("m.gen", "Gen").build(&engine, Box::new(NoOp)).unwrap();
        let task = ModuleTask::new(0, module.clone(), None);
        let start = module.compute_start_condition(&task, engine.dispatcher()).unwrap();
        assert_eq!(start, StartCondition::NoData);
    }
}
