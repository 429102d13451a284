//! `InPort`: a module-side `Target + SeqTarget` (`spec.md` \S3, \S4.3).
//!
//! Grounded on `original_source/src/InDataPort.{h,cpp}` /
//! `InPort.{h,cpp}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::attribute::Attribute;
use crate::cell::CellReadGuard;
use crate::dispatcher::Dispatcher;
use crate::endpoint::target::guarded_wait;
use crate::endpoint::{SeqTarget, SeqTargetCore, Target, TargetCore};
use crate::error::{EngineError, Result};
use crate::ids::{PortId, TargetKind};
use crate::module::Module;
use crate::types::DataType;

/// A module's input port. A plain `InPort` only accepts its declared
/// [`DataType`]; a `TrigPort` is an `InPort` constructed with
/// `accept_any = true` and is expected to only be used for its
/// attribute (`spec.md` \S3).
pub struct InPort {
    target: TargetCore,
    seq_target: SeqTargetCore,
    name: String,
    description: String,
    data_type: DataType,
    accept_any: bool,
    index: usize,
    module: Weak<Module>,
    held: Mutex<Option<PortId>>, // Some(source_id) while a read guard is held
    upstream_cancelling: AtomicBool,
    last_seq_attribute: Mutex<Option<Attribute>>,
}

impl InPort {
    /// Creates a new in-port.
    pub fn new(
        name: &str,
        description: &str,
        data_type: DataType,
        index: usize,
        module: Weak<Module>,
    ) -> Arc<InPort> {
        Self::new_impl(name, description, data_type, false, index, module)
    }

    /// Creates a new trigger port, which accepts any data type and is
    /// only meant to be used for its attribute.
    pub fn new_trig(name: &str, description: &str, index: usize, module: Weak<Module>) -> Arc<InPort> {
        Self::new_impl(name, description, DataType::Undefined, true, index, module)
    }

    fn new_impl(
        name: &str,
        description: &str,
        data_type: DataType,
        accept_any: bool,
        index: usize,
        module: Weak<Module>,
    ) -> Arc<InPort> {
        let kind = if accept_any { TargetKind::TrigPort } else { TargetKind::InPort };
        Arc::new(InPort {
            target: TargetCore::new(kind),
            seq_target: SeqTargetCore::new(),
            name: name.to_string(),
            description: description.to_string(),
            data_type,
            accept_any,
            index,
            module,
            held: Mutex::new(None),
            upstream_cancelling: AtomicBool::new(false),
            last_seq_attribute: Mutex::new(None),
        })
    }

    /// The port's declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port's declared description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The port's index within its module's input port vector.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether this is a trigger port.
    pub fn is_trigger(&self) -> bool {
        self.accept_any
    }

    /// This port's stable id.
    pub fn id(&self) -> PortId {
        self.target.id()
    }

    /// The seq-edge id used for `seq_bind`/`seq_unbind`.
    pub fn seq_id(&self) -> PortId {
        self.seq_target.id()
    }

    /// The owning module, if still alive.
    pub fn module(&self) -> Option<Arc<Module>> {
        self.module.upgrade()
    }

    /// Whether cancellation has been observed from upstream since the
    /// last `reset`.
    pub fn is_upstream_cancelling(&self) -> bool {
        self.upstream_cancelling.load(Ordering::SeqCst)
    }

    /// Non-blocking attempt to reserve and read-lock the bound source's
    /// data. Returns `false` without side effects if there is no bound
    /// source or the reservation failed (`try-catch-source`,
    /// `spec.md` \S4.6).
    pub fn try_catch_source(&self, dispatcher: &Dispatcher) -> Result<bool> {
        let Some(source_id) = self.target.source() else {
            return Ok(false);
        };
        let Some(source) = dispatcher.get_source(source_id) else {
            return Ok(false);
        };
        if !source.try_reserve_data_for_target(self.id()) {
            return Ok(false);
        }
        if !self.accept_any {
            let found = source.data_type();
            if found != self.data_type {
                source.release_target(self.id());
                return Err(EngineError::TypeMismatch {
                    expected: self.data_type.short_name(),
                    found: found.short_name(),
                });
            }
        }
        *self.held.lock().unwrap() = Some(source_id);
        Ok(true)
    }

    /// Reads the held data, type-checked.
    pub fn read_data<T: crate::types::TypedData>(&self, dispatcher: &Dispatcher) -> Result<T> {
        let source_id = self
            .held
            .lock()
            .unwrap()
            .ok_or_else(|| EngineError::invalid_state("in-port data not locked"))?;
        let source = dispatcher
            .get_source(source_id)
            .ok_or_else(|| EngineError::not_bound("source disappeared while locked"))?;
        let guard: CellReadGuard<'_> = source.read_lock_data_for_target(self.id());
        guard.get_data::<T>()
    }

    /// Reads the attribute of the held data.
    pub fn read_data_attribute(&self, dispatcher: &Dispatcher) -> Result<Attribute> {
        let source_id = self
            .held
            .lock()
            .unwrap()
            .ok_or_else(|| EngineError::invalid_state("in-port data not locked"))?;
        let source = dispatcher
            .get_source(source_id)
            .ok_or_else(|| EngineError::not_bound("source disappeared while locked"))?;
        let guard = source.read_lock_data_for_target(self.id());
        Ok(guard.attribute().clone())
    }

    /// Releases whatever reservation is currently held, idempotently.
    pub fn release(&self, dispatcher: &Dispatcher) {
        let held = self.held.lock().unwrap().take();
        if let Some(source_id) = held {
            if let Some(source) = dispatcher.get_source(source_id) {
                source.release_target(self.id());
            }
        }
    }

    /// True while a reservation (and implicitly a read guard) is held.
    pub fn is_held(&self) -> bool {
        self.held.lock().unwrap().is_some()
    }
}

impl Target for InPort {
    fn id(&self) -> PortId {
        self.target.id()
    }

    fn kind(&self) -> TargetKind {
        self.target.kind()
    }

    fn accepts_type(&self, data_type: DataType) -> bool {
        self.accept_any || data_type == self.data_type
    }

    fn bound_source(&self) -> Option<PortId> {
        self.target.source()
    }

    fn set_bound_source(&self, source: Option<PortId>) {
        self.target.set_source(source);
    }

    fn try_run_target(&self, _dispatcher: &Dispatcher, _source: PortId) {
        // Waking an in-port schedules a module task; the task itself
        // performs the actual reserve/read-lock dance for this port
        // via `try_catch_source` during its start-condition loop
        // (`spec.md` \S4.3 "creates a runnable task per wake").
        if let Some(module) = self.module.upgrade() {
            module.on_in_port_woken(self.id());
        }
    }

    fn cancel(&self, dispatcher: &Dispatcher) {
        self.upstream_cancelling.store(true, Ordering::SeqCst);
        dispatcher.dispatch_source_cancel(self.target.id());
    }

    fn wait_cancelled(&self, dispatcher: &Dispatcher) {
        guarded_wait(self.target.id(), || {
            dispatcher.dispatch_source_wait_cancelled(self.target.id());
        });
    }

    fn reset(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_source_reset(self.target.id());
        self.upstream_cancelling.store(false, Ordering::SeqCst);
    }
}

impl SeqTarget for InPort {
    fn id(&self) -> PortId {
        self.seq_target.id()
    }

    fn receive_seq(&self, attribute: &Attribute) {
        *self.last_seq_attribute.lock().unwrap() = Some(attribute.clone());
    }
}
