//! `OutPort`: a module-side `Source + SeqSource` (`spec.md` \S3, \S4.3).
//!
//! Grounded on `original_source/src/OutPort.{h,cpp}`.

use std::sync::{Arc, Weak};

use crate::attribute::Attribute;
use crate::cell::{CellReadGuard, CellWriteGuard};
use crate::dispatcher::Dispatcher;
use crate::endpoint::target::guarded_wait;
use crate::endpoint::{SeqSourceCore, Source, SourceCore};
use crate::error::Result;
use crate::ids::PortId;
use crate::module::Module;
use crate::types::DataType;

/// A module's output port: publishes typed data to whatever in-ports,
/// loggers, proxies or parameter setters are bound to it.
pub struct OutPort {
    source: SourceCore,
    seq_source: SeqSourceCore,
    name: String,
    description: String,
    data_type: DataType,
    index: usize,
    module: Weak<Module>,
}

impl OutPort {
    /// Creates a new out-port. Called by [`crate::module::ModuleBuilder::add_out_port`].
    pub fn new(name: &str, description: &str, data_type: DataType, index: usize, module: Weak<Module>) -> Arc<OutPort> {
        Arc::new(OutPort {
            source: SourceCore::new(),
            seq_source: SeqSourceCore::new(),
            name: name.to_string(),
            description: description.to_string(),
            data_type,
            index,
            module,
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

    /// The port's declared data type.
    pub fn declared_type(&self) -> DataType {
        self.data_type
    }

    /// The port's index within its module's output port vector.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The owning module, if still alive.
    pub fn module(&self) -> Option<Arc<Module>> {
        self.module.upgrade()
    }

    /// This port's stable id, also used as its [`SeqSourceCore`] id
    /// would be were it registered separately; data and seq ids are
    /// kept distinct here so the two edges really are independent.
    pub fn id(&self) -> PortId {
        self.source.id()
    }

    /// The seq-edge id used for `seq_bind`/`seq_unbind`.
    pub fn seq_id(&self) -> PortId {
        self.seq_source.id()
    }

    /// Phase 1 of the publish protocol: reserve the write lock.
    pub fn reserve(&self) -> Result<CellWriteGuard<'_>> {
        self.source.try_write_data_lock()
    }

    /// Phases 2-3: stamps `attribute`, releases the write lock, and
    /// asks the dispatcher to fan out to bound targets and sequence
    /// targets.
    pub fn notify_ready(&self, dispatcher: &Dispatcher, guard: CellWriteGuard<'_>, attribute: Attribute) -> Result<()> {
        self.seq_source.notify_seq_ready(dispatcher, &attribute);
        self.source.notify_ready(guard, attribute, dispatcher)
    }

    /// Direct read of the port's current value, bypassing the
    /// reservation dance (used by tests and by synchronous callers like
    /// `DuplicatedSource`).
    pub fn read(&self) -> CellReadGuard<'_> {
        self.source.cell().read_lock()
    }

    /// Marks the port's cell expired. Called at the start of every task
    /// run (`spec.md` \S4.4) so a reader can tell stale data from data
    /// this run has actually republished.
    pub fn expire(&self) {
        self.source.cell().expire();
    }
}

impl Source for OutPort {
    fn id(&self) -> PortId {
        self.source.id()
    }

    fn data_type(&self) -> DataType {
        self.source.cell().data_type()
    }

    fn register_pending_target(&self, target: PortId) -> Result<()> {
        self.source.register_pending_target(target)
    }

    fn try_reserve_data_for_target(&self, target: PortId) -> bool {
        self.source.try_reserve_data_for_target(target)
    }

    fn read_lock_data_for_target(&self, target: PortId) -> CellReadGuard<'_> {
        self.source.read_lock_data_for_target(target)
    }

    fn release_target(&self, target: PortId) {
        self.source.release_target(target);
    }

    fn cancel(&self, dispatcher: &Dispatcher) {
        self.source.set_cancelling(true);
        dispatcher.dispatch_target_cancel(self.source.id());
    }

    fn wait_cancelled(&self, dispatcher: &Dispatcher) {
        guarded_wait(self.source.id(), || {
            dispatcher.dispatch_target_wait_cancelled(self.source.id());
        });
    }

    fn reset(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_target_reset(self.source.id());
        self.source.set_cancelling(false);
    }
}
