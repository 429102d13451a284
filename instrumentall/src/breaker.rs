//! UI-facing helpers that rewire the dispatcher's edges without
//! touching module logic: `Breaker` (remembers and restores a cut
//! edge) and `DuplicatedSource` (substitutes a frozen snapshot for a
//! source for a hold duration, e.g. while a UI inspector is open)
//! (`spec.md` \S3).
//!
//! Grounded on `original_source/src/Breaker.{h,cpp}` and
//! `DuplicatedSource.{h,cpp}`, rebuilt here on top of the dispatcher's
//! `bind`/`unbind`/`targets_of` rather than walking raw pointer edges.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::endpoint::{Source, SourceCore};
use crate::error::Result;
use crate::ids::PortId;
use crate::port::OutPort;
use crate::types::DataType;

/// Cuts whatever source feeds `target`, remembering it so the edge can
/// be restored later. A no-op restore if `target` had no source bound
/// when cut.
pub struct Breaker {
    target: PortId,
    remembered_source: Option<PortId>,
}

impl Breaker {
    /// Unbinds `target`, remembering its current source.
    pub fn cut(dispatcher: &Dispatcher, target: PortId) -> Breaker {
        let remembered = dispatcher.source_of(target);
        dispatcher.unbind(target);
        Breaker { target, remembered_source: remembered }
    }

    /// The source that was bound to `target` at cut time, if any.
    pub fn remembered_source(&self) -> Option<PortId> {
        self.remembered_source
    }

    /// Rebinds `target` to the source remembered at cut time.
    pub fn restore(&self, dispatcher: &Dispatcher) -> Result<()> {
        if let Some(source) = self.remembered_source {
            dispatcher.bind(source, self.target)?;
        }
        Ok(())
    }
}

/// A frozen snapshot of an [`OutPort`]'s value, substituted in its
/// place on some or all of its current targets for a bounded duration
/// (e.g. so a UI can hold a value steady for inspection while the real
/// port keeps producing upstream).
pub struct DuplicatedSource {
    core: SourceCore,
    original: Arc<OutPort>,
}

impl DuplicatedSource {
    /// Takes a snapshot of `original`'s currently held value.
    pub fn snapshot(original: Arc<OutPort>) -> Result<Arc<DuplicatedSource>> {
        let dup = Arc::new(DuplicatedSource { core: SourceCore::new(), original });
        dup.refresh()?;
        Ok(dup)
    }

    /// Re-reads the original port's current value into this snapshot,
    /// without rebinding anything.
    pub fn refresh(&self) -> Result<()> {
        let source_guard = self.original.read();
        let value = source_guard.value().clone();
        let attribute = source_guard.attribute().clone();
        drop(source_guard);
        let mut guard = self.core.try_write_data_lock()?;
        guard.set_new_data(value);
        guard.set_attribute(attribute);
        Ok(())
    }

    /// Rebinds every target currently bound to the original port onto
    /// this snapshot instead, returning the list of targets moved so
    /// the caller can move them back later with [`DuplicatedSource::release`].
    pub fn substitute(self: &Arc<Self>, dispatcher: &Dispatcher) -> Vec<PortId> {
        let dup_dyn: Arc<dyn Source> = self.clone();
        dispatcher.register_source(&dup_dyn);
        let targets = dispatcher.targets_of(Source::id(self.original.as_ref()));
        for target in &targets {
            let _ = dispatcher.bind(self.core.id(), *target);
        }
        targets
    }

    /// Rebinds `targets` back onto the original port and forgets this
    /// snapshot.
    pub fn release(self: &Arc<Self>, dispatcher: &Dispatcher, targets: &[PortId]) {
        for target in targets {
            let _ = dispatcher.bind(Source::id(self.original.as_ref()), *target);
        }
        dispatcher.forget_source(self.core.id());
    }
}

impl Source for DuplicatedSource {
    fn id(&self) -> PortId {
        self.core.id()
    }

    fn data_type(&self) -> DataType {
        self.core.cell().data_type()
    }

    fn register_pending_target(&self, target: PortId) -> Result<()> {
        self.core.register_pending_target(target)
    }

    fn try_reserve_data_for_target(&self, target: PortId) -> bool {
        self.core.try_reserve_data_for_target(target)
    }

    fn read_lock_data_for_target(&self, target: PortId) -> crate::cell::CellReadGuard<'_> {
        self.core.read_lock_data_for_target(target)
    }

    fn release_target(&self, target: PortId) {
        self.core.release_target(target);
    }

    fn cancel(&self, dispatcher: &Dispatcher) {
        self.core.set_cancelling(true);
        dispatcher.dispatch_target_cancel(self.core.id());
    }

    fn wait_cancelled(&self, dispatcher: &Dispatcher) {
        crate::endpoint::target::guarded_wait(self.core.id(), || {
            dispatcher.dispatch_target_wait_cancelled(self.core.id());
        });
    }

    fn reset(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_target_reset(self.core.id());
        self.core.set_cancelling(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::engine::Engine;
    use crate::endpoint::Target;
    use crate::module::{ModuleBuilder, ModuleLogic, StartCondition};
    use crate::types::ElemType;

    struct NoOp;
    impl ModuleLogic for NoOp {
        fn process(&self, _ctx: &crate::context::ProcessContext<'_>, _start: StartCondition) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn breaker_cuts_then_restores() {
        let engine = Engine::with_pool_size(1);
        let producer = ModuleBuilder::new("m.p", "P")
            .add_out_port("out", "", DataType::Scalar(ElemType::I32))
            .build(&engine, Box::new(NoOp))
            .unwrap();
        let consumer = ModuleBuilder::new("m.c", "C")
            .add_in_port("in", "", DataType::Scalar(ElemType::I32))
            .build(&engine, Box::new(NoOp))
            .unwrap();
        let out = producer.out_port(0).unwrap();
        let inp = consumer.in_port(0).unwrap();
        engine.dispatcher().bind(Source::id(out.as_ref()), Target::id(inp.as_ref())).unwrap();

        let breaker = Breaker::cut(engine.dispatcher(), Target::id(inp.as_ref()));
        assert_eq!(inp.bound_source(), None);
        breaker.restore(engine.dispatcher()).unwrap();
        assert_eq!(inp.bound_source(), Some(Source::id(out.as_ref())));
    }

    #[test]
    fn duplicated_source_substitutes_then_releases() {
        let engine = Engine::with_pool_size(1);
        let producer = ModuleBuilder::new("m.q", "Q")
            .add_out_port("out", "", DataType::Scalar(ElemType::I32))
            .build(&engine, Box::new(NoOp))
            .unwrap();
        let consumer = ModuleBuilder::new("m.r", "R")
            .add_in_port("in", "", DataType::Scalar(ElemType::I32))
            .build(&engine, Box::new(NoOp))
            .unwrap();
        let out = producer.out_port(0).unwrap().clone();
        let inp = consumer.in_port(0).unwrap();
        engine.dispatcher().bind(Source::id(out.as_ref()), Target::id(inp.as_ref())).unwrap();

        let mut guard = out.reserve().unwrap();
        guard.set_new_data(crate::types::DataValue::I32(5));
        out.notify_ready(engine.dispatcher(), guard, Attribute::new()).unwrap();

        let dup = DuplicatedSource::snapshot(out.clone()).unwrap();
        let moved = dup.substitute(engine.dispatcher());
        assert_eq!(inp.bound_source(), Some(dup.id()));

        dup.release(engine.dispatcher(), &moved);
        assert_eq!(inp.bound_source(), Some(Source::id(out.as_ref())));
    }
}
