//! `DataProxy`: a synchronous one-in-one-out conversion node that obeys
//! the same cancellation contract as a [`crate::module::Module`] but
//! runs its conversion inline, with no task queue of its own
//! (`spec.md` \S3 "DataProxy").
//!
//! Grounded on the target+source pairing already used by
//! `crate::port::in_port`/`out_port`, generalized to a standalone
//! component the way `original_source/src/DataProxy.{h,cpp}` sits
//! between two modules without being one itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::attribute::Attribute;
use crate::dispatcher::Dispatcher;
use crate::endpoint::target::guarded_wait;
use crate::endpoint::{SeqSourceCore, SeqTarget, SeqTargetCore, Source, SourceCore, Target, TargetCore};
use crate::error::{EngineError, Result};
use crate::ids::{PortId, TargetKind};
use crate::types::DataValue;

/// The conversion a [`DataProxy`] applies to each value it relays.
pub trait ProxyLogic: Send + Sync {
    /// Converts one input value into the proxy's output value.
    fn convert(&self, input: &DataValue) -> Result<DataValue>;
}

/// A proxy that always passes its input through unchanged, used when a
/// `DataProxy` exists only to retype a binding (e.g. widen an `int32`
/// edge into an `int32Vect` one-element vector) rather than transform
/// values.
pub struct Identity;

impl ProxyLogic for Identity {
    fn convert(&self, input: &DataValue) -> Result<DataValue> {
        Ok(input.clone())
    }
}

/// Sits between a source and a target, converting every value that
/// passes through it and forwarding sequence bookkeeping unchanged.
pub struct DataProxy {
    target: TargetCore,
    source: SourceCore,
    seq_target: SeqTargetCore,
    seq_source: SeqSourceCore,
    logic: Box<dyn ProxyLogic>,
    cancelling: AtomicBool,
    last_seq_attribute: Mutex<Option<Attribute>>,
}

impl DataProxy {
    /// Creates a new proxy applying `logic` to every relayed value.
    pub fn new(logic: Box<dyn ProxyLogic>) -> Arc<DataProxy> {
        Arc::new(DataProxy {
            target: TargetCore::new(TargetKind::Proxy),
            source: SourceCore::new(),
            seq_target: SeqTargetCore::new(),
            seq_source: SeqSourceCore::new(),
            logic,
            cancelling: AtomicBool::new(false),
            last_seq_attribute: Mutex::new(None),
        })
    }

    /// This proxy's target-side id, used to bind it downstream of a
    /// source.
    pub fn target_id(&self) -> PortId {
        self.target.id()
    }

    /// This proxy's source-side id, used to bind targets downstream of
    /// it.
    pub fn source_id(&self) -> PortId {
        self.source.id()
    }

    fn propagate_cancel(&self, dispatcher: &Dispatcher) {
        if !self.cancelling.swap(true, Ordering::SeqCst) {
            dispatcher.dispatch_source_cancel(self.target.id());
            dispatcher.dispatch_target_cancel(self.source.id());
        }
    }

    fn run(&self, dispatcher: &Dispatcher, upstream: PortId) -> Result<()> {
        let Some(source_handle) = dispatcher.get_source(upstream) else {
            return Ok(());
        };
        if !source_handle.try_reserve_data_for_target(self.target.id()) {
            return Ok(());
        }
        let conversion = {
            let in_guard = source_handle.read_lock_data_for_target(self.target.id());
            let converted = self.logic.convert(in_guard.value())?;
            (converted, in_guard.attribute().clone())
        };
        source_handle.release_target(self.target.id());
        let (converted, attribute) = conversion;

        let mut out_guard = self.source.try_write_data_lock()?;
        out_guard.set_new_data(converted);
        self.seq_source.notify_seq_ready(dispatcher, &attribute);
        self.source.notify_ready(out_guard, attribute, dispatcher)
    }
}

impl Target for DataProxy {
    fn id(&self) -> PortId {
        self.target.id()
    }

    fn kind(&self) -> TargetKind {
        self.target.kind()
    }

    fn accepts_type(&self, _data_type: crate::types::DataType) -> bool {
        true
    }

    fn bound_source(&self) -> Option<PortId> {
        self.target.source()
    }

    fn set_bound_source(&self, source: Option<PortId>) {
        self.target.set_source(source);
    }

    fn try_run_target(&self, dispatcher: &Dispatcher, source: PortId) {
        if let Err(err) = self.run(dispatcher, source) {
            if !matches!(err, EngineError::ExecutionAborted) {
                log::warn!("proxy {} conversion failed: {err}", self.target.id());
            }
        }
    }

    fn cancel(&self, dispatcher: &Dispatcher) {
        self.propagate_cancel(dispatcher);
    }

    fn wait_cancelled(&self, dispatcher: &Dispatcher) {
        guarded_wait(self.target.id(), || {
            dispatcher.dispatch_source_wait_cancelled(self.target.id());
        });
    }

    fn reset(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_source_reset(self.target.id());
    }
}

impl Source for DataProxy {
    fn id(&self) -> PortId {
        self.source.id()
    }

    fn data_type(&self) -> crate::types::DataType {
        self.source.cell().data_type()
    }

    fn register_pending_target(&self, target: PortId) -> Result<()> {
        self.source.register_pending_target(target)
    }

    fn try_reserve_data_for_target(&self, target: PortId) -> bool {
        self.source.try_reserve_data_for_target(target)
    }

    fn read_lock_data_for_target(&self, target: PortId) -> crate::cell::CellReadGuard<'_> {
        self.source.read_lock_data_for_target(target)
    }

    fn release_target(&self, target: PortId) {
        self.source.release_target(target);
    }

    fn cancel(&self, dispatcher: &Dispatcher) {
        self.propagate_cancel(dispatcher);
    }

    fn wait_cancelled(&self, dispatcher: &Dispatcher) {
        guarded_wait(self.source.id(), || {
            dispatcher.dispatch_target_wait_cancelled(self.source.id());
        });
    }

    fn reset(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_target_reset(self.source.id());
        self.cancelling.store(false, Ordering::SeqCst);
    }
}

impl SeqTarget for DataProxy {
    fn id(&self) -> PortId {
        self.seq_target.id()
    }

    fn receive_seq(&self, attribute: &Attribute) {
        *self.last_seq_attribute.lock().unwrap() = Some(attribute.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    struct DoubleInt;
    impl ProxyLogic for DoubleInt {
        fn convert(&self, input: &DataValue) -> Result<DataValue> {
            match input {
                DataValue::I32(v) => Ok(DataValue::I32(v * 2)),
                other => Err(EngineError::TypeMismatch {
                    expected: "int32".into(),
                    found: other.data_type().short_name(),
                }),
            }
        }
    }

    #[test]
    fn converts_value_passing_through() {
        let engine = Engine::new();
        let dispatcher = engine.dispatcher();

        let src = crate::port::OutPort::new("o", "", crate::types::DataType::Scalar(crate::types::ElemType::I32), 0, std::sync::Weak::new());
        let src_dyn: Arc<dyn Source> = src.clone();
        dispatcher.register_source(&src_dyn);

        let proxy = DataProxy::new(Box::new(DoubleInt));
        let target_dyn: Arc<dyn Target> = proxy.clone();
        dispatcher.register_target(&target_dyn);

        dispatcher.bind(Source::id(src.as_ref()), proxy.target_id()).unwrap();

        let mut guard = src.reserve().unwrap();
        guard.set_new_data(DataValue::I32(21));
        src.notify_ready(dispatcher, guard, Attribute::new()).unwrap();

        let read = proxy.source.cell().read_lock();
        assert_eq!(read.get_data::<i32>().unwrap(), 42);
    }
}
