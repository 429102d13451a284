//! `ParameterGetter` / `ParameterSetter`: endpoint adapters that let a
//! module's parameters participate in the ordinary data graph
//! (`spec.md` \S4.7).
//!
//! Grounded on `original_source/src/ParameterizedWithGetters.{h,cpp}`'s
//! getter/setter pair; the endpoint protocol itself reuses
//! [`crate::endpoint::source::SourceCore`] /
//! [`crate::endpoint::target::TargetCore`] exactly as
//! `crate::port::out_port`/`in_port` do.

use std::sync::{Arc, Weak};

use crate::attribute::Attribute;
use crate::dispatcher::Dispatcher;
use crate::endpoint::target::guarded_wait;
use crate::endpoint::{Source, SourceCore, Target, TargetCore};
use crate::error::{EngineError, Result};
use crate::ids::{PortId, TargetKind};
use crate::module::Module;
use crate::parameter::{ParamKind, ParamValue};
use crate::types::{DataType, DataValue, ElemType};

fn param_kind_to_data_type(kind: ParamKind) -> DataType {
    match kind {
        ParamKind::Int => DataType::Scalar(ElemType::I64),
        ParamKind::Float => DataType::Scalar(ElemType::F64),
        ParamKind::Str => DataType::Scalar(ElemType::String),
    }
}

fn param_value_to_data_value(value: ParamValue) -> DataValue {
    match value {
        ParamValue::Int(v) => DataValue::I64(v),
        ParamValue::Float(v) => DataValue::F64(v),
        ParamValue::Str(v) => DataValue::Str(v),
    }
}

fn data_value_to_param_value(value: &DataValue, kind: ParamKind) -> Result<ParamValue> {
    match (kind, value) {
        (ParamKind::Int, DataValue::I64(v)) => Ok(ParamValue::Int(*v)),
        (ParamKind::Float, DataValue::F64(v)) => Ok(ParamValue::Float(*v)),
        (ParamKind::Str, DataValue::Str(v)) => Ok(ParamValue::Str(v.clone())),
        _ => Err(EngineError::TypeMismatch {
            expected: param_kind_to_data_type(kind).short_name(),
            found: value.data_type().short_name(),
        }),
    }
}

/// Publishes a module parameter's current value as an ordinary
/// [`Source`], so it can be bound to an in-port or logger like any
/// other data.
pub struct ParameterGetter {
    core: SourceCore,
    module: Weak<Module>,
    param_index: usize,
}

impl ParameterGetter {
    /// Creates a getter for parameter `param_index` of `module`.
    pub fn new(module: Weak<Module>, param_index: usize) -> Arc<ParameterGetter> {
        Arc::new(ParameterGetter { core: SourceCore::new(), module, param_index })
    }

    /// Reads the parameter's current value and publishes it.
    pub fn publish(&self, dispatcher: &Dispatcher) -> Result<()> {
        let module = self.module.upgrade().ok_or_else(|| EngineError::invalid_state("module dropped"))?;
        let engine = module.engine().ok_or_else(|| EngineError::invalid_state("engine dropped"))?;
        let value = module.parameters().get(self.param_index)?;
        let mut guard = self.core.try_write_data_lock()?;
        guard.set_new_data(param_value_to_data_value(value));
        let attribute = Attribute::for_new_value(&engine);
        self.core.notify_ready(guard, attribute, dispatcher)
    }
}

impl Source for ParameterGetter {
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
        guarded_wait(self.core.id(), || {
            dispatcher.dispatch_target_wait_cancelled(self.core.id());
        });
    }

    fn reset(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_target_reset(self.core.id());
        self.core.set_cancelling(false);
    }
}

/// When a [`ParameterSetter`] applies the value it receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// Apply the moment this setter's own data arrives.
    Immediate,
    /// Stage the value as pending; the engine promotes it the next time
    /// the owning module's task starts, once every bound setter in the
    /// group has staged its own value (`spec.md` \S4.7 "apply when all
    /// set").
    WhenAllSet,
}

/// Receives data and stages (or immediately applies) it as a module
/// parameter's new value.
pub struct ParameterSetter {
    core: TargetCore,
    module: Weak<Module>,
    param_index: usize,
    mode: ApplyMode,
}

impl ParameterSetter {
    /// Creates a setter for parameter `param_index` of `module`.
    pub fn new(module: Weak<Module>, param_index: usize, mode: ApplyMode) -> Arc<ParameterSetter> {
        Arc::new(ParameterSetter {
            core: TargetCore::new(TargetKind::ParamSetter),
            module,
            param_index,
            mode,
        })
    }

    fn receive(&self, dispatcher: &Dispatcher, source: PortId) -> Result<()> {
        let module = self.module.upgrade().ok_or_else(|| EngineError::invalid_state("module dropped"))?;
        let Some(source_handle) = dispatcher.get_source(source) else {
            return Ok(());
        };
        if !source_handle.try_reserve_data_for_target(self.core.id()) {
            return Ok(());
        }
        let kind = module.parameters().kind_of(self.param_index)?;
        let result = {
            let guard = source_handle.read_lock_data_for_target(self.core.id());
            data_value_to_param_value(guard.value(), kind)
        };
        source_handle.release_target(self.core.id());
        let value = result?;
        if self.mode == ApplyMode::WhenAllSet {
            module.parameters().mark_coordinated(self.param_index);
        }
        module.parameters().set_pending(self.param_index, value)?;
        // Immediate applies right away since the slot isn't coordinated;
        // a WhenAllSet slot only actually promotes once every coordinated
        // index in the group has a pending value.
        module.parameters().try_apply_parameters()?;
        Ok(())
    }
}

impl Target for ParameterSetter {
    fn id(&self) -> PortId {
        self.core.id()
    }

    fn kind(&self) -> TargetKind {
        self.core.kind()
    }

    fn accepts_type(&self, _data_type: DataType) -> bool {
        true
    }

    fn bound_source(&self) -> Option<PortId> {
        self.core.source()
    }

    fn set_bound_source(&self, source: Option<PortId>) {
        self.core.set_source(source);
    }

    fn try_run_target(&self, dispatcher: &Dispatcher, source: PortId) {
        if let Err(err) = self.receive(dispatcher, source) {
            log::warn!("parameter setter {} failed: {err}", self.core.id());
        }
    }

    fn cancel(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_source_cancel(self.core.id());
    }

    fn wait_cancelled(&self, dispatcher: &Dispatcher) {
        guarded_wait(self.core.id(), || {
            dispatcher.dispatch_source_wait_cancelled(self.core.id());
        });
    }

    fn reset(&self, dispatcher: &Dispatcher) {
        dispatcher.dispatch_source_reset(self.core.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessContext;
    use crate::engine::Engine;
    use crate::module::{ModuleBuilder, ModuleLogic, StartCondition};

    struct NoOp;
    impl ModuleLogic for NoOp {
        fn process(&self, _ctx: &ProcessContext<'_>, _start: StartCondition) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn getter_publishes_current_value() {
        let engine = Engine::with_pool_size(1);
        let module = ModuleBuilder::new("m.p", "P")
            .add_parameter("gain", "", ParamValue::Float(1.5))
            .build(&engine, Box::new(NoOp))
            .unwrap();
        let idx = module.parameters().get_parameter_index("gain").unwrap();
        let getter = ParameterGetter::new(Arc::downgrade(&module), idx);
        getter.publish(engine.dispatcher()).unwrap();
        assert_eq!(getter.core.cell().get_data::<f64>().unwrap(), 1.5);
    }

    #[test]
    fn immediate_setter_applies_without_waiting_for_a_task() {
        let engine = Engine::with_pool_size(1);
        let module = ModuleBuilder::new("m.q", "Q")
            .add_out_port("out", "", DataType::Scalar(ElemType::I64))
            .add_parameter("value", "", ParamValue::Int(0))
            .build(&engine, Box::new(NoOp))
            .unwrap();
        let idx = module.parameters().get_parameter_index("value").unwrap();
        let setter = ParameterSetter::new(Arc::downgrade(&module), idx, ApplyMode::Immediate);
        let target: Arc<dyn Target> = setter.clone();
        engine.dispatcher().register_target(&target);

        let out = module.out_port(0).unwrap().clone();
        engine.dispatcher().bind(Source::id(out.as_ref()), setter.id()).unwrap();
        let mut guard = out.reserve().unwrap();
        guard.set_new_data(DataValue::I64(9));
        out.notify_ready(engine.dispatcher(), guard, Attribute::new()).unwrap();

        assert_eq!(module.parameters().get(idx).unwrap(), ParamValue::Int(9));
    }
}
