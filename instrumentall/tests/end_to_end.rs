//! End-to-end scenarios exercising the engine the way a module author's
//! graph would (`spec.md` \S8).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use instrumentall::attribute::Attribute;
use instrumentall::context::ProcessContext;
use instrumentall::engine::Engine;
use instrumentall::error::Result;
use instrumentall::module::{ModuleBuilder, ModuleLogic, StartCondition};
use instrumentall::parameter::ParamValue;
use instrumentall::parameter_worker::{ApplyMode, ParameterSetter};
use instrumentall::types::{DataType, DataValue, ElemType};

fn int_type() -> DataType {
    DataType::Scalar(ElemType::I32)
}

/// A source module that publishes one fixed value per direct run.
struct ConstantSource(i32);
impl ModuleLogic for ConstantSource {
    fn process(&self, ctx: &ProcessContext<'_>, _start: StartCondition) -> Result<()> {
        ctx.reserve_out_port(0)?;
        ctx.get_data_to_write(0, self.0)?;
        ctx.notify_out_port_ready(0, Attribute::new())?;
        Ok(())
    }
}

/// Reads one int in-port, writes double it to one int out-port.
struct Doubler;
impl ModuleLogic for Doubler {
    fn process(&self, ctx: &ProcessContext<'_>, start: StartCondition) -> Result<()> {
        if start == StartCondition::NoData {
            return Ok(());
        }
        let v: i32 = ctx.read_in_port_data(0)?;
        let attribute = ctx.read_in_port_data_attribute(0)?;
        ctx.release_in_port(0);
        ctx.reserve_out_port(0)?;
        ctx.get_data_to_write(0, v * 2)?;
        ctx.notify_out_port_ready(0, attribute)?;
        Ok(())
    }
}

/// Records every value it receives, for assertions.
struct Recorder(Arc<Mutex<Vec<i32>>>);
impl ModuleLogic for Recorder {
    fn process(&self, ctx: &ProcessContext<'_>, start: StartCondition) -> Result<()> {
        if start == StartCondition::NoData {
            return Ok(());
        }
        let v: i32 = ctx.read_in_port_data(0)?;
        ctx.release_in_port(0);
        self.0.lock().unwrap().push(v);
        Ok(())
    }
}

/// Accumulates every value seen across an entire upstream sequence,
/// emitting a single sum once the sequence ends (scenario 2).
struct SumAccumulator {
    running: AtomicI64,
}
impl ModuleLogic for SumAccumulator {
    fn process(&self, ctx: &ProcessContext<'_>, start: StartCondition) -> Result<()> {
        if start == StartCondition::NoData {
            return Ok(());
        }
        let v: i32 = ctx.read_in_port_data(0)?;
        let attribute = ctx.read_in_port_data_attribute(0)?;
        ctx.release_in_port(0);
        let total = self.running.fetch_add(v as i64, Ordering::SeqCst) + v as i64;
        if !attribute.ending().is_empty() {
            self.running.store(0, Ordering::SeqCst);
            ctx.reserve_out_port(0)?;
            ctx.get_data_to_write(0, total)?;
            ctx.notify_out_port_ready(0, attribute)?;
        }
        Ok(())
    }
}

/// Sleeps cooperatively, bailing out as soon as cancellation is
/// observed (scenario 3).
struct SleepyWorker {
    started: Arc<std::sync::atomic::AtomicBool>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}
impl ModuleLogic for SleepyWorker {
    fn process(&self, ctx: &ProcessContext<'_>, start: StartCondition) -> Result<()> {
        if start == StartCondition::NoData {
            return Ok(());
        }
        self.started.store(true, Ordering::SeqCst);
        if ctx.sleep(Duration::from_secs(5)) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct NoOp;
impl ModuleLogic for NoOp {
    fn process(&self, _ctx: &ProcessContext<'_>, _start: StartCondition) -> Result<()> {
        Ok(())
    }
}

/// Scenario 1: a direct-run source chained through a proxy-like doubler
/// into a recorder, exercising the plain publish/catch/release cycle.
#[test]
fn direct_data_generation_chain() {
    let engine = Engine::with_pool_size(2);
    let source = ModuleBuilder::new("m.source", "Source")
        .add_out_port("out", "", int_type())
        .build(&engine, Box::new(ConstantSource(21)))
        .unwrap();
    let doubler = ModuleBuilder::new("m.doubler", "Doubler")
        .add_in_port("in", "", int_type())
        .add_out_port("out", "", int_type())
        .build(&engine, Box::new(Doubler))
        .unwrap();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let recorder = ModuleBuilder::new("m.recorder", "Recorder")
        .add_in_port("in", "", int_type())
        .build(&engine, Box::new(Recorder(recorded.clone())))
        .unwrap();

    engine
        .dispatcher()
        .bind(instrumentall::endpoint::Source::id(source.out_port(0).unwrap().as_ref()), instrumentall::endpoint::Target::id(doubler.in_port(0).unwrap().as_ref()))
        .unwrap();
    engine
        .dispatcher()
        .bind(instrumentall::endpoint::Source::id(doubler.out_port(0).unwrap().as_ref()), instrumentall::endpoint::Target::id(recorder.in_port(0).unwrap().as_ref()))
        .unwrap();

    source.run_direct().unwrap();

    for _ in 0..200 {
        if !recorded.lock().unwrap().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(recorded.lock().unwrap().as_slice(), [42]);
}

/// Scenario 2: a producer emits several values inside one sequence; the
/// accumulator downstream only ever publishes once, carrying the
/// sequence's ending marker.
struct SequenceProducer {
    engine: Arc<Engine>,
    values: Vec<i32>,
}
impl ModuleLogic for SequenceProducer {
    fn process(&self, ctx: &ProcessContext<'_>, _start: StartCondition) -> Result<()> {
        let mut seq_id = None;
        let last = self.values.len() - 1;
        for (i, v) in self.values.iter().enumerate() {
            let mut attribute = Attribute::new();
            let id = *seq_id.get_or_insert_with(|| attribute.start_sequence(&self.engine));
            if i > 0 {
                attribute.continue_sequence(id);
            }
            if i == last {
                attribute.end_sequence(id).ok();
            }

            // The accumulator downstream hasn't released the previous
            // value's reservation yet when the next one is ready; wait
            // for it rather than treating the source as busy.
            let mut attempts = 0;
            loop {
                match ctx.reserve_out_port(0) {
                    Ok(()) => break,
                    Err(_) if attempts < 500 => {
                        attempts += 1;
                        std::thread::sleep(std::time::Duration::from_millis(2));
                    }
                    Err(e) => return Err(e),
                }
            }
            ctx.get_data_to_write(0, *v)?;
            ctx.notify_out_port_ready(0, attribute)?;
        }
        Ok(())
    }
}

#[test]
fn sequence_accumulation_emits_once_at_end() {
    let engine = Engine::with_pool_size(2);
    let producer = ModuleBuilder::new("m.seq_producer", "SeqProducer")
        .add_out_port("out", "", int_type())
        .build(&engine, Box::new(SequenceProducer { engine: engine.clone(), values: vec![1, 2, 3, 4] }))
        .unwrap();
    let accumulator = ModuleBuilder::new("m.accumulator", "Accumulator")
        .add_in_port("in", "", int_type())
        .add_out_port("out", "", DataType::Scalar(ElemType::I64))
        .build(&engine, Box::new(SumAccumulator { running: AtomicI64::new(0) }))
        .unwrap();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    struct I64Recorder(Arc<Mutex<Vec<i64>>>);
    impl ModuleLogic for I64Recorder {
        fn process(&self, ctx: &ProcessContext<'_>, start: StartCondition) -> Result<()> {
            if start == StartCondition::NoData {
                return Ok(());
            }
            let v: i64 = ctx.read_in_port_data(0)?;
            ctx.release_in_port(0);
            self.0.lock().unwrap().push(v);
            Ok(())
        }
    }
    let sink = ModuleBuilder::new("m.sum_sink", "SumSink")
        .add_in_port("in", "", DataType::Scalar(ElemType::I64))
        .build(&engine, Box::new(I64Recorder(recorded.clone())))
        .unwrap();

    engine
        .dispatcher()
        .bind(instrumentall::endpoint::Source::id(producer.out_port(0).unwrap().as_ref()), instrumentall::endpoint::Target::id(accumulator.in_port(0).unwrap().as_ref()))
        .unwrap();
    engine
        .dispatcher()
        .bind(instrumentall::endpoint::Source::id(accumulator.out_port(0).unwrap().as_ref()), instrumentall::endpoint::Target::id(sink.in_port(0).unwrap().as_ref()))
        .unwrap();

    producer.run_direct().unwrap();

    for _ in 0..400 {
        if !recorded.lock().unwrap().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(recorded.lock().unwrap().as_slice(), [10]);
}

/// Scenario 3: cancelling a module mid-`sleep` unblocks it immediately
/// rather than waiting out the full duration.
#[test]
fn cancellation_during_sleep_is_immediate() {
    let engine = Engine::with_pool_size(2);
    let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let trigger = ModuleBuilder::new("m.trig", "Trig")
        .add_out_port("out", "", int_type())
        .build(&engine, Box::new(ConstantSource(1)))
        .unwrap();
    let worker = ModuleBuilder::new("m.worker", "Worker")
        .add_in_port("in", "", int_type())
        .build(
            &engine,
            Box::new(SleepyWorker { started: started.clone(), cancelled: cancelled.clone() }),
        )
        .unwrap();

    engine
        .dispatcher()
        .bind(instrumentall::endpoint::Source::id(trigger.out_port(0).unwrap().as_ref()), instrumentall::endpoint::Target::id(worker.in_port(0).unwrap().as_ref()))
        .unwrap();

    trigger.run_direct().unwrap();
    for _ in 0..200 {
        if started.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(started.load(Ordering::SeqCst));

    let begin = std::time::Instant::now();
    worker.cancel_lazy(engine.dispatcher());
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert!(cancelled.load(Ordering::SeqCst));
}

/// Scenario 4: two "apply when all set" setters on the same module hold
/// off promoting either parameter until both have staged a value for
/// the round, then promote both together, exactly once.
#[test]
fn parameter_setter_apply_when_all_set_stages_without_applying() {
    let engine = Engine::with_pool_size(1);
    let module = ModuleBuilder::new("m.configurable", "Configurable")
        .add_out_port("threshold_trigger", "", DataType::Scalar(ElemType::I64))
        .add_out_port("gain_trigger", "", DataType::Scalar(ElemType::I64))
        .add_parameter("threshold", "", ParamValue::Int(0))
        .add_parameter("gain", "", ParamValue::Int(0))
        .build(&engine, Box::new(NoOp))
        .unwrap();
    let threshold_idx = module.parameters().get_parameter_index("threshold").unwrap();
    let gain_idx = module.parameters().get_parameter_index("gain").unwrap();

    let threshold_setter = ParameterSetter::new(Arc::downgrade(&module), threshold_idx, ApplyMode::WhenAllSet);
    let gain_setter = ParameterSetter::new(Arc::downgrade(&module), gain_idx, ApplyMode::WhenAllSet);
    for setter in [&threshold_setter, &gain_setter] {
        let target: Arc<dyn instrumentall::endpoint::Target> = setter.clone();
        engine.dispatcher().register_target(&target);
    }
    engine
        .dispatcher()
        .bind(
            instrumentall::endpoint::Source::id(module.out_port(0).unwrap().as_ref()),
            instrumentall::endpoint::Target::id(threshold_setter.as_ref()),
        )
        .unwrap();
    engine
        .dispatcher()
        .bind(
            instrumentall::endpoint::Source::id(module.out_port(1).unwrap().as_ref()),
            instrumentall::endpoint::Target::id(gain_setter.as_ref()),
        )
        .unwrap();

    let threshold_out = module.out_port(0).unwrap().clone();
    let mut guard = threshold_out.reserve().unwrap();
    guard.set_new_data(DataValue::I64(99));
    threshold_out.notify_ready(engine.dispatcher(), guard, Attribute::new()).unwrap();

    // Only the threshold setter has fired: neither parameter promotes yet,
    // since the gain setter hasn't staged its value for this round.
    assert!(module.parameters().needs_apply(threshold_idx));
    assert_eq!(module.parameters().get(threshold_idx).unwrap(), ParamValue::Int(0));
    assert!(module.parameters().needs_apply(threshold_idx));

    let gain_out = module.out_port(1).unwrap().clone();
    let mut guard = gain_out.reserve().unwrap();
    guard.set_new_data(DataValue::I64(7));
    gain_out.notify_ready(engine.dispatcher(), guard, Attribute::new()).unwrap();

    // Both setters have now fired for this round: both parameters
    // promote together, exactly once.
    assert!(!module.parameters().needs_apply(threshold_idx));
    assert!(!module.parameters().needs_apply(gain_idx));
    assert_eq!(module.parameters().get(threshold_idx).unwrap(), ParamValue::Int(99));
    assert_eq!(module.parameters().get(gain_idx).unwrap(), ParamValue::Int(7));
}

/// Scenario 5: rebinding a target onto a new source mid-graph replaces
/// the old edge outright, with no trace of the prior binding.
#[test]
fn bind_replacement_drops_the_prior_edge() {
    let engine = Engine::with_pool_size(1);
    let a = ModuleBuilder::new("m.a", "A").add_out_port("out", "", int_type()).build(&engine, Box::new(NoOp)).unwrap();
    let b = ModuleBuilder::new("m.b", "B").add_out_port("out", "", int_type()).build(&engine, Box::new(NoOp)).unwrap();
    let target = ModuleBuilder::new("m.t", "T").add_in_port("in", "", int_type()).build(&engine, Box::new(NoOp)).unwrap();

    let a_id = instrumentall::endpoint::Source::id(a.out_port(0).unwrap().as_ref());
    let b_id = instrumentall::endpoint::Source::id(b.out_port(0).unwrap().as_ref());
    let t_id = instrumentall::endpoint::Target::id(target.in_port(0).unwrap().as_ref());

    engine.dispatcher().bind(a_id, t_id).unwrap();
    assert_eq!(engine.dispatcher().source_of(t_id), Some(a_id));
    engine.dispatcher().bind(b_id, t_id).unwrap();
    assert_eq!(engine.dispatcher().source_of(t_id), Some(b_id));
    assert!(engine.dispatcher().targets_of(a_id).is_empty());
}

/// Scenario 6: cancelling a source propagates through a proxy to
/// whatever is bound downstream of it.
#[test]
fn cancel_propagates_through_proxy() {
    use instrumentall::proxy::{DataProxy, Identity};

    let engine = Engine::with_pool_size(1);
    let producer = ModuleBuilder::new("m.up", "Up").add_out_port("out", "", int_type()).build(&engine, Box::new(NoOp)).unwrap();
    let consumer = ModuleBuilder::new("m.down", "Down").add_in_port("in", "", int_type()).build(&engine, Box::new(NoOp)).unwrap();

    let proxy = DataProxy::new(Box::new(Identity));
    let proxy_target: Arc<dyn instrumentall::endpoint::Target> = proxy.clone();
    let proxy_source: Arc<dyn instrumentall::endpoint::Source> = proxy.clone();
    engine.dispatcher().register_target(&proxy_target);
    engine.dispatcher().register_source(&proxy_source);

    let up_id = instrumentall::endpoint::Source::id(producer.out_port(0).unwrap().as_ref());
    let down_id = instrumentall::endpoint::Target::id(consumer.in_port(0).unwrap().as_ref());
    engine.dispatcher().bind(up_id, proxy.target_id()).unwrap();
    engine.dispatcher().bind(proxy.source_id(), down_id).unwrap();

    engine.dispatcher().dispatch_target_cancel(up_id);

    assert!(consumer.in_port(0).unwrap().is_upstream_cancelling());
}
