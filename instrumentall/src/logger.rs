//! `DataLogger`: a `Target`-only sink that renders whatever passes
//! through it to a pluggable backend (`spec.md` \S3 "DataLogger").
//!
//! Grounded on `original_source/src/DataLogger.{h,cpp}`, including its
//! process-wide factory-by-class-name registration (there: a static
//! map from class name to constructor; here: [`LoggerRegistry`] held by
//! the [`crate::engine::Engine`]'s caller rather than a process global,
//! per `spec.md` \S9's "no process-wide statics" design note).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dispatcher::Dispatcher;
use crate::endpoint::target::guarded_wait;
use crate::endpoint::{Target, TargetCore};
use crate::error::Result;
use crate::ids::{PortId, TargetKind};
use crate::types::DataType;

/// Where a [`DataLogger`] sends rendered lines. Implemented by test
/// doubles and by real sinks (stderr, a file, a UI console) alike.
pub trait LogSink: Send + Sync {
    /// Receives one rendered line.
    fn write_line(&self, line: &str);
}

/// A [`LogSink`] that forwards to the `log` crate at `info` level,
/// the default for loggers that aren't given an explicit sink.
pub struct CrateLogSink {
    target: String,
}

impl CrateLogSink {
    /// Creates a sink that logs under the given target name (shown in
    /// `RUST_LOG` filters as e.g. `instrumentall::logger::<name>`).
    pub fn new(target: impl Into<String>) -> Self {
        CrateLogSink { target: target.into() }
    }
}

impl LogSink for CrateLogSink {
    fn write_line(&self, line: &str) {
        log::info!(target: "instrumentall::logger", "[{}] {}", self.target, line);
    }
}

/// A data target that renders every value it receives through a
/// [`LogSink`] rather than feeding it to further computation.
pub struct DataLogger {
    core: TargetCore,
    name: String,
    sink: Box<dyn LogSink>,
}

impl DataLogger {
    /// Creates a logger named `name`, rendering through `sink`.
    pub fn new(name: impl Into<String>, sink: Box<dyn LogSink>) -> Arc<DataLogger> {
        Arc::new(DataLogger {
            core: TargetCore::new(TargetKind::Logger),
            name: name.into(),
            sink,
        })
    }

    /// The logger's declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, dispatcher: &Dispatcher, source: PortId) -> Result<()> {
        let Some(source_handle) = dispatcher.get_source(source) else {
            return Ok(());
        };
        if !source_handle.try_reserve_data_for_target(self.core.id()) {
            return Ok(());
        }
        let line = {
            let guard = source_handle.read_lock_data_for_target(self.core.id());
            guard.value().to_log_string()
        };
        source_handle.release_target(self.core.id());
        self.sink.write_line(&line);
        Ok(())
    }
}

impl Target for DataLogger {
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
            log::warn!("logger {} failed: {err}", self.name);
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

/// A named constructor for a [`DataLogger]'s sink, keyed by class name
/// (`spec.md` \S3's "DataLogger... constructed by class name").
pub type SinkFactory = Box<dyn Fn() -> Box<dyn LogSink> + Send + Sync>;

/// A registry of sink constructors by class name, so loggers can be
/// built from serialized configuration (a class name string) instead
/// of requiring the caller to already have a concrete `LogSink`.
#[derive(Default)]
pub struct LoggerRegistry {
    factories: Mutex<HashMap<String, SinkFactory>>,
}

impl LoggerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        LoggerRegistry::default()
    }

    /// Registers a sink constructor under `class_name`.
    pub fn register(&self, class_name: impl Into<String>, factory: SinkFactory) {
        self.factories.lock().unwrap().insert(class_name.into(), factory);
    }

    /// Builds a logger named `name` whose sink is constructed via the
    /// factory registered under `class_name`.
    pub fn build(&self, class_name: &str, name: impl Into<String>) -> Option<Arc<DataLogger>> {
        let factories = self.factories.lock().unwrap();
        let factory = factories.get(class_name)?;
        Some(DataLogger::new(name, factory()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::engine::Engine;
    use crate::port::OutPort;
    use crate::types::{DataValue, ElemType};
    use std::sync::Mutex as StdMutex;

    struct CapturingSink(Arc<StdMutex<Vec<String>>>);
    impl LogSink for CapturingSink {
        fn write_line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn logger_renders_value_through_sink() {
        let engine = Engine::new();
        let dispatcher = engine.dispatcher();
        let captured = Arc::new(StdMutex::new(Vec::new()));

        let src = OutPort::new("o", "", DataType::Scalar(ElemType::I32), 0, std::sync::Weak::new());
        let src_dyn: Arc<dyn crate::endpoint::Source> = src.clone();
        dispatcher.register_source(&src_dyn);

        let logger = DataLogger::new("console", Box::new(CapturingSink(captured.clone())));
        let target_dyn: Arc<dyn Target> = logger.clone();
        dispatcher.register_target(&target_dyn);

        dispatcher.bind(crate::endpoint::Source::id(src.as_ref()), logger.id()).unwrap();

        let mut guard = src.reserve().unwrap();
        guard.set_new_data(DataValue::I32(7));
        src.notify_ready(dispatcher, guard, Attribute::new()).unwrap();

        assert_eq!(captured.lock().unwrap().as_slice(), ["7"]);
    }

    #[test]
    fn registry_builds_by_class_name() {
        let registry = LoggerRegistry::new();
        registry.register("console", Box::new(|| Box::new(CrateLogSink::new("test")) as Box<dyn LogSink>));
        assert!(registry.build("console", "c1").is_some());
        assert!(registry.build("missing", "c2").is_none());
    }
}
