//! A typed dataflow execution engine: modules with typed in/out ports
//! wired into a graph, dispatched cooperatively across a worker pool
//! (`spec.md` \S1, \S2).
//!
//! Start at [`Engine`] to create an independent instance, build
//! modules with [`module::ModuleBuilder`], and wire them together
//! through the [`Engine::dispatcher`] the modules were built against.

pub mod attribute;
pub mod breaker;
pub mod cell;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod ids;
pub mod logger;
pub mod module;
pub mod parameter;
pub mod parameter_worker;
pub mod port;
pub mod proxy;
pub mod task;
pub mod thread_manager;
pub mod types;

pub use attribute::Attribute;
pub use cell::{CellReadGuard, CellWriteGuard, DataCell};
pub use context::ProcessContext;
pub use dispatcher::Dispatcher;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use ids::PortId;
pub use module::{Module, ModuleBuilder, ModuleHandle, ModuleLogic, StartCondition};
pub use types::{DataType, DataValue, ElemType, Matrix, TypedData};
