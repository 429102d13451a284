//! Endpoint abstractions: the reservation/lock-handoff protocol shared
//! by every source and target in the graph (`spec.md` \S4.2).

pub mod seq;
pub mod source;
pub mod target;

pub use seq::{SeqSourceCore, SeqTarget, SeqTargetCore};
pub use source::SourceCore;
pub use target::{Target, TargetCore};

use crate::cell::CellReadGuard;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::ids::PortId;
use crate::types::DataType;

/// Implemented by anything that publishes typed data: every `OutPort`,
/// `DataProxy` source half and `ParameterGetter`. The [`Dispatcher`]
/// holds these as trait objects, resolved only by [`PortId`], so
/// binding never creates an ownership cycle (`spec.md` \S9).
pub trait Source: Send + Sync {
    /// This source's stable id.
    fn id(&self) -> PortId;

    /// The runtime type currently stored in the source's cell.
    fn data_type(&self) -> DataType;

    /// See [`SourceCore::register_pending_target`].
    fn register_pending_target(&self, target: PortId) -> Result<()>;

    /// See [`SourceCore::try_reserve_data_for_target`].
    fn try_reserve_data_for_target(&self, target: PortId) -> bool;

    /// See [`SourceCore::read_lock_data_for_target`].
    fn read_lock_data_for_target(&self, target: PortId) -> CellReadGuard<'_>;

    /// See [`SourceCore::release_target`] / `target_release_read_on_failure`.
    fn release_target(&self, target: PortId);

    /// Propagates cancellation upstream-initiated-downstream: marks
    /// this source cancelling and fans out to its own bound targets.
    fn cancel(&self, dispatcher: &Dispatcher);

    /// Blocks until this source (and everything reachable from it) has
    /// observed cancellation.
    fn wait_cancelled(&self, dispatcher: &Dispatcher);

    /// Clears cancellation state once propagation reached a fixed
    /// point.
    fn reset(&self, dispatcher: &Dispatcher);
}
