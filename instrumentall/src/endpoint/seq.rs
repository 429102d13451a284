//! The parallel sequence edge (`spec.md` \S3 "Seq edge"): propagates
//! [`Attribute`] sequence bookkeeping independently of the data edge,
//! e.g. so a module that only emits one output value per whole upstream
//! sequence (an accumulator) can still forward start/end markers ahead
//! of its eventual data publish.
//!
//! Grounded on the sequence-bookkeeping half of
//! `original_source/src/DataAttributeOut.{h,cpp}`.

use crate::attribute::Attribute;
use crate::dispatcher::Dispatcher;
use crate::ids::PortId;

/// Shared logic embedded by anything that originates sequence
/// information: every `OutPort`, `DataProxy` source half and
/// `ParameterGetter`.
pub struct SeqSourceCore {
    id: PortId,
}

impl SeqSourceCore {
    /// Creates a new sequence-source core with a fresh id.
    pub fn new() -> Self {
        SeqSourceCore { id: PortId::fresh() }
    }

    /// This sequence-source's stable id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Fans the attribute's sequence bookkeeping out to every bound
    /// sequence target, independent of whether a data value is
    /// published in the same round.
    pub fn notify_seq_ready(&self, dispatcher: &Dispatcher, attribute: &Attribute) {
        dispatcher.dispatch_seq_ready(self.id, attribute);
    }
}

impl Default for SeqSourceCore {
    fn default() -> Self {
        SeqSourceCore::new()
    }
}

/// Implemented by anything that can receive sequence bookkeeping over a
/// seq edge: every `InPort` and `TrigPort`.
pub trait SeqTarget: Send + Sync {
    /// This sequence-target's stable id.
    fn id(&self) -> PortId;

    /// Receives sequence bookkeeping forwarded ahead of (or instead of)
    /// an ordinary data publish.
    fn receive_seq(&self, attribute: &Attribute);
}

/// Shared logic embedded by anything that terminates a sequence edge.
pub struct SeqTargetCore {
    id: PortId,
}

impl SeqTargetCore {
    /// Creates a new sequence-target core with a fresh id.
    pub fn new() -> Self {
        SeqTargetCore { id: PortId::fresh() }
    }

    /// This sequence-target's stable id.
    pub fn id(&self) -> PortId {
        self.id
    }
}

impl Default for SeqTargetCore {
    fn default() -> Self {
        SeqTargetCore::new()
    }
}
