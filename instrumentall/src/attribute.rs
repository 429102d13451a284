//! Per-value metadata: value indexes plus sequence bookkeeping.
//!
//! Grounded on `original_source/src/DataAttribute.{h,cpp}` and
//! `DataAttributeOut.{h,cpp}` (the stack-based variant, authoritative
//! per `spec.md` \S9).

use std::collections::BTreeSet;

use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Opaque sequence identifier, drawn once from [`Engine::next_sequence_index`]
/// and scoped to the source that started the sequence.
pub type SeqId = usize;

/// Per-source, per-port identifier of a sequence-target endpoint that an
/// attribute has been marked "for" (`DataAttribute::appendSeqPortTarget`).
pub type SeqTargetId = u64;

/// Per-value metadata attached to a [`crate::cell::DataCell`] at publish
/// time: the set of value indexes the data carries, plus the three
/// ordered sequence stacks (`spec.md` \S3 "Attribute").
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attribute {
    indexes: BTreeSet<usize>,
    starting: Vec<SeqId>,
    active: Vec<SeqId>,
    ending: Vec<SeqId>,
    seq_targets: BTreeSet<SeqTargetId>,
}

impl Attribute {
    /// Empty attribute, as used when a [`crate::cell::DataCell`] is
    /// created with no data index defined yet.
    pub fn new() -> Self {
        Attribute::default()
    }

    /// Builds a fresh attribute carrying exactly one newly drawn value
    /// index, as a source does for each item it produces.
    pub fn for_new_value(engine: &Engine) -> Self {
        let mut a = Attribute::new();
        a.indexes.insert(engine.next_value_index());
        a
    }

    /// The set of value indexes carried by this attribute.
    pub fn indexes(&self) -> &BTreeSet<usize> {
        &self.indexes
    }

    /// The maximum value index, if any.
    pub fn max_index(&self) -> Option<usize> {
        self.indexes.iter().next_back().copied()
    }

    /// Currently active (open) sequence ids, outermost first.
    pub fn active(&self) -> &[SeqId] {
        &self.active
    }

    /// Sequence ids starting at this value.
    pub fn starting(&self) -> &[SeqId] {
        &self.starting
    }

    /// Sequence ids ending at this value.
    pub fn ending(&self) -> &[SeqId] {
        &self.ending
    }

    /// Begins a new sequence nested inside whatever is currently active,
    /// drawing a fresh id from the engine. Returns the new id.
    pub fn start_sequence(&mut self, engine: &Engine) -> SeqId {
        let id = engine.next_sequence_index();
        self.starting.push(id);
        self.active.push(id);
        id
    }

    /// Ends the innermost active sequence. Fails with
    /// [`EngineError::InvalidState`] if `id` is not the top of the
    /// active stack (ending out of nesting order is not representable,
    /// per \S3 invariant A2).
    pub fn end_sequence(&mut self, id: SeqId) -> Result<()> {
        match self.active.last() {
            Some(&top) if top == id => {
                self.active.pop();
                self.ending.push(id);
                Ok(())
            }
            _ => Err(EngineError::invalid_state(format!(
                "sequence {id} is not the innermost active sequence"
            ))),
        }
    }

    /// Marks `id` as active on this attribute without recording it as
    /// starting here: used for the interior values of a sequence that
    /// spans several separate publishes, where only the first value
    /// calls `start_sequence` and only the last calls `end_sequence`
    /// (`spec.md` \S8 scenario 2).
    pub fn continue_sequence(&mut self, id: SeqId) {
        self.active.push(id);
    }

    /// Records that `target` is one of the endpoints this attribute's
    /// sequence information is "for" (called by the out-port during
    /// notify-ready, mirroring `appendSeqPortTarget`).
    pub fn append_seq_port_target(&mut self, target: SeqTargetId) {
        self.seq_targets.insert(target);
    }

    /// The sequence-target endpoints this attribute is "for".
    pub fn seq_port_targets(&self) -> &BTreeSet<SeqTargetId> {
        &self.seq_targets
    }

    /// Merges `other` into `self`: union of indexes, and for the active
    /// stack, requires one to be a suffix of the other (or equal) per
    /// invariant A3. Refuses (rather than silently combining disjoint
    /// sequence stacks) when neither holds, resolving the open question
    /// in `spec.md` \S9.
    pub fn merge(&mut self, other: &Attribute) -> Result<()> {
        let active = merge_active(&self.active, &other.active)?;

        self.indexes.extend(other.indexes.iter().copied());
        self.active = active;

        for id in &other.starting {
            if !self.starting.contains(id) {
                self.starting.push(*id);
            }
        }
        for id in &other.ending {
            if !self.ending.contains(id) {
                self.ending.push(*id);
            }
        }
        self.seq_targets.extend(other.seq_targets.iter().copied());

        Ok(())
    }
}

impl std::ops::AddAssign<&Attribute> for Attribute {
    fn add_assign(&mut self, rhs: &Attribute) {
        // Mirrors `DataAttribute::operator+=`; panics are not acceptable
        // in Rust so callers that need the fallible form should prefer
        // `merge`. This operator is kept for ergonomic `a + b` chaining
        // where a merge conflict truly cannot occur (e.g. both operands
        // come from the same single-sequence source).
        self.merge(rhs).expect("disjoint sequence stacks cannot be combined with +=");
    }
}

fn merge_active(lhs: &[SeqId], rhs: &[SeqId]) -> Result<Vec<SeqId>> {
    if lhs == rhs {
        return Ok(lhs.to_vec());
    }
    if lhs.len() > rhs.len() && lhs.ends_with(rhs) {
        return Ok(lhs.to_vec());
    }
    if rhs.len() > lhs.len() && rhs.ends_with(lhs) {
        return Ok(rhs.to_vec());
    }
    Err(EngineError::invalid_state(
        "active sequence stacks of merged attributes are neither equal nor one a suffix of the other",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> std::sync::Arc<Engine> {
        Engine::new()
    }

    #[test]
    fn new_value_gets_a_fresh_monotonic_index() {
        let e = engine();
        let a = Attribute::for_new_value(&e);
        let b = Attribute::for_new_value(&e);
        assert!(a.max_index() < b.max_index());
    }

    #[test]
    fn start_and_end_are_recorded_in_active() {
        let e = engine();
        let mut a = Attribute::new();
        let id = a.start_sequence(&e);
        assert_eq!(a.active(), &[id]);
        assert_eq!(a.starting(), &[id]);
        a.end_sequence(id).unwrap();
        assert!(a.active().is_empty());
        assert_eq!(a.ending(), &[id]);
    }

    #[test]
    fn ending_out_of_order_is_rejected() {
        let e = engine();
        let mut a = Attribute::new();
        let outer = a.start_sequence(&e);
        let _inner = a.start_sequence(&e);
        assert!(a.end_sequence(outer).is_err());
    }

    #[test]
    fn merge_accepts_suffix_active_stacks() {
        let e = engine();
        let mut outer = Attribute::new();
        let o = outer.start_sequence(&e);

        let mut inner = outer.clone();
        let _i = inner.start_sequence(&e);

        let mut merged = outer.clone();
        merged.merge(&inner).unwrap();
        assert_eq!(merged.active(), inner.active());
        assert_eq!(merged.active().first(), Some(&o));
    }

    #[test]
    fn merge_refuses_disjoint_active_stacks() {
        let e = engine();
        let mut a = Attribute::new();
        a.start_sequence(&e);
        let mut b = Attribute::new();
        b.start_sequence(&e);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn merge_unions_indexes() {
        let e = engine();
        let a = Attribute::for_new_value(&e);
        let b = Attribute::for_new_value(&e);
        let mut merged = a.clone();
        merged.merge(&b).unwrap();
        assert_eq!(merged.indexes().len(), 2);
    }
}
