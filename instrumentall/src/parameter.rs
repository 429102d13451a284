//! Module parameters: (name, description, kind) triples with a current
//! value, a pending value, and a "needs apply" flag (`spec.md` \S3, \S4.7).
//!
//! Grounded on `original_source/src/ParameterizedWithGetters.{h,cpp}`
//! (the parameter-set half; the getter/setter adapters live in
//! `parameter_worker.rs`).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{EngineError, Result};

/// The three value kinds a parameter can hold (`spec.md` \S3).
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

/// The declared kind of a parameter, independent of its current value
/// (used to validate writes before they are staged as pending).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Str,
}

impl ParamValue {
    /// The [`ParamKind`] this value carries.
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::Str(_) => ParamKind::Str,
        }
    }

    /// Parses a value of the given kind from its string representation,
    /// as used for defaults resolved through [`crate::config::ParamDefaultResolver`].
    pub fn parse(kind: ParamKind, text: &str) -> Result<ParamValue> {
        match kind {
            ParamKind::Int => text
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|e| EngineError::invalid_state(format!("bad int default {text:?}: {e}"))),
            ParamKind::Float => text
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|e| EngineError::invalid_state(format!("bad float default {text:?}: {e}"))),
            ParamKind::Str => Ok(ParamValue::Str(text.to_string())),
        }
    }
}

struct ParamSlot {
    name: String,
    description: String,
    kind: ParamKind,
    current: ParamValue,
    pending: Option<ParamValue>,
}

/// An ordered, name-indexed vector of parameters belonging to a
/// [`crate::module::Module`] (or a [`crate::proxy::DataProxy`]).
///
/// Reading a parameter implicitly triggers [`ParameterSet::try_apply_parameters`]
/// (`spec.md` \S4.7).
pub struct ParameterSet {
    slots: RwLock<Vec<ParamSlot>>,
    index: RwLock<HashMap<String, usize>>,
    /// Indices staged by a `WhenAllSet` setter (`spec.md` \S4.7): as a
    /// group, none of these promote until every member has a pending
    /// value for the current round.
    coordinated: RwLock<HashSet<usize>>,
}

impl ParameterSet {
    /// An empty parameter set.
    pub fn new() -> Self {
        ParameterSet {
            slots: RwLock::new(Vec::new()),
            index: RwLock::new(HashMap::new()),
            coordinated: RwLock::new(HashSet::new()),
        }
    }

    /// Marks parameter `idx` as governed by a `WhenAllSet` setter: from
    /// now on `try_apply_parameters` withholds it (and every other
    /// coordinated index) until all of them have a pending value at
    /// once.
    pub fn mark_coordinated(&self, idx: usize) {
        self.coordinated.write().unwrap().insert(idx);
    }

    /// Declares a new parameter at the next index, with an initial
    /// current value.
    pub fn add_parameter(&self, name: &str, description: &str, initial: ParamValue) -> usize {
        let mut slots = self.slots.write().unwrap();
        let idx = slots.len();
        slots.push(ParamSlot {
            name: name.to_string(),
            description: description.to_string(),
            kind: initial.kind(),
            current: initial,
            pending: None,
        });
        self.index.write().unwrap().insert(name.to_string(), idx);
        idx
    }

    /// The index of a parameter previously added under `name`.
    pub fn get_parameter_index(&self, name: &str) -> Option<usize> {
        self.index.read().unwrap().get(name).copied()
    }

    /// The parameter's declared kind.
    pub fn kind_of(&self, idx: usize) -> Result<ParamKind> {
        self.slots
            .read()
            .unwrap()
            .get(idx)
            .map(|s| s.kind)
            .ok_or_else(|| EngineError::not_bound(format!("parameter index {idx}")))
    }

    /// The parameter's declared description.
    pub fn description_of(&self, idx: usize) -> Result<String> {
        self.slots
            .read()
            .unwrap()
            .get(idx)
            .map(|s| s.description.clone())
            .ok_or_else(|| EngineError::not_bound(format!("parameter index {idx}")))
    }

    /// Reads the current value by index, applying any pending value
    /// first.
    pub fn get(&self, idx: usize) -> Result<ParamValue> {
        self.try_apply_parameters()?;
        self.slots
            .read()
            .unwrap()
            .get(idx)
            .map(|s| s.current.clone())
            .ok_or_else(|| EngineError::not_bound(format!("parameter index {idx}")))
    }

    /// Reads the current value by name.
    pub fn get_by_name(&self, name: &str) -> Result<ParamValue> {
        let idx = self
            .get_parameter_index(name)
            .ok_or_else(|| EngineError::not_bound(name.to_string()))?;
        self.get(idx)
    }

    /// Stages `value` as pending for parameter `idx`, to be promoted at
    /// the next `try_apply_parameters` call (the engine calls this once
    /// per task, ahead of `process`). Rejects a kind mismatch.
    pub fn set_pending(&self, idx: usize, value: ParamValue) -> Result<()> {
        let mut slots = self.slots.write().unwrap();
        let slot = slots
            .get_mut(idx)
            .ok_or_else(|| EngineError::not_bound(format!("parameter index {idx}")))?;
        if slot.kind != value.kind() {
            return Err(EngineError::TypeMismatch {
                expected: format!("{:?}", slot.kind),
                found: format!("{:?}", value.kind()),
            });
        }
        slot.pending = Some(value);
        Ok(())
    }

    /// Whether parameter `idx` has a pending value not yet applied.
    pub fn needs_apply(&self, idx: usize) -> bool {
        self.slots
            .read()
            .unwrap()
            .get(idx)
            .map(|s| s.pending.is_some())
            .unwrap_or(false)
    }

    /// Promotes every pending value into current, except that
    /// coordinated (`WhenAllSet`) indices are held back as a group until
    /// every one of them has a pending value for this round. Idempotent:
    /// a no-op when nothing promotable is pending.
    pub fn try_apply_parameters(&self) -> Result<()> {
        let coordinated = self.coordinated.read().unwrap();
        let mut slots = self.slots.write().unwrap();
        let round_complete = coordinated.iter().all(|&idx| slots.get(idx).is_some_and(|s| s.pending.is_some()));
        for (idx, slot) in slots.iter_mut().enumerate() {
            if coordinated.contains(&idx) && !round_complete {
                continue;
            }
            if let Some(pending) = slot.pending.take() {
                log::debug!("applying parameter {}: {:?}", slot.name, pending);
                slot.current = pending;
            }
        }
        Ok(())
    }

    /// Number of declared parameters.
    pub fn len(&self) -> usize {
        self.slots.read().unwrap().len()
    }

    /// Whether no parameters are declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        ParameterSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_index_round_trips() {
        let set = ParameterSet::new();
        let idx = set.add_parameter("gain", "amplifier gain", ParamValue::Float(1.0));
        assert_eq!(set.get_parameter_index("gain"), Some(idx));
    }

    #[test]
    fn set_then_get_applies_pending() {
        let set = ParameterSet::new();
        let idx = set.add_parameter("value", "", ParamValue::Int(0));
        set.set_pending(idx, ParamValue::Int(42)).unwrap();
        assert_eq!(set.get(idx).unwrap(), ParamValue::Int(42));
        assert!(!set.needs_apply(idx));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let set = ParameterSet::new();
        let idx = set.add_parameter("value", "", ParamValue::Int(0));
        assert!(set.set_pending(idx, ParamValue::Str("x".into())).is_err());
    }
}
