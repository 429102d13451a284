//! The global port registry and data/sequence edge fabric
//! (`spec.md` \S4.3).
//!
//! Grounded on `original_source/src/Dispatcher.{h,cpp}`. Ports register
//! weak handles with the dispatcher; deletion of a port simply lets its
//! `Weak` fail to upgrade, which every dispatcher method treats as "that
//! endpoint is gone" rather than dereferencing a dangling pointer
//! (`spec.md` \S9 "deletion... invalidating other holders safely").

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use crate::attribute::Attribute;
use crate::endpoint::{SeqTarget, Source, Target};
use crate::error::{EngineError, Result};
use crate::ids::PortId;

#[derive(Default)]
struct Registry<T: ?Sized> {
    entries: HashMap<PortId, Weak<T>>,
}

impl<T: ?Sized> Registry<T> {
    fn insert(&mut self, id: PortId, handle: Weak<T>) {
        self.entries.insert(id, handle);
    }

    fn get(&self, id: PortId) -> Option<Arc<T>> {
        self.entries.get(&id).and_then(Weak::upgrade)
    }

    fn remove(&mut self, id: PortId) {
        self.entries.remove(&id);
    }
}

#[derive(Default)]
struct EdgeMap {
    /// target -> source
    source_of: HashMap<PortId, PortId>,
    /// source -> bound targets
    targets_of: HashMap<PortId, HashSet<PortId>>,
}

impl EdgeMap {
    fn bind(&mut self, source: PortId, target: PortId) {
        self.unbind_target(target);
        self.source_of.insert(target, source);
        self.targets_of.entry(source).or_default().insert(target);
    }

    fn unbind_target(&mut self, target: PortId) -> Option<PortId> {
        let source = self.source_of.remove(&target)?;
        if let Some(set) = self.targets_of.get_mut(&source) {
            set.remove(&target);
            if set.is_empty() {
                self.targets_of.remove(&source);
            }
        }
        Some(source)
    }

    fn unbind_source(&mut self, source: PortId) -> HashSet<PortId> {
        let targets = self.targets_of.remove(&source).unwrap_or_default();
        for t in &targets {
            self.source_of.remove(t);
        }
        targets
    }

    fn targets_snapshot(&self, source: PortId) -> Vec<PortId> {
        self.targets_of
            .get(&source)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn source_of(&self, target: PortId) -> Option<PortId> {
        self.source_of.get(&target).copied()
    }
}

/// The global, lazily-populated registry binding typed data sources to
/// typed data targets, plus the parallel sequence-edge fabric.
#[derive(Default)]
pub struct Dispatcher {
    sources: RwLock<Registry<dyn Source>>,
    targets: RwLock<Registry<dyn Target>>,
    edges: RwLock<EdgeMap>,

    seq_targets: RwLock<Registry<dyn SeqTarget>>,
    seq_edges: RwLock<EdgeMap>,
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Dispatcher::default()
    }

    // -- registration -----------------------------------------------

    /// Registers a source's weak handle so it can be found by id. Must
    /// be called once, by the owning port/proxy/getter, before the
    /// source can be bound.
    pub fn register_source(&self, source: &Arc<dyn Source>) {
        self.sources
            .write()
            .unwrap()
            .insert(source.id(), Arc::downgrade(source));
    }

    /// Registers a target's weak handle.
    pub fn register_target(&self, target: &Arc<dyn Target>) {
        self.targets
            .write()
            .unwrap()
            .insert(target.id(), Arc::downgrade(target));
    }

    /// Registers a sequence-target's weak handle.
    pub fn register_seq_target(&self, target: &Arc<dyn SeqTarget>) {
        self.seq_targets
            .write()
            .unwrap()
            .insert(target.id(), Arc::downgrade(target));
    }

    /// Drops a source from the registry and unbinds it from every
    /// target, e.g. on port teardown.
    pub fn forget_source(&self, source: PortId) {
        self.unbind_source(source);
        self.sources.write().unwrap().remove(source);
    }

    /// Drops a target from the registry and unbinds it from its
    /// source.
    pub fn forget_target(&self, target: PortId) {
        self.unbind(target);
        self.targets.write().unwrap().remove(target);
    }

    pub(crate) fn get_source(&self, id: PortId) -> Option<Arc<dyn Source>> {
        self.sources.read().unwrap().get(id)
    }

    pub(crate) fn get_target(&self, id: PortId) -> Option<Arc<dyn Target>> {
        self.targets.read().unwrap().get(id)
    }

    pub(crate) fn get_seq_target(&self, id: PortId) -> Option<Arc<dyn SeqTarget>> {
        self.seq_targets.read().unwrap().get(id)
    }

    // -- data edges ---------------------------------------------------

    /// Binds `target` to `source`, replacing any prior binding on
    /// `target` (rebinding is how `Breaker`/`DuplicatedSource` and plain
    /// user rewiring both work). Idempotent if already bound as given.
    pub fn bind(&self, source: PortId, target: PortId) -> Result<()> {
        if self.sources.read().unwrap().get(source).is_none() {
            return Err(EngineError::not_bound(format!("source {source}")));
        }
        if self.targets.read().unwrap().get(target).is_none() {
            return Err(EngineError::not_bound(format!("target {target}")));
        }
        self.edges.write().unwrap().bind(source, target);
        if let Some(t) = self.get_target(target) {
            t_set_source(t.as_ref(), Some(source));
        }
        log::debug!("bind: {source} -> {target}");
        Ok(())
    }

    /// Unbinds `target` from whatever source it is bound to, if any.
    pub fn unbind(&self, target: PortId) {
        let previous = self.edges.write().unwrap().unbind_target(target);
        if previous.is_some() {
            if let Some(t) = self.get_target(target) {
                t_set_source(t.as_ref(), None);
            }
            log::debug!("unbind: target {target}");
        }
    }

    /// Unbinds every target currently bound to `source`.
    pub fn unbind_source(&self, source: PortId) {
        let targets = self.edges.write().unwrap().unbind_source(source);
        for target in targets {
            if let Some(t) = self.get_target(target) {
                t_set_source(t.as_ref(), None);
            }
        }
        log::debug!("unbind: source {source}");
    }

    /// The source currently bound to `target`, if any.
    pub fn source_of(&self, target: PortId) -> Option<PortId> {
        self.edges.read().unwrap().source_of(target)
    }

    /// Snapshot of targets currently bound to `source`.
    pub fn targets_of(&self, source: PortId) -> Vec<PortId> {
        self.edges.read().unwrap().targets_snapshot(source)
    }

    // -- sequence edges -------------------------------------------------

    /// Binds a parallel sequence edge, independent of the data edge.
    pub fn seq_bind(&self, source: PortId, target: PortId) {
        self.seq_edges.write().unwrap().bind(source, target);
        log::debug!("seq-bind: {source} -> {target}");
    }

    /// Unbinds a sequence edge.
    pub fn seq_unbind(&self, target: PortId) {
        self.seq_edges.write().unwrap().unbind_target(target);
    }

    /// Fans an attribute's sequence bookkeeping out to every sequence
    /// target bound to `source`.
    pub fn dispatch_seq_ready(&self, source: PortId, attribute: &Attribute) {
        for target in self.seq_edges.read().unwrap().targets_snapshot(source) {
            if let Some(t) = self.get_seq_target(target) {
                t.receive_seq(attribute);
            }
        }
    }

    // -- publish fan-out ------------------------------------------------

    /// `set-output-data-ready`: for each target bound to `source` in
    /// the snapshot taken here, registers it pending and asks it to run
    /// (`spec.md` \S4.3, \S8 first invariant: later binds don't
    /// participate in this round).
    pub fn set_output_data_ready(&self, source: PortId) {
        let Some(source_handle) = self.get_source(source) else {
            return;
        };
        let targets = self.edges.read().unwrap().targets_snapshot(source);
        log::trace!("set_output_data_ready: source {source} -> {} target(s)", targets.len());
        for target_id in targets {
            if source_handle.register_pending_target(target_id).is_err() {
                // Source is cancelling: stop fanning out further, matching
                // the "ExecutionAborted during publish" propagation policy.
                break;
            }
            if let Some(target) = self.get_target(target_id) {
                target.try_run_target(self, source);
            } else {
                source_handle.release_target(target_id);
            }
        }
    }

    // -- cancellation fan-out -------------------------------------------

    /// Fans cancellation out to every target currently bound to
    /// `source`.
    pub fn dispatch_target_cancel(&self, source: PortId) {
        for target in self.edges.read().unwrap().targets_snapshot(source) {
            if let Some(t) = self.get_target(target) {
                t.cancel(self);
            }
        }
    }

    /// Waits for every target currently bound to `source` to observe
    /// cancellation.
    pub fn dispatch_target_wait_cancelled(&self, source: PortId) {
        for target in self.edges.read().unwrap().targets_snapshot(source) {
            if let Some(t) = self.get_target(target) {
                t.wait_cancelled(self);
            }
        }
    }

    /// Resets every target currently bound to `source`.
    pub fn dispatch_target_reset(&self, source: PortId) {
        for target in self.edges.read().unwrap().targets_snapshot(source) {
            if let Some(t) = self.get_target(target) {
                t.reset(self);
            }
        }
    }

    /// Propagates cancellation upstream from `target` to its bound
    /// source, if any.
    pub fn dispatch_source_cancel(&self, target: PortId) {
        if let Some(source) = self.source_of(target) {
            if let Some(s) = self.get_source(source) {
                s.cancel(self);
            }
        }
    }

    /// Waits for the source bound to `target`, if any, to observe
    /// cancellation.
    pub fn dispatch_source_wait_cancelled(&self, target: PortId) {
        if let Some(source) = self.source_of(target) {
            if let Some(s) = self.get_source(source) {
                s.wait_cancelled(self);
            }
        }
    }

    /// Resets the source bound to `target`, if any.
    pub fn dispatch_source_reset(&self, target: PortId) {
        if let Some(source) = self.source_of(target) {
            if let Some(s) = self.get_source(source) {
                s.reset(self);
            }
        }
    }
}

fn t_set_source(target: &dyn Target, source: Option<PortId>) {
    target.set_bound_source(source);
}
