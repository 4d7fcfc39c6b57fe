//! Staging set for negated conditions met during backtracing.
//!
//! Entries are content-addressed by [`Condition::structural_hash`] so the
//! same negated pattern reached through many instantiations is staged once.
//! The set stores positions into the causal graph, not copies, so it holds
//! no symbol references.

use std::collections::HashMap;

use crate::causal::{CausalGraph, CondRef};

/// Handle of a staged entry.
pub(crate) type StagedHandle = usize;

#[derive(Debug, Clone, Copy)]
struct Staged {
    at: CondRef,
    hash: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ChunkCondSet {
    slots: Vec<Option<Staged>>,
    buckets: HashMap<u64, Vec<StagedHandle>>,
    live: usize,
}

impl ChunkCondSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a negated condition. Returns false if an equivalent one is already staged.
    pub fn insert(&mut self, graph: &CausalGraph, at: CondRef) -> bool {
        let Some(cond) = graph.condition(at) else {
            return false;
        };
        let hash = cond.structural_hash();
        if let Some(bucket) = self.buckets.get(&hash) {
            let duplicate = bucket.iter().any(|&h| {
                self.slots[h]
                    .and_then(|s| graph.condition(s.at))
                    .is_some_and(|other| other.same_as(cond))
            });
            if duplicate {
                return false;
            }
        }
        let handle = self.slots.len();
        self.slots.push(Some(Staged { at, hash }));
        self.buckets.entry(hash).or_default().push(handle);
        self.live += 1;
        true
    }

    /// Oldest staged entry still present.
    pub fn first(&self) -> Option<StagedHandle> {
        self.slots.iter().position(Option::is_some)
    }

    /// Unstage an entry. Removing an entry twice is a logic error.
    pub fn remove(&mut self, handle: StagedHandle) -> CondRef {
        let staged = match self.slots.get_mut(handle).and_then(Option::take) {
            Some(s) => s,
            None => panic!("negated condition {handle} removed twice from the staging set"),
        };
        if let Some(bucket) = self.buckets.get_mut(&staged.hash) {
            bucket.retain(|h| *h != handle);
            if bucket.is_empty() {
                self.buckets.remove(&staged.hash);
            }
        }
        self.live -= 1;
        staged.at
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.buckets.clear();
        self.live = 0;
    }
}
