//! Per-realm node storage
//!
//! Records live in a dense `Vec` with an id → slot index beside it, so upserts
//! and evictions are O(1) and iteration order only depends on the sequence of
//! writes (which keeps seeded sampling reproducible).

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use std::collections::HashMap;

use crate::types::{NodeId, NodeRecord, Timestamp};

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Record had no addresses and was ignored
    Dropped,
}

/// Nodes of a single realm
#[derive(Debug, Default)]
pub struct RealmNodes {
    entries: Vec<NodeRecord>,
    index: HashMap<NodeId, usize>,
}

impl RealmNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, record: NodeRecord) -> UpsertOutcome {
        if record.addresses.is_empty() {
            return UpsertOutcome::Dropped;
        }

        match self.index.get(&record.node_id) {
            Some(&slot) => {
                let existing = &mut self.entries[slot];
                existing.addresses = record.addresses;
                existing.last_seen = record.last_seen;
                UpsertOutcome::Updated
            }
            None => {
                self.index.insert(record.node_id, self.entries.len());
                self.entries.push(record);
                UpsertOutcome::Inserted
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, node_id: &NodeId) -> Option<&NodeRecord> {
        self.index.get(node_id).map(|&slot| &self.entries[slot])
    }

    /// Remove every record older than `window_secs`, returning how many went
    pub fn evict_stale(&mut self, now: Timestamp, window_secs: u64) -> usize {
        let mut removed = 0;
        let mut slot = 0;

        while slot < self.entries.len() {
            if self.entries[slot].is_stale(now, window_secs) {
                let gone = self.entries.swap_remove(slot);
                self.index.remove(&gone.node_id);
                if let Some(moved) = self.entries.get(slot) {
                    self.index.insert(moved.node_id, slot);
                }
                removed += 1;
            } else {
                slot += 1;
            }
        }

        removed
    }

    /// Draw up to `n` fresh records matching `filter`, uniformly without
    /// replacement, in random order.
    pub fn sample<R, F>(
        &self,
        n: usize,
        now: Timestamp,
        window_secs: u64,
        filter: F,
        rng: &mut R,
    ) -> Vec<NodeRecord>
    where
        R: Rng + ?Sized,
        F: Fn(&NodeRecord) -> bool,
    {
        if n == 0 {
            return Vec::new();
        }

        let mut picked: Vec<&NodeRecord> = self
            .entries
            .iter()
            .filter(|r| !r.is_stale(now, window_secs) && !r.addresses.is_empty() && filter(*r))
            .choose_multiple(rng, n);

        // Reservoir order is biased towards insertion order
        picked.shuffle(rng);
        picked.into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn fresh_count(&self, now: Timestamp, window_secs: u64) -> usize {
        self.entries
            .iter()
            .filter(|r| !r.is_stale(now, window_secs))
            .count()
    }
}
