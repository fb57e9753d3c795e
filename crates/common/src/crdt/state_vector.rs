// State vectors: per-peer highest integrated clock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::{OpId, PeerId};

/// Summary of causal knowledge: for each peer, the highest clock such that
/// every op `1..=clock` of that peer has been integrated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVector {
    clocks: BTreeMap<PeerId, u64>,
}

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest clock seen for `peer` (0 when nothing was seen).
    pub fn get(&self, peer: PeerId) -> u64 {
        self.clocks.get(&peer).copied().unwrap_or(0)
    }

    /// Set the clock for `peer`. A zero clock removes the entry.
    pub fn set(&mut self, peer: PeerId, clock: u64) {
        if clock == 0 {
            self.clocks.remove(&peer);
        } else {
            self.clocks.insert(peer, clock);
        }
    }

    /// Raise the clock for `peer` to at least `clock`.
    pub fn observe(&mut self, peer: PeerId, clock: u64) {
        let entry = self.clocks.entry(peer).or_insert(0);
        *entry = (*entry).max(clock);
    }

    /// Whether `op` is covered by this vector.
    pub fn contains(&self, op: OpId) -> bool {
        op.clock <= self.get(op.peer)
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &StateVector) {
        for (peer, clock) in &other.clocks {
            self.observe(*peer, *clock);
        }
    }

    /// Pointwise minimum. Peers missing on either side count as 0.
    pub fn meet(&self, other: &StateVector) -> StateVector {
        let clocks = self
            .clocks
            .iter()
            .filter_map(|(peer, clock)| {
                let min = (*clock).min(other.get(*peer));
                (min > 0).then_some((*peer, min))
            })
            .collect();
        StateVector { clocks }
    }

    /// True when every clock in `other` is covered by `self`.
    pub fn dominates(&self, other: &StateVector) -> bool {
        other.clocks.iter().all(|(peer, clock)| self.get(*peer) >= *clock)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, u64)> + '_ {
        self.clocks.iter().map(|(peer, clock)| (*peer, *clock))
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }
}

impl FromIterator<(PeerId, u64)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (PeerId, u64)>>(iter: I) -> Self {
        let mut vector = StateVector::new();
        for (peer, clock) in iter {
            vector.observe(peer, clock);
        }
        vector
    }
}
