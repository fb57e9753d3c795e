// Replica, operation, and element identifiers for the text CRDT.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one replica. Chosen randomly per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Replica id used by the relay's room document. The relay never edits,
    /// so this id never appears in an op.
    pub const RELAY: PeerId = PeerId(0);

    /// Draw a fresh non-zero replica id.
    pub fn random() -> Self {
        loop {
            let candidate = uuid::Uuid::new_v4().as_u64_pair().0;
            if candidate != Self::RELAY.0 {
                return Self(candidate);
            }
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One operation: the `clock`-th edit made by `peer`. Clocks start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    pub peer: PeerId,
    pub clock: u64,
}

impl OpId {
    pub fn new(peer: PeerId, clock: u64) -> Self {
        Self { peer, clock }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.peer, self.clock)
    }
}

/// One character: the `offset`-th character inserted by op `op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId {
    pub op: OpId,
    pub offset: u32,
}

impl ElementId {
    pub fn new(op: OpId, offset: u32) -> Self {
        Self { op, offset }
    }

    pub fn peer(&self) -> PeerId {
        self.op.peer
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.op, self.offset)
    }
}

/// Ordering key of an element among elements inserted at the same place.
///
/// Higher Lamport timestamps win (a later insert at a position lands before
/// the older content there). Equal timestamps mean the inserts were made from
/// the same causal state, and the lower peer id goes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub lamport: u64,
    pub peer: PeerId,
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport.cmp(&other.lamport).then_with(|| other.peer.cmp(&self.peer))
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
