// Operations, updates, and their binary encoding.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ids::{ElementId, OpId, PeerId};
use super::state_vector::StateVector;
use super::wire::{self, CodecError};

/// Largest Lamport timestamp any character may carry. Leaves room for local
/// increments without ever wrapping.
pub const MAX_LAMPORT: u64 = 1 << 48;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Insert `content` after `after` (or at the start). Character `i` of the
    /// content gets element id `(id, i)` and Lamport timestamp `lamport + i`.
    Insert {
        id: OpId,
        lamport: u64,
        after: Option<ElementId>,
        content: String,
    },
    /// Tombstone every element in `targets`.
    Delete {
        id: OpId,
        lamport: u64,
        targets: Vec<ElementId>,
    },
}

impl Op {
    pub fn id(&self) -> OpId {
        match self {
            Self::Insert { id, .. } | Self::Delete { id, .. } => *id,
        }
    }

    pub fn lamport(&self) -> u64 {
        match self {
            Self::Insert { lamport, .. } | Self::Delete { lamport, .. } => *lamport,
        }
    }

    /// Highest Lamport timestamp this op occupies, or `None` when the
    /// content would run past `u64::MAX`.
    pub fn last_lamport(&self) -> Option<u64> {
        match self {
            Self::Insert { lamport, content, .. } => {
                lamport.checked_add((content.chars().count() as u64).saturating_sub(1))
            }
            Self::Delete { lamport, .. } => Some(*lamport),
        }
    }

    /// Ops that must be integrated before this one.
    pub fn dependencies(&self) -> Vec<OpId> {
        let id = self.id();
        let mut deps = Vec::new();
        if id.clock > 1 {
            deps.push(OpId::new(id.peer, id.clock - 1));
        }
        match self {
            Self::Insert { after: Some(anchor), .. } => deps.push(anchor.op),
            Self::Insert { after: None, .. } => {}
            Self::Delete { targets, .. } => deps.extend(targets.iter().map(|target| target.op)),
        }
        deps
    }

    /// Number of characters an insert carries.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Insert { content, .. } => content.chars().count(),
            Self::Delete { .. } => 0,
        }
    }
}

/// An immutable batch of operations sent between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Replica that produced this batch. For resync diffs this is the sender,
    /// not necessarily the author of every op.
    pub origin: PeerId,
    pub ops: Vec<Op>,
}

impl Update {
    pub fn new(origin: PeerId, ops: Vec<Op>) -> Self {
        Self { origin, ops }
    }

    pub fn empty(origin: PeerId) -> Self {
        Self::new(origin, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Minimal state vector a replica must reach before every op here can
    /// integrate. Dependencies satisfied inside the update are left out.
    pub fn dependencies(&self) -> StateVector {
        let carried: BTreeSet<OpId> = self.ops.iter().map(Op::id).collect();
        self.ops
            .iter()
            .flat_map(Op::dependencies)
            .filter(|dep| !carried.contains(dep))
            .map(|dep| (dep.peer, dep.clock))
            .collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        wire::to_bytes(self)
    }

    /// Decode and check the shape of every op. References are resolved
    /// later, against a document.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let update: Self = wire::from_bytes(bytes)?;
        update.ops.iter().try_for_each(check_shape)?;
        Ok(update)
    }
}

fn check_shape(op: &Op) -> Result<(), CodecError> {
    let references: &[ElementId] = match op {
        Op::Insert { content, .. } if content.is_empty() => {
            return Err(CodecError::Empty { what: "insert content" })
        }
        Op::Insert { after, .. } => after.as_slice(),
        Op::Delete { targets, .. } if targets.is_empty() => {
            return Err(CodecError::Empty { what: "delete targets" })
        }
        Op::Delete { targets, .. } => targets.as_slice(),
    };
    if op.id().clock == 0 || references.iter().any(|target| target.op.clock == 0) {
        return Err(CodecError::ZeroClock);
    }
    Ok(())
}

impl StateVector {
    pub fn encode(&self) -> Vec<u8> {
        wire::to_bytes(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let vector: Self = wire::from_bytes(bytes)?;
        if vector.iter().any(|(_, clock)| clock == 0) {
            return Err(CodecError::ZeroClock);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_id(peer: u64, clock: u64) -> OpId {
        OpId::new(PeerId(peer), clock)
    }

    fn sample_update() -> Update {
        Update::new(
            PeerId(1),
            vec![
                Op::Insert { id: op_id(1, 3), lamport: 7, after: None, content: "héllo".to_string() },
                Op::Insert {
                    id: op_id(1, 4),
                    lamport: 12,
                    after: Some(ElementId::new(op_id(2, 1), 0)),
                    content: "x".to_string(),
                },
                Op::Delete {
                    id: op_id(1, 5),
                    lamport: 13,
                    targets: vec![ElementId::new(op_id(1, 3), 1), ElementId::new(op_id(2, 2), 0)],
                },
            ],
        )
    }

    #[test]
    fn update_encoding_roundtrips() {
        let update = sample_update();
        let decoded = Update::decode(&update.encode()).expect("encoded update should decode");
        assert_eq!(decoded, update);
    }

    #[test]
    fn state_vector_encoding_roundtrips() {
        let vector: StateVector = [(PeerId(1), 3), (PeerId(300), 1)].into_iter().collect();
        let decoded = StateVector::decode(&vector.encode()).expect("state vector should decode");
        assert_eq!(decoded, vector);
    }

    #[test]
    fn dependencies_skip_ops_carried_in_the_update() {
        let deps = sample_update().dependencies();
        // 1:2 precedes the first op; 2:1 and 2:2 are referenced but not carried.
        assert_eq!(deps.get(PeerId(1)), 2);
        assert_eq!(deps.get(PeerId(2)), 2);
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn first_op_from_a_peer_has_no_self_dependency() {
        let update = Update::new(
            PeerId(4),
            vec![Op::Insert { id: op_id(4, 1), lamport: 1, after: None, content: "a".to_string() }],
        );
        assert!(update.dependencies().is_empty());
    }

    #[test]
    fn last_lamport_spans_the_inserted_characters() {
        let op = Op::Insert { id: op_id(1, 1), lamport: 10, after: None, content: "abc".to_string() };
        assert_eq!(op.last_lamport(), Some(12));
    }

    #[test]
    fn last_lamport_past_u64_max_is_none() {
        let op = Op::Insert { id: op_id(1, 1), lamport: u64::MAX, after: None, content: "ab".to_string() };
        assert_eq!(op.last_lamport(), None);
    }

    #[test]
    fn truncated_update_is_rejected() {
        let bytes = sample_update().encode();
        let error = Update::decode(&bytes[..bytes.len() - 1]).expect_err("truncated update should fail");
        assert!(matches!(error, CodecError::Postcard(_)));
    }

    #[test]
    fn unknown_op_variant_is_rejected() {
        // origin 1, one op, variant index 9
        let error = Update::decode(&[1, 1, 9, 1, 1, 1]).expect_err("unknown variant should fail");
        assert!(matches!(error, CodecError::Postcard(_)));
    }

    #[test]
    fn zero_clock_is_rejected() {
        let update = Update::new(
            PeerId(1),
            vec![Op::Insert { id: op_id(1, 0), lamport: 1, after: None, content: "a".to_string() }],
        );
        assert_eq!(Update::decode(&update.encode()), Err(CodecError::ZeroClock));
    }

    #[test]
    fn zero_clock_reference_is_rejected() {
        let update = Update::new(
            PeerId(1),
            vec![Op::Delete { id: op_id(1, 1), lamport: 1, targets: vec![ElementId::new(op_id(2, 0), 0)] }],
        );
        assert_eq!(Update::decode(&update.encode()), Err(CodecError::ZeroClock));
    }

    #[test]
    fn empty_delete_targets_are_rejected() {
        let update =
            Update::new(PeerId(1), vec![Op::Delete { id: op_id(1, 1), lamport: 1, targets: Vec::new() }]);
        assert_eq!(Update::decode(&update.encode()), Err(CodecError::Empty { what: "delete targets" }));
    }

    #[test]
    fn state_vector_with_zero_clock_is_rejected() {
        // one entry: peer 4, clock 0
        assert_eq!(StateVector::decode(&[1, 4, 0]), Err(CodecError::ZeroClock));
    }

    #[test]
    fn empty_insert_content_is_rejected() {
        let update = Update::new(
            PeerId(1),
            vec![Op::Insert { id: op_id(1, 1), lamport: 1, after: None, content: String::new() }],
        );
        assert_eq!(
            Update::decode(&update.encode()),
            Err(CodecError::Empty { what: "insert content" })
        );
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut bytes = sample_update().encode();
        bytes.push(0);
        assert_eq!(Update::decode(&bytes), Err(CodecError::TrailingBytes { count: 1 }));
    }
}
