use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{debug, warn};

use super::ids::{ElementId, OpId, PeerId, Priority};
use super::state_vector::StateVector;
use super::update::{Op, Update, MAX_LAMPORT};
use super::wire::CodecError;
use crate::types::{EditOp, TextChange};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("range {index}..{end} is outside the document (length {len})")]
    OutOfRange { index: usize, end: usize, len: usize },
    #[error("element {0} is not part of this document")]
    UnknownElement(ElementId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("malformed update: {0}")]
    Decode(#[from] CodecError),
    #[error("op {op} references {target}, which is not a character of an insert")]
    InvalidReference { op: OpId, target: ElementId },
    #[error("op {op} has Lamport timestamp {lamport}, past the limit of {max}", max = MAX_LAMPORT)]
    LamportOutOfRange { op: OpId, lamport: u64 },
}

/// Ops held back for missing dependencies before the ones furthest from
/// ready are shed.
pub const DEFAULT_PENDING_LIMIT: usize = 4_096;

#[derive(Debug, Clone)]
struct Element {
    id: ElementId,
    lamport: u64,
    /// `None` once garbage collection dropped a tombstone's character. The
    /// element stays as a zero-width marker so later inserts still anchor
    /// and order against it.
    ch: Option<char>,
    deleted_by: Option<OpId>,
}

impl Element {
    fn priority(&self) -> Priority {
        Priority { lamport: self.lamport, peer: self.id.peer() }
    }

    fn is_live(&self) -> bool {
        self.deleted_by.is_none()
    }

    fn is_collectable(&self, floor: &StateVector) -> bool {
        self.ch.is_some() && self.deleted_by.is_some_and(|deleted_by| floor.contains(deleted_by))
    }
}

/// Replicated text: an RGA sequence of characters with tombstones.
///
/// All mutation goes through local edits (which produce an [`Update`]) or
/// [`Document::apply_update`]. Merging is commutative and idempotent; ops
/// that arrive before their dependencies wait in a pending set.
#[derive(Debug, Clone)]
pub struct Document {
    peer: PeerId,
    lamport: u64,
    elements: Vec<Element>,
    state_vector: StateVector,
    log: BTreeMap<PeerId, Vec<Op>>,
    pending: BTreeMap<OpId, Op>,
    pending_limit: usize,
}

impl Document {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            lamport: 0,
            elements: Vec::new(),
            state_vector: StateVector::new(),
            log: BTreeMap::new(),
            pending: BTreeMap::new(),
            pending_limit: DEFAULT_PENDING_LIMIT,
        }
    }

    /// Cap the number of ops held back for missing dependencies.
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn text(&self) -> String {
        self.elements.iter().filter(|el| el.is_live()).filter_map(|el| el.ch).collect()
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.elements.iter().filter(|el| el.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state_vector(&self) -> StateVector {
        self.state_vector.clone()
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.state_vector.encode()
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    /// Ops received whose dependencies have not arrived yet.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Deleted characters whose content has not been collected yet.
    pub fn tombstone_count(&self) -> usize {
        self.elements.iter().filter(|el| !el.is_live() && el.ch.is_some()).count()
    }

    /// Id of the visible character at `index`.
    pub fn element_at(&self, index: usize) -> Option<ElementId> {
        self.elements.iter().filter(|el| el.is_live()).nth(index).map(|el| el.id)
    }

    pub fn local_edit(&mut self, edit: &EditOp) -> Result<Update, EditError> {
        match edit {
            EditOp::Insert { index, text } => self.insert(*index, text),
            EditOp::Delete { index, len } => self.delete(*index, *len),
            EditOp::Replace { index, len, text } => self.replace(*index, *len, text),
        }
    }

    pub fn insert(&mut self, index: usize, text: &str) -> Result<Update, EditError> {
        self.check_range(index, 0)?;
        if text.is_empty() {
            return Ok(Update::empty(self.peer));
        }
        let after = match index {
            0 => None,
            _ => self.element_at(index - 1),
        };
        let op = Op::Insert {
            id: self.next_op_id(),
            lamport: self.next_lamport(),
            after,
            content: text.to_string(),
        };
        self.integrate(&op);
        Ok(Update::new(self.peer, vec![op]))
    }

    pub fn delete(&mut self, index: usize, len: usize) -> Result<Update, EditError> {
        self.check_range(index, len)?;
        let targets: Vec<ElementId> = self
            .elements
            .iter()
            .filter(|el| el.is_live())
            .skip(index)
            .take(len)
            .map(|el| el.id)
            .collect();
        self.delete_elements(&targets)
    }

    pub fn replace(&mut self, index: usize, len: usize, text: &str) -> Result<Update, EditError> {
        self.check_range(index, len)?;
        let mut ops = self.delete(index, len)?.ops;
        ops.extend(self.insert(index, text)?.ops);
        Ok(Update::new(self.peer, ops))
    }

    /// Tombstone specific elements by id. Already-deleted targets are allowed.
    pub fn delete_elements(&mut self, targets: &[ElementId]) -> Result<Update, EditError> {
        if let Some(unknown) = targets
            .iter()
            .find(|target| self.position(**target).is_none())
        {
            return Err(EditError::UnknownElement(*unknown));
        }
        if targets.is_empty() {
            return Ok(Update::empty(self.peer));
        }
        let op = Op::Delete {
            id: self.next_op_id(),
            lamport: self.next_lamport(),
            targets: targets.to_vec(),
        };
        self.integrate(&op);
        Ok(Update::new(self.peer, vec![op]))
    }

    /// Merge a remote update and report the visible changes it caused.
    ///
    /// Duplicate ops are ignored. Ops with missing dependencies are buffered
    /// and integrated (possibly by a later call) once those arrive.
    pub fn apply_update(&mut self, update: &Update) -> Vec<TextChange> {
        for op in &update.ops {
            let id = op.id();
            if self.state_vector.contains(id) || self.pending.contains_key(&id) {
                continue;
            }
            self.pending.insert(id, op.clone());
        }
        let mut changes = Vec::new();
        self.drain_pending(&mut changes);
        if !self.pending.is_empty() {
            debug!(peer = %self.peer, pending = self.pending.len(), "ops waiting on dependencies");
            self.shed_pending();
        }
        changes
    }

    /// Decode, validate, and merge an encoded update. On error the document
    /// is left untouched.
    pub fn apply_update_bytes(&mut self, bytes: &[u8]) -> Result<Vec<TextChange>, MergeError> {
        let update = Update::decode(bytes)?;
        self.try_apply_update(&update)
    }

    /// [`Document::apply_update`] for untrusted input: references that are
    /// provably bogus reject the whole update before anything is merged.
    pub fn try_apply_update(&mut self, update: &Update) -> Result<Vec<TextChange>, MergeError> {
        self.validate(update)?;
        Ok(self.apply_update(update))
    }

    /// Every integrated op the holder of `since` has not seen, in causal order.
    pub fn update_since(&self, since: &StateVector) -> Update {
        let mut ops: Vec<Op> = self
            .log
            .iter()
            .flat_map(|(peer, ops)| {
                let seen = since.get(*peer).min(ops.len() as u64) as usize;
                ops[seen..].iter().cloned()
            })
            .collect();
        ops.sort_by_key(|op| (op.lamport(), op.id().peer));
        Update::new(self.peer, ops)
    }

    pub fn encode_update_since(&self, since: &StateVector) -> Vec<u8> {
        self.update_since(since).encode()
    }

    /// Drop the characters of tombstones whose delete op is covered by
    /// `floor`. Ids and timestamps stay in the sequence, so a replica that
    /// collected converges with one that did not. Returns how many
    /// tombstones were collected.
    pub fn collect_garbage(&mut self, floor: &StateVector) -> usize {
        let mut collected = 0;
        for element in self.elements.iter_mut().filter(|el| el.is_collectable(floor)) {
            element.ch = None;
            collected += 1;
        }
        collected
    }

    fn next_lamport(&self) -> u64 {
        self.lamport.saturating_add(1)
    }

    fn next_op_id(&self) -> OpId {
        OpId::new(self.peer, self.state_vector.get(self.peer) + 1)
    }

    fn check_range(&self, index: usize, len: usize) -> Result<(), EditError> {
        let visible = self.len();
        let end = index.saturating_add(len);
        if end > visible {
            return Err(EditError::OutOfRange { index, end, len: visible });
        }
        Ok(())
    }

    fn position(&self, id: ElementId) -> Option<usize> {
        self.elements.iter().position(|el| el.id == id)
    }

    fn visible_index(&self, position: usize) -> usize {
        self.elements[..position].iter().filter(|el| el.is_live()).count()
    }

    /// Where the element after `anchor` begins its search: `Ok(index)` into
    /// `elements`, or the anchor that does not resolve.
    fn anchor_slot(&self, anchor: Option<ElementId>) -> Result<usize, ElementId> {
        match anchor {
            None => Ok(0),
            Some(id) => self.position(id).map(|position| position + 1).ok_or(id),
        }
    }

    /// Keep the pending buffer bounded. Ops furthest ahead of their author's
    /// integrated clock go first; a later resync delivers them again.
    fn shed_pending(&mut self) {
        let excess = self.pending.len().saturating_sub(self.pending_limit);
        if excess == 0 {
            return;
        }
        let mut by_gap: Vec<(u64, OpId)> = self
            .pending
            .keys()
            .map(|id| (id.clock.saturating_sub(self.state_vector.get(id.peer)), *id))
            .collect();
        by_gap.sort_unstable_by(|a, b| b.cmp(a));
        for (_, id) in by_gap.into_iter().take(excess) {
            self.pending.remove(&id);
        }
        warn!(peer = %self.peer, dropped = excess, limit = self.pending_limit, "pending ops over limit; dropped");
    }

    fn is_ready(&self, op: &Op) -> bool {
        let id = op.id();
        id.clock == self.state_vector.get(id.peer) + 1
            && op.dependencies().iter().all(|dep| self.state_vector.contains(*dep))
    }

    fn drain_pending(&mut self, changes: &mut Vec<TextChange>) {
        loop {
            let ready = self.pending.values().find(|op| self.is_ready(op)).map(Op::id);
            let Some(id) = ready else { break };
            if let Some(op) = self.pending.remove(&id) {
                changes.extend(self.integrate(&op));
            }
        }
    }

    fn integrate(&mut self, op: &Op) -> Vec<TextChange> {
        let changes = match op {
            Op::Insert { id, lamport, after, content } => self.integrate_insert(*id, *lamport, *after, content),
            Op::Delete { id, targets, .. } => self.integrate_delete(*id, targets),
        };
        let id = op.id();
        self.log.entry(id.peer).or_default().push(op.clone());
        self.state_vector.set(id.peer, id.clock);
        self.lamport = self.lamport.max(op.last_lamport().unwrap_or(MAX_LAMPORT));
        changes
    }

    fn integrate_insert(
        &mut self,
        id: OpId,
        lamport: u64,
        after: Option<ElementId>,
        content: &str,
    ) -> Vec<TextChange> {
        let mut slot = match self.anchor_slot(after) {
            Ok(slot) => slot,
            Err(missing) => {
                warn!(op = %id, anchor = %missing, "insert anchor does not resolve; placing at start");
                0
            }
        };
        let first = Priority { lamport, peer: id.peer };
        while slot < self.elements.len() && self.elements[slot].priority() > first {
            slot += 1;
        }
        // Later characters of the run have strictly higher priority than
        // anything the first one stopped at, so the run stays contiguous.
        let run = content.chars().enumerate().map(|(offset, ch)| Element {
            id: ElementId::new(id, offset as u32),
            lamport: lamport.saturating_add(offset as u64),
            ch: Some(ch),
            deleted_by: None,
        });
        self.elements.splice(slot..slot, run);
        vec![TextChange::Insert { index: self.visible_index(slot), text: content.to_string() }]
    }

    fn integrate_delete(&mut self, id: OpId, targets: &[ElementId]) -> Vec<TextChange> {
        let mut changes: Vec<TextChange> = Vec::new();
        for target in targets {
            let Some(position) = self.position(*target) else {
                warn!(op = %id, target = %target, "delete target does not exist; ignoring");
                continue;
            };
            if !self.elements[position].is_live() {
                continue;
            }
            let index = self.visible_index(position);
            self.elements[position].deleted_by = Some(id);
            match changes.last_mut() {
                Some(TextChange::Delete { index: last, len }) if *last == index => *len += 1,
                Some(TextChange::Delete { index: last, len }) if index + 1 == *last => {
                    *last = index;
                    *len += 1;
                }
                _ => changes.push(TextChange::Delete { index, len: 1 }),
            }
        }
        changes
    }

    /// Reject updates whose references can already be shown to be bogus, or
    /// whose timestamps would push the Lamport clock past [`MAX_LAMPORT`].
    fn validate(&self, update: &Update) -> Result<(), MergeError> {
        let carried: HashMap<OpId, &Op> = update.ops.iter().map(|op| (op.id(), op)).collect();
        for op in &update.ops {
            if op.last_lamport().map_or(true, |last| last > MAX_LAMPORT) {
                return Err(MergeError::LamportOutOfRange { op: op.id(), lamport: op.lamport() });
            }
            let references: Vec<ElementId> = match op {
                Op::Insert { after, .. } => after.iter().copied().collect(),
                Op::Delete { targets, .. } => targets.clone(),
            };
            for target in references {
                let defining = carried
                    .get(&target.op)
                    .copied()
                    .or_else(|| self.pending.get(&target.op))
                    .or_else(|| self.logged_op(target.op));
                let Some(defining) = defining else { continue };
                if (target.offset as usize) >= defining.char_len() {
                    return Err(MergeError::InvalidReference { op: op.id(), target });
                }
            }
        }
        Ok(())
    }

    fn logged_op(&self, id: OpId) -> Option<&Op> {
        let index = usize::try_from(id.clock.checked_sub(1)?).ok()?;
        self.log.get(&id.peer)?.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync(from: &Document, to: &mut Document) {
        let diff = from.update_since(&to.state_vector());
        to.apply_update(&diff);
    }

    #[test]
    fn local_insert_and_delete_edit_the_text() {
        let mut doc = Document::new(PeerId(1));
        doc.insert(0, "hello").expect("insert at start should succeed");
        doc.insert(5, " world").expect("append should succeed");
        doc.delete(0, 1).expect("delete first char should succeed");
        assert_eq!(doc.text(), "ello world");
        assert_eq!(doc.state_vector().get(PeerId(1)), 3);
        assert_eq!(doc.tombstone_count(), 1);
    }

    #[test]
    fn replace_is_one_update_with_two_ops() {
        let mut doc = Document::new(PeerId(1));
        doc.insert(0, "cat").expect("insert should succeed");
        let update = doc.replace(0, 1, "b").expect("replace should succeed");
        assert_eq!(update.ops.len(), 2);
        assert_eq!(doc.text(), "bat");
    }

    #[test]
    fn out_of_range_edits_are_errors() {
        let mut doc = Document::new(PeerId(1));
        doc.insert(0, "ab").expect("insert should succeed");
        assert_eq!(
            doc.insert(3, "x").expect_err("insert past end should fail"),
            EditError::OutOfRange { index: 3, end: 3, len: 2 }
        );
        assert!(doc.delete(1, 2).is_err());
        assert!(doc.replace(2, 1, "z").is_err());
        assert_eq!(doc.text(), "ab");
        assert_eq!(doc.state_vector().get(PeerId(1)), 1);
    }

    #[test]
    fn empty_edits_consume_no_clock() {
        let mut doc = Document::new(PeerId(1));
        assert!(doc.insert(0, "").expect("empty insert is allowed").is_empty());
        assert!(doc.delete(0, 0).expect("empty delete is allowed").is_empty());
        assert!(doc.state_vector().is_empty());
    }

    #[test]
    fn concurrent_inserts_at_start_order_by_peer_id() {
        let mut a = Document::new(PeerId(1));
        let mut b = Document::new(PeerId(2));
        let from_a = a.insert(0, "hello").expect("insert should succeed");
        let from_b = b.insert(0, "world").expect("insert should succeed");

        a.apply_update(&from_b);
        b.apply_update(&from_a);

        assert_eq!(a.text(), "helloworld");
        assert_eq!(b.text(), "helloworld");
    }

    #[test]
    fn newer_insert_at_same_anchor_lands_first() {
        let mut a = Document::new(PeerId(2));
        a.insert(0, "x").expect("insert should succeed");
        let mut b = Document::new(PeerId(1));
        sync(&a, &mut b);

        // Both type after x; a made one more edit first, so its insert is newer.
        b.insert(1, "1").expect("insert should succeed");
        a.insert(0, "y").expect("insert should succeed");
        a.insert(2, "2").expect("insert should succeed");
        sync(&a, &mut b);
        sync(&b, &mut a);
        assert_eq!(a.text(), b.text());
        assert_eq!(a.text(), "yx21");
    }

    #[test]
    fn remote_changes_report_visible_indices() {
        let mut a = Document::new(PeerId(1));
        let mut b = Document::new(PeerId(2));
        let first = a.insert(0, "abcdef").expect("insert should succeed");
        assert_eq!(
            b.apply_update(&first),
            vec![TextChange::Insert { index: 0, text: "abcdef".to_string() }]
        );

        let removal = a.delete(1, 3).expect("delete should succeed");
        assert_eq!(b.apply_update(&removal), vec![TextChange::Delete { index: 1, len: 3 }]);

        let tail = a.insert(3, "!").expect("insert should succeed");
        assert_eq!(b.apply_update(&tail), vec![TextChange::Insert { index: 3, text: "!".to_string() }]);
        assert_eq!(b.text(), "aef!");
    }

    #[test]
    fn reapplying_an_update_changes_nothing() {
        let mut a = Document::new(PeerId(1));
        let mut b = Document::new(PeerId(2));
        let update = a.insert(0, "once").expect("insert should succeed");
        b.apply_update(&update);
        assert!(b.apply_update(&update).is_empty());
        assert_eq!(b.text(), "once");
    }

    #[test]
    fn out_of_order_ops_wait_for_dependencies() {
        let mut a = Document::new(PeerId(1));
        let first = a.insert(0, "ab").expect("insert should succeed");
        let second = a.insert(2, "cd").expect("insert should succeed");
        let third = a.delete(0, 1).expect("delete should succeed");

        let mut b = Document::new(PeerId(2));
        b.apply_update(&third);
        b.apply_update(&second);
        assert_eq!(b.text(), "");
        assert_eq!(b.pending_count(), 2);
        assert!(b.state_vector().is_empty());

        b.apply_update(&first);
        assert_eq!(b.text(), "bcd");
        assert_eq!(b.pending_count(), 0);
        assert_eq!(b.state_vector(), a.state_vector());
    }

    #[test]
    fn resync_sends_exactly_the_missing_ops() {
        let (pa, pb) = (PeerId(1), PeerId(2));
        let mut a = Document::new(pa);
        let mut b = Document::new(pb);
        let mut full = Document::new(PeerId(3));

        for doc_index in 0..3 {
            let update = a.insert(doc_index, "a").expect("insert should succeed");
            full.apply_update(&update);
            let update = b.insert(doc_index, "b").expect("insert should succeed");
            full.apply_update(&update);
        }
        let reconnecting: StateVector = [(pa, 2), (pb, 1)].into_iter().collect();

        let diff = full.update_since(&reconnecting);
        let mut ids: Vec<OpId> = diff.ops.iter().map(Op::id).collect();
        ids.sort();
        assert_eq!(ids, vec![OpId::new(pa, 3), OpId::new(pb, 2), OpId::new(pb, 3)]);
    }

    #[test]
    fn update_bytes_with_bad_reference_leave_document_untouched() {
        let mut a = Document::new(PeerId(1));
        let base = a.insert(0, "ab").expect("insert should succeed");
        let mut b = Document::new(PeerId(2));
        b.apply_update(&base);

        let bogus = Update::new(
            PeerId(1),
            vec![Op::Delete {
                id: OpId::new(PeerId(1), 2),
                lamport: 3,
                targets: vec![ElementId::new(OpId::new(PeerId(1), 1), 9)],
            }],
        );
        let error = b.apply_update_bytes(&bogus.encode()).expect_err("bad offset should be rejected");
        assert!(matches!(error, MergeError::InvalidReference { .. }));
        assert_eq!(b.text(), "ab");
        assert_eq!(b.state_vector().get(PeerId(1)), 1);
    }

    #[test]
    fn lamport_past_the_limit_is_rejected() {
        let mut doc = Document::new(PeerId(1));
        let insert = |lamport: u64| {
            Update::new(
                PeerId(2),
                vec![Op::Insert { id: OpId::new(PeerId(2), 1), lamport, after: None, content: "ab".to_string() }],
            )
        };

        let error = doc.apply_update_bytes(&insert(u64::MAX).encode()).expect_err("overflow should be rejected");
        assert!(matches!(error, MergeError::LamportOutOfRange { lamport: u64::MAX, .. }));
        let error = doc.try_apply_update(&insert(MAX_LAMPORT)).expect_err("run past the limit should be rejected");
        assert!(matches!(error, MergeError::LamportOutOfRange { .. }));
        assert!(doc.state_vector().is_empty());
        assert_eq!(doc.lamport(), 0);

        doc.try_apply_update(&insert(MAX_LAMPORT - 1)).expect("run ending at the limit should merge");
        assert_eq!(doc.lamport(), MAX_LAMPORT);
        let local = doc.insert(2, "c").expect("local insert should succeed");
        assert_eq!(local.ops[0].lamport(), MAX_LAMPORT + 1);
        assert_eq!(doc.text(), "abc");
    }

    #[test]
    fn pending_buffer_sheds_ops_furthest_from_ready() {
        let mut a = Document::new(PeerId(1));
        let updates: Vec<Update> =
            (0..5).map(|index| a.insert(index, "x").expect("insert should succeed")).collect();

        let mut b = Document::new(PeerId(2)).with_pending_limit(2);
        for update in updates[1..].iter().rev() {
            b.apply_update(update);
        }
        assert_eq!(b.pending_count(), 2);

        b.apply_update(&updates[0]);
        assert_eq!(b.state_vector().get(PeerId(1)), 3);
        assert_eq!(b.pending_count(), 0);
        sync(&a, &mut b);
        assert_eq!(b.text(), "xxxxx");
    }

    #[test]
    fn garbage_bytes_are_a_merge_error() {
        let mut doc = Document::new(PeerId(1));
        assert!(matches!(doc.apply_update_bytes(&[0xff]), Err(MergeError::Decode(_))));
        assert!(doc.state_vector().is_empty());
    }

    #[test]
    fn gc_collects_only_covered_tombstones() {
        let mut a = Document::new(PeerId(1));
        a.insert(0, "abc").expect("insert should succeed");
        a.delete(1, 1).expect("delete should succeed");
        let not_yet = a.state_vector();
        a.delete(0, 1).expect("delete should succeed");

        assert_eq!(a.collect_garbage(&not_yet), 1);
        assert_eq!(a.tombstone_count(), 1);
        assert_eq!(a.collect_garbage(&a.state_vector()), 1);
        assert_eq!(a.tombstone_count(), 0);
        assert_eq!(a.collect_garbage(&a.state_vector()), 0, "collected markers are not collected twice");
        assert_eq!(a.text(), "c");
    }

    #[test]
    fn collected_tombstone_still_orders_late_inserts() {
        let mut author = Document::new(PeerId(1));
        author.insert(0, "pb").expect("insert should succeed");
        let mut keeper = Document::new(PeerId(2));
        let mut offline = Document::new(PeerId(3));
        sync(&author, &mut keeper);
        sync(&author, &mut offline);

        // The offline peer's clock runs ahead before it types after `b`.
        offline.insert(2, "scratch").expect("insert should succeed");
        offline.delete(2, 7).expect("delete should succeed");
        offline.insert(2, "Q").expect("insert should succeed");
        let late = offline.update_since(&author.state_vector());

        let mut relay = Document::new(PeerId::RELAY);
        author.delete(1, 1).expect("delete should succeed");
        sync(&author, &mut relay);
        assert_eq!(relay.collect_garbage(&relay.state_vector()), 1);
        author.insert(1, "N").expect("insert should succeed");

        for replica in [&mut relay, &mut keeper] {
            sync(&author, replica);
            replica.apply_update(&late);
        }
        assert_eq!(keeper.text(), "pNQ");
        assert_eq!(relay.text(), keeper.text());
    }

    #[test]
    fn collected_tombstone_is_still_a_valid_anchor() {
        let mut a = Document::new(PeerId(1));
        a.insert(0, "abc").expect("insert should succeed");
        let mut offline = Document::new(PeerId(2));
        sync(&a, &mut offline);
        let late = offline.insert(2, "X").expect("insert should succeed");

        a.delete(1, 1).expect("delete should succeed");
        let mut uncollected = a.clone();
        a.collect_garbage(&a.state_vector());
        uncollected.apply_update(&late);
        a.apply_update(&late);
        assert_eq!(a.text(), "aXc");
        assert_eq!(a.text(), uncollected.text());
    }

    #[test]
    fn delete_of_collected_element_is_a_noop() {
        let mut a = Document::new(PeerId(1));
        a.insert(0, "ab").expect("insert should succeed");
        let mut b = Document::new(PeerId(2));
        sync(&a, &mut b);
        let concurrent = b.delete(0, 1).expect("delete should succeed");

        a.delete(0, 1).expect("delete should succeed");
        a.collect_garbage(&a.state_vector());
        assert!(a.apply_update(&concurrent).is_empty());
        assert_eq!(a.text(), "b");
        assert_eq!(a.state_vector().get(PeerId(2)), 1);
    }

    #[test]
    fn late_joiner_gets_full_history_after_gc() {
        let mut a = Document::new(PeerId(1));
        a.insert(0, "hello").expect("insert should succeed");
        a.delete(0, 2).expect("delete should succeed");
        a.collect_garbage(&a.state_vector());

        let mut late = Document::new(PeerId(2));
        sync(&a, &mut late);
        assert_eq!(late.text(), "llo");
        assert_eq!(late.state_vector(), a.state_vector());
    }
}
