// Ephemeral presence records (user, cursor) with per-peer clocks and expiry.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crdt::wire::{self, CodecError};
use crate::crdt::PeerId;

pub const DEFAULT_AWARENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a holder of an [`AwarenessChannel`] should sweep it: a tenth of
/// the timeout, at most one second, so expiry lags the timeout only slightly.
pub fn sweep_interval(timeout: Duration) -> Duration {
    (timeout / 10).clamp(Duration::from_millis(10), Duration::from_secs(1))
}

#[derive(Debug, Error)]
pub enum AwarenessError {
    #[error("malformed awareness payload: {0}")]
    Decode(#[from] CodecError),
    #[error("awareness state for peer {peer} is not valid presence json: {source}")]
    InvalidState {
        peer: PeerId,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Created the room.
    Owner,
    #[default]
    Participant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("owner"),
            Self::Participant => f.write_str("participant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUser {
    pub name: String,
    /// CSS-style color, e.g. `#e91e63`.
    pub color: String,
    #[serde(default)]
    pub role: Role,
}

/// Selection in visible character offsets. `anchor == head` is a caret.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorRange {
    pub anchor: usize,
    pub head: usize,
}

impl CursorRange {
    pub fn caret(at: usize) -> Self {
        Self { anchor: at, head: at }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceState {
    pub user: PresenceUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorRange>,
}

/// One peer's presence at a given clock. `state: None` is an explicit leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwarenessEntry {
    pub peer: PeerId,
    pub clock: u64,
    pub state: Option<PresenceState>,
}

impl AwarenessEntry {
    pub fn leave(peer: PeerId, clock: u64) -> Self {
        Self { peer, clock, state: None }
    }

    pub fn is_leave(&self) -> bool {
        self.state.is_none()
    }
}

#[derive(Debug, Clone)]
struct Record {
    clock: u64,
    state: Option<PresenceState>,
    updated_at: Instant,
}

/// Last-writer-wins presence table keyed by peer.
///
/// Time is passed in by the caller so the table stays runtime-agnostic.
#[derive(Debug, Clone)]
pub struct AwarenessChannel {
    timeout: Duration,
    records: HashMap<PeerId, Record>,
    /// Clock of peers removed by sweep, so reordered stale entries cannot
    /// bring them back.
    departed: HashMap<PeerId, u64>,
}

impl Default for AwarenessChannel {
    fn default() -> Self {
        Self::new(DEFAULT_AWARENESS_TIMEOUT)
    }
}

impl AwarenessChannel {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, records: HashMap::new(), departed: HashMap::new() }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Highest clock known for `peer`, including peers that already left.
    pub fn clock_of(&self, peer: PeerId) -> Option<u64> {
        self.records
            .get(&peer)
            .map(|record| record.clock)
            .or_else(|| self.departed.get(&peer).copied())
    }

    /// Store `entry` if its clock is strictly newer than what is known for
    /// that peer. Returns whether anything changed.
    pub fn publish(&mut self, entry: AwarenessEntry, now: Instant) -> bool {
        if self.clock_of(entry.peer).is_some_and(|known| entry.clock <= known) {
            return false;
        }
        self.departed.remove(&entry.peer);
        self.records.insert(
            entry.peer,
            Record { clock: entry.clock, state: entry.state, updated_at: now },
        );
        true
    }

    /// Drop expired records and explicit leaves. Returns the removed peers.
    pub fn sweep(&mut self, now: Instant) -> Vec<PeerId> {
        let mut removed: Vec<PeerId> = self
            .records
            .iter()
            .filter(|(_, record)| record.state.is_none() || self.is_expired(record, now))
            .map(|(peer, _)| *peer)
            .collect();
        removed.sort();
        for peer in &removed {
            if let Some(record) = self.records.remove(peer) {
                self.departed.insert(*peer, record.clock);
            }
        }
        removed
    }

    /// Force peers out (their connection dropped). Returns the leave entries
    /// to broadcast, one per peer that had a record.
    pub fn remove_peers(&mut self, peers: &[PeerId], now: Instant) -> Vec<AwarenessEntry> {
        let mut leaves = Vec::new();
        for peer in peers {
            let Some(known) = self.records.get(peer).map(|record| record.clock) else {
                continue;
            };
            let leave = AwarenessEntry::leave(*peer, known + 1);
            self.publish(leave.clone(), now);
            leaves.push(leave);
        }
        leaves
    }

    pub fn get(&self, peer: PeerId) -> Option<&PresenceState> {
        self.records.get(&peer).and_then(|record| record.state.as_ref())
    }

    /// Every live (non-leave) entry, ordered by peer id.
    pub fn entries(&self) -> Vec<AwarenessEntry> {
        self.collect_entries(|_| true)
    }

    /// [`AwarenessChannel::entries`] minus records that expired by `now` but
    /// were not swept yet.
    pub fn entries_at(&self, now: Instant) -> Vec<AwarenessEntry> {
        self.collect_entries(|record| !self.is_expired(record, now))
    }

    fn is_expired(&self, record: &Record, now: Instant) -> bool {
        now.saturating_duration_since(record.updated_at) >= self.timeout
    }

    fn collect_entries(&self, keep: impl Fn(&Record) -> bool) -> Vec<AwarenessEntry> {
        let mut entries: Vec<AwarenessEntry> = self
            .records
            .iter()
            .filter(|(_, record)| record.state.is_some() && keep(record))
            .map(|(peer, record)| AwarenessEntry {
                peer: *peer,
                clock: record.clock,
                state: record.state.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.peer);
        entries
    }

    pub fn len(&self) -> usize {
        self.records.values().filter(|record| record.state.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On the wire each entry carries its presence as JSON text, `None` for a
/// leave, so presence fields can grow without changing the binary layout.
#[derive(Serialize, Deserialize)]
struct WireEntry {
    peer: PeerId,
    clock: u64,
    state: Option<String>,
}

pub fn encode_entries(entries: &[AwarenessEntry]) -> Vec<u8> {
    let records: Vec<WireEntry> = entries
        .iter()
        .map(|entry| WireEntry {
            peer: entry.peer,
            clock: entry.clock,
            state: entry.state.as_ref().and_then(|state| serde_json::to_string(state).ok()),
        })
        .collect();
    wire::to_bytes(&records)
}

pub fn decode_entries(bytes: &[u8]) -> Result<Vec<AwarenessEntry>, AwarenessError> {
    let records: Vec<WireEntry> = wire::from_bytes(bytes)?;
    records
        .into_iter()
        .map(|entry| {
            let state: Option<PresenceState> = entry
                .state
                .map(|json| serde_json::from_str(&json))
                .transpose()
                .map_err(|source| AwarenessError::InvalidState { peer: entry.peer, source })?;
            Ok(AwarenessEntry { peer: entry.peer, clock: entry.clock, state })
        })
        .collect()
}
