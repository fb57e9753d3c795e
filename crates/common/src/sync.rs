// Per-connection handshake state machine.
//
// Client: open -> send SYNC_STEP1(vector). Server answers SYNC_STEP2(diff)
// then its own SYNC_STEP1(vector); the client applies the diff, replies
// SYNC_STEP2(what the server lacks), and both sides are synced.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{MessageType, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Client,
    Server,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Connecting,
    SyncStep1,
    SyncStep2,
    Synced,
    Closed,
}

impl SyncState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::SyncStep1 | Self::SyncStep2 | Self::Synced)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::SyncStep1 => "sync_step1",
            Self::SyncStep2 => "sync_step2",
            Self::Synced => "synced",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Validates inbound frames against the handshake state for one side of a
/// connection. A machine is never reused: reconnecting starts a new one.
#[derive(Debug, Clone)]
pub struct SyncMachine {
    side: Side,
    state: SyncState,
}

impl SyncMachine {
    pub fn new(side: Side) -> Self {
        Self { side, state: SyncState::Connecting }
    }

    pub fn client() -> Self {
        Self::new(Side::Client)
    }

    pub fn server() -> Self {
        Self::new(Side::Server)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    /// Transport is up. The client now sends SYNC_STEP1; the server waits for it.
    pub fn open(&mut self) -> SyncState {
        if self.state == SyncState::Connecting {
            self.state = SyncState::SyncStep1;
        }
        self.state
    }

    pub fn close(&mut self) {
        self.state = SyncState::Closed;
    }

    /// Check an inbound frame and advance. Returns the state after the frame.
    /// On error the machine closes: the connection must be dropped.
    pub fn on_inbound(&mut self, message: MessageType) -> Result<SyncState, ProtocolError> {
        match self.next_state(message) {
            Some(next) => {
                self.state = next;
                Ok(next)
            }
            None => {
                let error = ProtocolError::UnexpectedFrame { side: self.side, state: self.state, message };
                self.state = SyncState::Closed;
                Err(error)
            }
        }
    }

    fn next_state(&self, message: MessageType) -> Option<SyncState> {
        use MessageType as M;
        use SyncState as S;

        if !self.state.is_open() {
            return None;
        }
        match (self.side, message, self.state) {
            // Presence flows independently of the handshake.
            (_, M::Awareness | M::QueryAwareness, state) => Some(state),
            (_, M::Update, state) => Some(state),

            (Side::Server, M::SyncStep1, S::SyncStep1) => Some(S::SyncStep2),
            (Side::Server, M::SyncStep1, state) => Some(state),
            (Side::Server, M::SyncStep2, S::SyncStep1) => None,
            (Side::Server, M::SyncStep2, _) => Some(S::Synced),

            (Side::Client, M::SyncStep2, S::SyncStep1) => Some(S::SyncStep2),
            (Side::Client, M::SyncStep2, state) => Some(state),
            (Side::Client, M::SyncStep1, S::SyncStep1) => None,
            (Side::Client, M::SyncStep1, _) => Some(S::Synced),
        }
    }
}
