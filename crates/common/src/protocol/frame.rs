use std::fmt;

use thiserror::Error;

use crate::crdt::{CodecError, StateVector};
use crate::sync::{Side, SyncState};

pub const MSG_SYNC_STEP1: u8 = 0;
pub const MSG_SYNC_STEP2: u8 = 1;
pub const MSG_UPDATE: u8 = 2;
pub const MSG_AWARENESS: u8 = 3;
pub const MSG_QUERY_AWARENESS: u8 = 4;

/// Default largest frame accepted by either side.
pub const MAX_FRAME_BYTES: usize = 262_144;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
    #[error("malformed state vector: {0}")]
    MalformedStateVector(CodecError),
    #[error("query awareness carries {0} unexpected payload bytes")]
    UnexpectedPayload(usize),
    #[error("text frames are not part of the protocol")]
    TextFrame,
    #[error("{side} cannot accept {message} while in {state}")]
    UnexpectedFrame { side: Side, state: SyncState, message: MessageType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SyncStep1,
    SyncStep2,
    Update,
    Awareness,
    QueryAwareness,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            Self::SyncStep1 => MSG_SYNC_STEP1,
            Self::SyncStep2 => MSG_SYNC_STEP2,
            Self::Update => MSG_UPDATE,
            Self::Awareness => MSG_AWARENESS,
            Self::QueryAwareness => MSG_QUERY_AWARENESS,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            MSG_SYNC_STEP1 => Ok(Self::SyncStep1),
            MSG_SYNC_STEP2 => Ok(Self::SyncStep2),
            MSG_UPDATE => Ok(Self::Update),
            MSG_AWARENESS => Ok(Self::Awareness),
            MSG_QUERY_AWARENESS => Ok(Self::QueryAwareness),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SyncStep1 => "SYNC_STEP1",
            Self::SyncStep2 => "SYNC_STEP2",
            Self::Update => "UPDATE",
            Self::Awareness => "AWARENESS",
            Self::QueryAwareness => "QUERY_AWARENESS",
        };
        f.write_str(name)
    }
}

/// One binary websocket message. The first byte is the tag; the rest is the
/// payload. Update and awareness payloads stay encoded here: they are
/// validated by the document and the awareness channel, whose failures are
/// not connection-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    SyncStep1(StateVector),
    SyncStep2(Vec<u8>),
    Update(Vec<u8>),
    Awareness(Vec<u8>),
    QueryAwareness,
}

impl Frame {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SyncStep1(_) => MessageType::SyncStep1,
            Self::SyncStep2(_) => MessageType::SyncStep2,
            Self::Update(_) => MessageType::Update,
            Self::Awareness(_) => MessageType::Awareness,
            Self::QueryAwareness => MessageType::QueryAwareness,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let tag = self.message_type().tag();
        match self {
            Self::SyncStep1(vector) => prefixed(tag, &vector.encode()),
            Self::SyncStep2(payload) | Self::Update(payload) | Self::Awareness(payload) => prefixed(tag, payload),
            Self::QueryAwareness => vec![tag],
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, payload) = bytes.split_first().ok_or(ProtocolError::EmptyFrame)?;
        match MessageType::from_tag(tag)? {
            MessageType::SyncStep1 => StateVector::decode(payload)
                .map(Self::SyncStep1)
                .map_err(ProtocolError::MalformedStateVector),
            MessageType::SyncStep2 => Ok(Self::SyncStep2(payload.to_vec())),
            MessageType::Update => Ok(Self::Update(payload.to_vec())),
            MessageType::Awareness => Ok(Self::Awareness(payload.to_vec())),
            MessageType::QueryAwareness if payload.is_empty() => Ok(Self::QueryAwareness),
            MessageType::QueryAwareness => Err(ProtocolError::UnexpectedPayload(payload.len())),
        }
    }

    /// Like [`Frame::decode`], rejecting frames longer than `max` bytes first.
    pub fn decode_bounded(bytes: &[u8], max: usize) -> Result<Self, ProtocolError> {
        if bytes.len() > max {
            return Err(ProtocolError::Oversized { len: bytes.len(), max });
        }
        Self::decode(bytes)
    }
}

fn prefixed(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(tag);
    out.extend_from_slice(payload);
    out
}
