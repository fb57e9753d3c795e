// Binary websocket framing shared by the relay and clients.

pub mod frame;

pub use frame::{Frame, MessageType, ProtocolError, MAX_FRAME_BYTES};

/// Websocket close code for protocol violations.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
