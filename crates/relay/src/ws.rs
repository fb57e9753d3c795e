// Websocket endpoint: one connection per peer, room id in the path.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tandem_common::protocol::{Frame, ProtocolError, CLOSE_PROTOCOL_ERROR};
use tandem_common::sync::{SyncMachine, SyncState};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::rooms::{validate_room_id, ConnectionId, Room, RoomRegistry};

#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<RoomRegistry>,
}

impl RelayState {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new().route("/{room}", get(ws_route)).with_state(state)
}

async fn ws_route(
    Path(room_id): Path<String>,
    State(state): State<RelayState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // A bad room id is refused before the upgrade is even considered.
    if let Err(error) = validate_room_id(&room_id) {
        return RelayError::invalid_room(&room_id, &error).into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    // Frames between our limit and the transport limit get a protocol-error
    // close; anything bigger is cut off by the transport itself.
    let transport_limit = state.registry.settings().max_frame_bytes.saturating_mul(4);
    ws.max_message_size(transport_limit)
        .max_frame_size(transport_limit)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

/// What processing one inbound frame produced.
#[derive(Debug, Default)]
struct Dispatch {
    /// Frames for this connection only.
    replies: Vec<Vec<u8>>,
    /// Frames for every other connection in the room.
    broadcast: Vec<Vec<u8>>,
}

async fn handle_socket(mut socket: WebSocket, state: RelayState, room_id: String) {
    let conn: ConnectionId = Uuid::new_v4();
    let room = match state.registry.join(&room_id, conn).await {
        Ok(room) => room,
        Err(error) => {
            warn!(room = %room_id, %error, "could not resolve room");
            let close = CloseFrame { code: 1011, reason: error.to_string().into() };
            let _ = socket.send(Message::Close(Some(close))).await;
            return;
        }
    };
    let mut outbound_rx = room.subscribe();
    let mut machine = SyncMachine::server();
    machine.open();
    info!(room = %room_id, conn = %conn, "peer connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };

                let outcome = match message {
                    Message::Binary(payload) => process_frame(&room, conn, &mut machine, payload.as_ref()).await,
                    Message::Text(_) => Err(ProtocolError::TextFrame),
                    Message::Close(_) => break,
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Message::Pong(_) => continue,
                };

                match outcome {
                    Ok(dispatch) => {
                        if send_all(&mut socket, dispatch.replies).await.is_err() {
                            break;
                        }
                        for frame in dispatch.broadcast {
                            room.broadcast(conn, frame);
                        }
                    }
                    Err(error) => {
                        warn!(room = %room_id, conn = %conn, %error, "closing connection on protocol error");
                        let close = CloseFrame { code: CLOSE_PROTOCOL_ERROR, reason: error.to_string().into() };
                        let _ = socket.send(Message::Close(Some(close))).await;
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Ok((sender, frame)) if sender != conn => {
                        if socket.send(Message::Binary(frame.as_ref().clone().into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The client's periodic resync recovers whatever was skipped.
                        warn!(room = %room_id, conn = %conn, skipped, "peer lagging behind room broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    machine.close();
    if let Some(leaves) = room.remove_connection_awareness(conn).await {
        room.broadcast(conn, Frame::Awareness(leaves).encode());
    }
    state.registry.remove_peer(&room, conn).await;
    info!(room = %room_id, conn = %conn, "peer disconnected");
}

async fn send_all(socket: &mut WebSocket, frames: Vec<Vec<u8>>) -> Result<(), axum::Error> {
    for frame in frames {
        socket.send(Message::Binary(frame.into())).await?;
    }
    Ok(())
}

async fn process_frame(
    room: &Room,
    conn: ConnectionId,
    machine: &mut SyncMachine,
    bytes: &[u8],
) -> Result<Dispatch, ProtocolError> {
    let frame = Frame::decode_bounded(bytes, room.settings().max_frame_bytes)?;
    let before = machine.state();
    let after = machine.on_inbound(frame.message_type())?;
    let mut dispatch = Dispatch::default();

    match frame {
        Frame::SyncStep1(remote) => {
            let diff = room.handle_sync_step1(conn, &remote).await;
            dispatch.replies.push(Frame::SyncStep2(diff).encode());
            if before == SyncState::SyncStep1 {
                dispatch.replies.push(Frame::SyncStep1(room.state_vector().await).encode());
            }
        }
        Frame::SyncStep2(payload) | Frame::Update(payload) => {
            match room.apply_update(conn, &payload).await {
                // Handshake diffs fan out as plain updates.
                Ok(true) => dispatch.broadcast.push(Frame::Update(payload).encode()),
                Ok(false) => {}
                Err(error) => warn!(room = %room.id(), conn = %conn, %error, "dropping update that failed to merge"),
            }
            if before == SyncState::SyncStep2 && after == SyncState::Synced {
                dispatch.replies.push(Frame::Awareness(room.awareness_snapshot().await).encode());
                debug!(room = %room.id(), conn = %conn, "handshake complete");
            }
        }
        Frame::Awareness(payload) => match room.apply_awareness(conn, &payload).await {
            Ok(Some(changed)) => dispatch.broadcast.push(Frame::Awareness(changed).encode()),
            Ok(None) => {}
            Err(error) => debug!(room = %room.id(), conn = %conn, %error, "dropping malformed awareness"),
        },
        Frame::QueryAwareness => {
            dispatch.replies.push(Frame::Awareness(room.awareness_snapshot().await).encode());
        }
    }

    Ok(dispatch)
}
