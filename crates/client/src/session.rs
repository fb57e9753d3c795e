// Collaboration session: one replica of one room, kept in sync with the relay
// over a websocket that is re-established with backoff when it drops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tandem_common::awareness::{
    self, AwarenessChannel, AwarenessEntry, CursorRange, PresenceState, PresenceUser, DEFAULT_AWARENESS_TIMEOUT,
};
use tandem_common::crdt::{Document, EditError, PeerId};
use tandem_common::protocol::{Frame, ProtocolError, CLOSE_PROTOCOL_ERROR, MAX_FRAME_BYTES};
use tandem_common::sync::{SyncMachine, SyncState};
use tandem_common::types::{EditOp, TextChange};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::accessor::{DocumentContentAccessor, LocalChangeSink};
use crate::reconnect::ReconnectPolicy;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LEAVE_GRACE: Duration = Duration::from_secs(2);
const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(10);

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Callback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid relay url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error("session is closed")]
    Closed,
    #[error("accessor is not attached to a session")]
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    /// Transport is open and the handshake is running.
    Syncing,
    Connected,
    Reconnecting { attempt: u32 },
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Syncing => f.write_str("syncing"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    /// Visible changes merged from other peers, in apply order.
    RemoteChange(Vec<TextChange>),
    /// The live presence of every other peer after a change.
    AwarenessChanged(Vec<AwarenessEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Relay base URL, `ws://` or `wss://`.
    pub relay_url: String,
    pub room: String,
    pub user: PresenceUser,
    /// Replica id; random when unset.
    pub peer: Option<PeerId>,
    pub reconnect: ReconnectPolicy,
    /// How often a synced session re-sends its state vector.
    pub resync_interval: Duration,
    pub awareness_timeout: Duration,
}

impl SessionOptions {
    pub fn new(relay_url: impl Into<String>, room: impl Into<String>, user: PresenceUser) -> Self {
        Self {
            relay_url: relay_url.into(),
            room: room.into(),
            user,
            peer: None,
            reconnect: ReconnectPolicy::default(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            awareness_timeout: DEFAULT_AWARENESS_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Send(Vec<u8>),
    Leave,
}

#[derive(Debug)]
struct LocalPresence {
    clock: u64,
    state: Option<PresenceState>,
}

impl LocalPresence {
    fn entry(&self, peer: PeerId) -> AwarenessEntry {
        AwarenessEntry { peer, clock: self.clock, state: self.state.clone() }
    }
}

pub(crate) struct Inner {
    room: String,
    peer: PeerId,
    document: Mutex<Document>,
    /// Held across "mutate document, then notify" so deliveries never interleave.
    delivery: Mutex<()>,
    presence: Mutex<LocalPresence>,
    awareness: Mutex<AwarenessChannel>,
    subscribers: Mutex<BTreeMap<SubscriptionId, Callback>>,
    next_subscription: AtomicU64,
    status: watch::Sender<SessionStatus>,
    commands: mpsc::UnboundedSender<Command>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_instant() -> std::time::Instant {
    Instant::now().into_std()
}

impl Inner {
    fn new(
        room: String,
        peer: PeerId,
        user: PresenceUser,
        awareness_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Command>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus::Connecting);
        let inner = Arc::new(Self {
            room,
            peer,
            document: Mutex::new(Document::new(peer)),
            delivery: Mutex::new(()),
            presence: Mutex::new(LocalPresence { clock: 0, state: Some(PresenceState { user, cursor: None }) }),
            awareness: Mutex::new(AwarenessChannel::new(awareness_timeout)),
            subscribers: Mutex::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
            status,
            commands,
        });
        (inner, commands_rx)
    }

    fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    fn set_status(&self, next: SessionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(room = %self.room, status = %next, "session status changed");
            self.emit(&SessionEvent::StatusChanged(next));
        }
    }

    fn subscribe(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).insert(id, callback);
        id
    }

    fn emit(&self, event: &SessionEvent) {
        let callbacks: Vec<Callback> = lock(&self.subscribers).values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }

    fn send(&self, frame: Frame) -> Result<(), SessionError> {
        self.commands.send(Command::Send(frame.encode())).map_err(|_| SessionError::Closed)
    }

    pub(crate) fn apply_local<R>(&self, edit: &EditOp, render: impl FnOnce() -> R) -> Result<R, SessionError> {
        if self.status() == SessionStatus::Closed {
            return Err(SessionError::Closed);
        }
        let _order = lock(&self.delivery);
        let update = lock(&self.document).local_edit(edit)?;
        let rendered = render();
        // While offline the next handshake carries the edit instead.
        self.send(Frame::Update(update.encode()))?;
        Ok(rendered)
    }

    fn merge_remote(&self, payload: &[u8]) {
        let _order = lock(&self.delivery);
        let merged = lock(&self.document).apply_update_bytes(payload);
        match merged {
            Ok(changes) if !changes.is_empty() => self.emit(&SessionEvent::RemoteChange(changes)),
            Ok(_) => {}
            Err(error) => warn!(room = %self.room, %error, "dropping update that failed to merge"),
        }
    }

    fn attach(&self, accessor: Arc<dyn DocumentContentAccessor>, sink: LocalChangeSink) -> SubscriptionId {
        let _order = lock(&self.delivery);
        accessor.on_local_change(sink);
        let text = lock(&self.document).text();
        if !text.is_empty() {
            accessor.apply_merged(&[TextChange::Insert { index: 0, text }]);
        }
        self.subscribe(Arc::new(move |event| {
            if let SessionEvent::RemoteChange(changes) = event {
                accessor.apply_merged(changes);
            }
        }))
    }

    /// Own presence with the clock advanced by `bump`, if still announced.
    fn announce(&self, bump: u64) -> Option<Vec<u8>> {
        let mut presence = lock(&self.presence);
        presence.state.as_ref()?;
        presence.clock += bump;
        Some(awareness::encode_entries(&[presence.entry(self.peer)]))
    }

    fn update_presence(&self, change: impl FnOnce(&mut PresenceState)) -> Result<(), SessionError> {
        let payload = {
            let mut presence = lock(&self.presence);
            let Some(state) = presence.state.as_mut() else {
                return Err(SessionError::Closed);
            };
            change(state);
            presence.clock += 1;
            awareness::encode_entries(&[presence.entry(self.peer)])
        };
        self.send(Frame::Awareness(payload))
    }

    fn leave_entry(&self) -> Option<Vec<u8>> {
        let mut presence = lock(&self.presence);
        presence.state.take()?;
        presence.clock += 1;
        Some(awareness::encode_entries(&[presence.entry(self.peer)]))
    }

    /// Merge remote presence. Returns a frame to send when the relay holds a
    /// record of this peer that would shadow the live one.
    fn merge_awareness(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let entries = match awareness::decode_entries(payload) {
            Ok(entries) => entries,
            Err(error) => {
                debug!(room = %self.room, %error, "dropping malformed awareness");
                return None;
            }
        };
        let now = now_instant();
        let mut reply = None;
        let mut changed = false;
        {
            let mut channel = lock(&self.awareness);
            for entry in entries {
                if entry.peer == self.peer {
                    let mut own = lock(&self.presence);
                    if own.state.is_some() && entry.clock >= own.clock {
                        own.clock = entry.clock + 1;
                        reply = Some(Frame::Awareness(awareness::encode_entries(&[own.entry(self.peer)])).encode());
                    }
                    continue;
                }
                changed |= channel.publish(entry, now);
            }
        }
        if changed {
            self.emit(&SessionEvent::AwarenessChanged(self.peers()));
        }
        reply
    }

    fn sweep_awareness(&self) {
        let removed = lock(&self.awareness).sweep(now_instant());
        if !removed.is_empty() {
            debug!(room = %self.room, count = removed.len(), "expired remote presence");
            self.emit(&SessionEvent::AwarenessChanged(self.peers()));
        }
    }

    /// Forget every remote peer; the next handshake brings back the live ones.
    fn clear_awareness(&self) {
        let cleared = {
            let mut channel = lock(&self.awareness);
            let peers: Vec<PeerId> = channel.entries().iter().map(|entry| entry.peer).collect();
            channel.remove_peers(&peers, now_instant());
            channel.sweep(now_instant());
            !peers.is_empty()
        };
        if cleared {
            self.emit(&SessionEvent::AwarenessChanged(Vec::new()));
        }
    }

    fn peers(&self) -> Vec<AwarenessEntry> {
        lock(&self.awareness).entries_at(now_instant())
    }

    fn step1(&self) -> Frame {
        Frame::SyncStep1(lock(&self.document).state_vector())
    }

    /// Process one inbound frame and return the frames to send back.
    fn handle_frame(&self, machine: &mut SyncMachine, bytes: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let frame = Frame::decode_bounded(bytes, MAX_FRAME_BYTES)?;
        let before = machine.state();
        let after = machine.on_inbound(frame.message_type())?;
        let mut replies = Vec::new();

        match frame {
            Frame::SyncStep1(remote) => {
                let diff = lock(&self.document).encode_update_since(&remote);
                replies.push(Frame::SyncStep2(diff).encode());
            }
            Frame::SyncStep2(payload) | Frame::Update(payload) => self.merge_remote(&payload),
            Frame::Awareness(payload) => replies.extend(self.merge_awareness(&payload)),
            Frame::QueryAwareness => {
                let own = lock(&self.presence).entry(self.peer);
                replies.push(Frame::Awareness(awareness::encode_entries(&[own])).encode());
            }
        }

        if before != SyncState::Synced && after == SyncState::Synced {
            info!(room = %self.room, peer = %self.peer, "session synced");
            self.set_status(SessionStatus::Connected);
        }
        Ok(replies)
    }
}

/// Membership of one room. Constructed per join, discarded on leave.
pub struct CollabSession {
    inner: Arc<Inner>,
    task: Option<JoinHandle<()>>,
}

impl CollabSession {
    /// Start joining `options.room`. Must be called inside a tokio runtime;
    /// the returned session connects in the background.
    pub fn join(options: SessionOptions) -> Result<Self, SessionError> {
        let url = room_url(&options.relay_url, &options.room)?;
        let peer = options.peer.unwrap_or_else(PeerId::random);
        let (inner, commands) = Inner::new(options.room.clone(), peer, options.user.clone(), options.awareness_timeout);
        info!(room = %options.room, peer = %peer, url = %url, "joining room");
        let task = tokio::spawn(run(Arc::clone(&inner), url, options, commands));
        Ok(Self { inner, task: Some(task) })
    }

    pub fn room(&self) -> &str {
        &self.inner.room
    }

    pub fn peer(&self) -> PeerId {
        self.inner.peer
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status()
    }

    pub fn text(&self) -> String {
        lock(&self.inner.document).text()
    }

    /// Live presence of every other peer in the room.
    pub fn peers(&self) -> Vec<AwarenessEntry> {
        self.inner.peers()
    }

    pub fn subscribe(&self, callback: impl Fn(&SessionEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.subscribe(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.subscribers).remove(&id).is_some()
    }

    /// Bind an editing surface. Unsubscribing the returned id detaches it.
    pub fn attach(&self, accessor: Arc<dyn DocumentContentAccessor>) -> SubscriptionId {
        self.inner.attach(accessor, self.sink())
    }

    pub fn sink(&self) -> LocalChangeSink {
        LocalChangeSink::new(Arc::clone(&self.inner))
    }

    pub fn edit(&self, edit: &EditOp) -> Result<(), SessionError> {
        self.inner.apply_local(edit, || ())
    }

    pub fn insert(&self, index: usize, text: &str) -> Result<(), SessionError> {
        self.edit(&EditOp::Insert { index, text: text.to_owned() })
    }

    pub fn delete(&self, index: usize, len: usize) -> Result<(), SessionError> {
        self.edit(&EditOp::Delete { index, len })
    }

    pub fn replace(&self, index: usize, len: usize, text: &str) -> Result<(), SessionError> {
        self.edit(&EditOp::Replace { index, len, text: text.to_owned() })
    }

    pub fn set_cursor(&self, cursor: Option<CursorRange>) -> Result<(), SessionError> {
        self.inner.update_presence(|state| state.cursor = cursor)
    }

    pub fn set_user(&self, user: PresenceUser) -> Result<(), SessionError> {
        self.inner.update_presence(|state| state.user = user)
    }

    /// Re-send the state vector now instead of waiting for the periodic resync.
    pub fn resync(&self) -> Result<(), SessionError> {
        self.inner.send(self.inner.step1())
    }

    /// Wait until the handshake completes. Fails if the session closes first.
    pub async fn synced(&self) -> Result<(), SessionError> {
        let mut status = self.inner.status.subscribe();
        let reached = status
            .wait_for(|status| matches!(status, SessionStatus::Connected | SessionStatus::Closed))
            .await
            .map(|status| *status)
            .map_err(|_| SessionError::Closed)?;
        match reached {
            SessionStatus::Connected => Ok(()),
            _ => Err(SessionError::Closed),
        }
    }

    /// Announce departure and close the connection.
    pub async fn leave(mut self) {
        let _ = self.inner.commands.send(Command::Leave);
        if let Some(mut task) = self.task.take() {
            if timeout(LEAVE_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.inner.set_status(SessionStatus::Closed);
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn room_url(relay_url: &str, room: &str) -> Result<Url, SessionError> {
    let invalid = |reason: String| SessionError::InvalidUrl { url: relay_url.to_owned(), reason };
    let mut url = Url::parse(relay_url).map_err(|error| invalid(error.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if room.is_empty() {
        return Err(invalid("room id is empty".to_owned()));
    }
    url.path_segments_mut()
        .map_err(|_| invalid("url cannot carry a path".to_owned()))?
        .pop_if_empty()
        .push(room);
    Ok(url)
}

enum ConnectionEnd {
    Left,
    Dropped(String),
}

async fn run(
    inner: Arc<Inner>,
    url: Url,
    options: SessionOptions,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut failures: u32 = 0;
    let mut attempt: u32 = 0;

    'session: loop {
        // Anything queued while offline is covered by the next handshake.
        while let Ok(command) = commands.try_recv() {
            if matches!(command, Command::Leave) {
                break 'session;
            }
        }
        inner.set_status(if attempt == 0 { SessionStatus::Connecting } else { SessionStatus::Reconnecting { attempt } });
        attempt += 1;

        match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((socket, _))) => {
                failures = 0;
                match drive(&inner, socket, &options, &mut commands).await {
                    ConnectionEnd::Left => break 'session,
                    ConnectionEnd::Dropped(reason) => {
                        warn!(room = %inner.room, %reason, "connection to relay lost");
                        inner.clear_awareness();
                    }
                }
            }
            Ok(Err(WsError::Http(ref response))) if response.status().is_client_error() => {
                error!(room = %inner.room, status = response.status().as_u16(), "relay refused the room");
                break 'session;
            }
            Ok(Err(error)) => {
                failures = failures.saturating_add(1);
                warn!(room = %inner.room, %error, failures, "could not reach relay");
            }
            Err(_) => {
                failures = failures.saturating_add(1);
                warn!(room = %inner.room, failures, "timed out connecting to relay");
            }
        }

        if !options.reconnect.should_reconnect(failures) {
            error!(room = %inner.room, failures, "giving up on relay");
            break;
        }
        inner.set_status(SessionStatus::Reconnecting { attempt });
        let wake = sleep(options.reconnect.delay(failures));
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => break,
                command = commands.recv() => match command {
                    Some(Command::Send(_)) => {}
                    Some(Command::Leave) | None => break 'session,
                },
            }
        }
    }

    inner.set_status(SessionStatus::Closed);
    info!(room = %inner.room, "left room");
}

async fn drive(
    inner: &Inner,
    mut socket: ClientSocket,
    options: &SessionOptions,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> ConnectionEnd {
    let mut machine = SyncMachine::client();
    machine.open();
    inner.set_status(SessionStatus::Syncing);

    // The clock skips one value so the relay's synthesized leave for the
    // previous connection can never outrank this announcement.
    let mut greeting = vec![inner.step1().encode()];
    greeting.extend(inner.announce(2).map(|payload| Frame::Awareness(payload).encode()));
    for frame in greeting {
        if let Err(error) = socket.send(WsMessage::Binary(frame.into())).await {
            return ConnectionEnd::Dropped(error.to_string());
        }
    }

    let mut resync = interval_at(Instant::now() + options.resync_interval, options.resync_interval);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let renew_period = (options.awareness_timeout / 2).max(Duration::from_millis(10));
    let mut renew = interval_at(Instant::now() + renew_period, renew_period);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let sweep_period = awareness::sweep_interval(options.awareness_timeout);
    let mut sweep = interval_at(Instant::now() + sweep_period, sweep_period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outgoing: Vec<Vec<u8>> = tokio::select! {
            incoming = socket.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => return ConnectionEnd::Dropped(error.to_string()),
                    None => return ConnectionEnd::Dropped("relay closed the stream".to_owned()),
                };
                let handled = match message {
                    WsMessage::Binary(payload) => inner.handle_frame(&mut machine, &payload),
                    WsMessage::Text(_) => Err(ProtocolError::TextFrame),
                    WsMessage::Close(frame) => {
                        machine.close();
                        let reason = frame.map_or_else(|| "no close frame".to_owned(), |f| format!("{} {}", u16::from(f.code), f.reason.as_str()));
                        return ConnectionEnd::Dropped(format!("relay closed the connection: {reason}"));
                    }
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(Vec::new()),
                };
                match handled {
                    Ok(replies) => replies,
                    Err(error) => {
                        warn!(room = %inner.room, %error, "closing connection on protocol error");
                        let close = CloseFrame { code: CloseCode::from(CLOSE_PROTOCOL_ERROR), reason: error.to_string().into() };
                        let _ = socket.close(Some(close)).await;
                        return ConnectionEnd::Dropped(error.to_string());
                    }
                }
            }
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => vec![frame],
                Some(Command::Leave) | None => {
                    if let Some(leave) = inner.leave_entry() {
                        let _ = socket.send(WsMessage::Binary(Frame::Awareness(leave).encode().into())).await;
                    }
                    let _ = socket.close(None).await;
                    machine.close();
                    return ConnectionEnd::Left;
                }
            },
            _ = resync.tick() => {
                if machine.is_synced() { vec![inner.step1().encode()] } else { Vec::new() }
            }
            _ = renew.tick() => {
                inner.announce(1).map(|payload| Frame::Awareness(payload).encode()).into_iter().collect()
            }
            _ = sweep.tick() => {
                inner.sweep_awareness();
                Vec::new()
            }
        };

        for frame in outgoing {
            if let Err(error) = socket.send(WsMessage::Binary(frame.into())).await {
                return ConnectionEnd::Dropped(error.to_string());
            }
        }
    }
}
