use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tandem_client::{BufferAccessor, CollabSession, ReconnectPolicy, SessionEvent, SessionOptions, SessionStatus};
use tandem_common::awareness::{PresenceUser, Role};
use tandem_common::types::EditOp;
use tandem_relay::config::RoomSettings;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Instant};

async fn spawn_relay_on(listener: TcpListener) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tandem_relay::serve(listener, RoomSettings::default()).await.expect("relay should run");
    })
}

async fn spawn_relay() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    (addr, spawn_relay_on(listener).await)
}

fn options(addr: SocketAddr, room: &str, name: &str) -> SessionOptions {
    let user = PresenceUser { name: name.to_owned(), color: "#4caf50".to_owned(), role: Role::Participant };
    let mut options = SessionOptions::new(format!("ws://{addr}"), room, user);
    options.reconnect =
        ReconnectPolicy { base_delay: Duration::from_millis(20), max_delay: Duration::from_millis(100), ..Default::default() };
    options
}

async fn join_synced(options: SessionOptions) -> CollabSession {
    let session = CollabSession::join(options).expect("join should start");
    timeout(Duration::from_secs(3), session.synced())
        .await
        .expect("session should sync in time")
        .expect("session should sync");
    session
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn two_sessions_converge_and_mirror_into_accessors() {
    let (addr, relay) = spawn_relay().await;
    let alice = join_synced(options(addr, "pair", "alice")).await;
    let bob = join_synced(options(addr, "pair", "bob")).await;

    let buffer = BufferAccessor::new();
    bob.attach(buffer.clone());

    alice.insert(0, "hello").expect("insert should succeed");
    eventually("bob to see alice's text", || bob.text() == "hello").await;
    eventually("bob's editor to render it", || buffer.text() == "hello").await;

    buffer.edit(&EditOp::Insert { index: 5, text: " world".into() }).expect("editor edit should apply");
    eventually("alice to see bob's edit", || alice.text() == "hello world").await;

    alice.leave().await;
    bob.leave().await;
    relay.abort();
}

#[tokio::test]
async fn concurrent_edits_converge() {
    let (addr, relay) = spawn_relay().await;
    let alice = join_synced(options(addr, "race", "alice")).await;
    let bob = join_synced(options(addr, "race", "bob")).await;

    alice.insert(0, "left").expect("insert should succeed");
    bob.insert(0, "right").expect("insert should succeed");

    eventually("both replicas to hold both edits", || {
        let (a, b) = (alice.text(), bob.text());
        a == b && a.len() == "leftright".len()
    })
    .await;
    relay.abort();
}

#[tokio::test]
async fn presence_is_visible_and_retracted_on_leave() {
    let (addr, relay) = spawn_relay().await;
    let alice = join_synced(options(addr, "presence", "alice")).await;
    let bob = join_synced(options(addr, "presence", "bob")).await;

    eventually("alice to see bob", || {
        alice.peers().iter().any(|entry| entry.state.as_ref().is_some_and(|state| state.user.name == "bob"))
    })
    .await;
    eventually("bob to see alice", || alice.peers().len() == 1 && bob.peers().len() == 1).await;

    bob.leave().await;
    eventually("bob's presence to be retracted", || alice.peers().is_empty()).await;
    relay.abort();
}

#[tokio::test]
async fn status_events_reach_subscribers() {
    let (addr, relay) = spawn_relay().await;
    let session = CollabSession::join(options(addr, "events", "alice")).expect("join should start");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let id = session.subscribe(move |event| {
        if let SessionEvent::StatusChanged(status) = event {
            sink.lock().expect("event log lock should not be poisoned").push(*status);
        }
    });

    timeout(Duration::from_secs(3), session.synced())
        .await
        .expect("session should sync in time")
        .expect("session should sync");
    assert_eq!(
        *seen.lock().expect("event log lock should not be poisoned"),
        vec![SessionStatus::Syncing, SessionStatus::Connected]
    );
    assert!(session.unsubscribe(id));
    assert!(!session.unsubscribe(id));
    relay.abort();
}

#[tokio::test]
async fn offline_edits_reach_the_room_once_the_relay_is_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    drop(listener);

    let alice = CollabSession::join(options(addr, "late", "alice")).expect("join should start");
    alice.insert(0, "draft").expect("offline edit should apply locally");
    eventually("alice to start backing off", || matches!(alice.status(), SessionStatus::Reconnecting { .. })).await;

    let relay = spawn_relay_on(TcpListener::bind(addr).await.expect("relay should rebind the address")).await;
    timeout(Duration::from_secs(3), alice.synced())
        .await
        .expect("session should sync in time")
        .expect("session should sync");

    let bob = join_synced(options(addr, "late", "bob")).await;
    eventually("bob to receive alice's offline edit", || bob.text() == "draft").await;
    relay.abort();
}

#[tokio::test]
async fn refused_room_closes_the_session() {
    let (addr, relay) = spawn_relay().await;
    let session = CollabSession::join(options(addr, "bad room", "alice")).expect("join should start");

    let synced = timeout(Duration::from_secs(3), session.synced()).await.expect("session should settle in time");
    assert!(synced.is_err());
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(session.insert(0, "x").is_err());
    relay.abort();
}
