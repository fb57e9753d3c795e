// Room registry: one replicated document, its peers, and their presence per room id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tandem_common::awareness::{self, AwarenessChannel, AwarenessEntry, AwarenessError};
use tandem_common::crdt::{Document, MergeError, PeerId, StateVector, Update};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RoomSettings;
use crate::error::RegistryError;

pub const MAX_ROOM_ID_LEN: usize = 128;
const OUTBOUND_BUFFER_SIZE: usize = 256;

/// Identity of one websocket connection.
pub type ConnectionId = Uuid;

/// An encoded frame queued for every connection in the room except `0`.
pub type Outbound = (ConnectionId, Arc<Vec<u8>>);

pub fn validate_room_id(id: &str) -> Result<(), RegistryError> {
    let len = id.chars().count();
    if len == 0 || len > MAX_ROOM_ID_LEN {
        return Err(RegistryError::RoomIdLength { len, max: MAX_ROOM_ID_LEN });
    }
    if let Some(found) = id.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))) {
        return Err(RegistryError::RoomIdCharacter { found });
    }
    Ok(())
}

fn now_instant() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Latest state vector this connection is known to have reached.
    pub reported: StateVector,
    /// Awareness ids published over this connection.
    pub awareness_ids: HashSet<PeerId>,
}

impl PeerRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self { joined_at: now, last_seen: now, reported: StateVector::new(), awareness_ids: HashSet::new() }
    }
}

pub struct Room {
    id: String,
    settings: RoomSettings,
    document: Mutex<Document>,
    peers: Mutex<HashMap<ConnectionId, PeerRecord>>,
    awareness: Mutex<AwarenessChannel>,
    outbound: broadcast::Sender<Outbound>,
    last_activity: std::sync::Mutex<DateTime<Utc>>,
    teardown: std::sync::Mutex<Option<JoinHandle<()>>>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Room {
    fn new(id: String, settings: RoomSettings) -> Arc<Self> {
        let (outbound, _) = broadcast::channel(OUTBOUND_BUFFER_SIZE);
        let room = Arc::new(Self {
            id,
            document: Mutex::new(Document::new(PeerId::RELAY).with_pending_limit(settings.max_pending_ops)),
            peers: Mutex::new(HashMap::new()),
            awareness: Mutex::new(AwarenessChannel::new(settings.awareness_timeout)),
            outbound,
            last_activity: std::sync::Mutex::new(Utc::now()),
            teardown: std::sync::Mutex::new(None),
            sweeper: std::sync::Mutex::new(None),
            settings,
        });
        room.start_sweeper();
        room
    }

    fn start_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = awareness::sweep_interval(self.settings.awareness_timeout);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(room) = weak.upgrade() else { break };
                let removed = room.awareness.lock().await.sweep(now_instant());
                if !removed.is_empty() {
                    debug!(room = %room.id, removed = removed.len(), "swept stale awareness entries");
                }
            }
        });
        *lock(&self.sweeper) = Some(handle);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *lock(&self.last_activity)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound.subscribe()
    }

    /// Queue `frame` for every other connection. Never blocks: slow
    /// receivers lag and skip ahead.
    pub fn broadcast(&self, from: ConnectionId, frame: Vec<u8>) {
        let _ = self.outbound.send((from, Arc::new(frame)));
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn text(&self) -> String {
        self.document.lock().await.text()
    }

    pub async fn state_vector(&self) -> StateVector {
        self.document.lock().await.state_vector()
    }

    pub async fn tombstone_count(&self) -> usize {
        self.document.lock().await.tombstone_count()
    }

    pub async fn pending_count(&self) -> usize {
        self.document.lock().await.pending_count()
    }

    /// Answer a SYNC_STEP1: the encoded diff the connection is missing.
    /// Also records the vector as that connection's progress.
    pub async fn handle_sync_step1(&self, conn: ConnectionId, remote: &StateVector) -> Vec<u8> {
        let diff = self.document.lock().await.encode_update_since(remote);
        self.touch(conn, |record| record.reported.merge(remote)).await;
        diff
    }

    /// Merge an update sent by `conn`. Returns whether it carried any ops
    /// (and so should be rebroadcast).
    pub async fn apply_update(&self, conn: ConnectionId, bytes: &[u8]) -> Result<bool, MergeError> {
        let update = Update::decode(bytes)?;
        if update.is_empty() {
            self.touch(conn, |_| {}).await;
            return Ok(false);
        }
        {
            let mut document = self.document.lock().await;
            let changes = document.try_apply_update(&update)?;
            debug!(
                room = %self.id,
                ops = update.ops.len(),
                changes = changes.len(),
                pending = document.pending_count(),
                "merged update"
            );
        }
        self.touch(conn, |record| {
            for op in &update.ops {
                let id = op.id();
                record.reported.observe(id.peer, id.clock);
            }
        })
        .await;
        if self.settings.gc_enabled {
            self.collect_garbage().await;
        }
        Ok(true)
    }

    /// Collect tombstones when every connected peer has caught up with the
    /// room document. Ops still waiting on dependencies do not block this:
    /// collected tombstones keep their place in the sequence. Returns how
    /// many tombstones were collected.
    pub async fn collect_garbage(&self) -> usize {
        let peers = self.peers.lock().await;
        let mut document = self.document.lock().await;
        if peers.is_empty() || document.tombstone_count() == 0 {
            return 0;
        }
        let current = document.state_vector();
        if !peers.values().all(|record| record.reported.dominates(&current)) {
            return 0;
        }
        let collected = document.collect_garbage(&current);
        if collected > 0 {
            debug!(room = %self.id, collected, "collected tombstones");
        }
        collected
    }

    /// Apply an AWARENESS payload from `conn`. Returns the encoded entries
    /// that actually changed, for rebroadcast.
    pub async fn apply_awareness(
        &self,
        conn: ConnectionId,
        bytes: &[u8],
    ) -> Result<Option<Vec<u8>>, AwarenessError> {
        let entries = awareness::decode_entries(bytes)?;
        let now = now_instant();
        let changed: Vec<AwarenessEntry> = {
            let mut channel = self.awareness.lock().await;
            entries.into_iter().filter(|entry| channel.publish(entry.clone(), now)).collect()
        };
        {
            // A peer id announced here is no longer owned by an older
            // connection of the same client, so that connection's close
            // must not retract it.
            let mut peers = self.peers.lock().await;
            for (other, record) in peers.iter_mut() {
                if *other != conn {
                    for entry in changed.iter().filter(|entry| !entry.is_leave()) {
                        record.awareness_ids.remove(&entry.peer);
                    }
                }
            }
        }
        self.touch(conn, |record| {
            for entry in &changed {
                if entry.is_leave() {
                    record.awareness_ids.remove(&entry.peer);
                } else {
                    record.awareness_ids.insert(entry.peer);
                }
            }
        })
        .await;
        Ok((!changed.is_empty()).then(|| awareness::encode_entries(&changed)))
    }

    /// Every live, unexpired presence entry, encoded.
    pub async fn awareness_snapshot(&self) -> Vec<u8> {
        awareness::encode_entries(&self.awareness_entries().await)
    }

    pub async fn awareness_entries(&self) -> Vec<AwarenessEntry> {
        self.awareness.lock().await.entries_at(now_instant())
    }

    /// Drop the presence published by a closed connection and return the
    /// encoded leave entries to broadcast, if any.
    pub async fn remove_connection_awareness(&self, conn: ConnectionId) -> Option<Vec<u8>> {
        let ids: Vec<PeerId> = match self.peers.lock().await.get(&conn) {
            Some(record) => record.awareness_ids.iter().copied().collect(),
            None => return None,
        };
        let leaves = self.awareness.lock().await.remove_peers(&ids, now_instant());
        (!leaves.is_empty()).then(|| awareness::encode_entries(&leaves))
    }

    async fn touch(&self, conn: ConnectionId, update: impl FnOnce(&mut PeerRecord)) {
        let now = Utc::now();
        if let Some(record) = self.peers.lock().await.get_mut(&conn) {
            record.last_seen = now;
            update(record);
        }
        *lock(&self.last_activity) = now;
    }

    fn cancel_teardown(&self) {
        if let Some(handle) = lock(&self.teardown).take() {
            handle.abort();
        }
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.teardown).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Maps room ids to live rooms. Rooms are created on first join and
/// destroyed a grace period after their last peer leaves.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    settings: RoomSettings,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Arc<Self> {
        Arc::new(Self { rooms: RwLock::new(HashMap::new()), settings })
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    /// Existing room or a new empty one. Concurrent calls for the same id
    /// always observe the same room.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<Room>, RegistryError> {
        validate_room_id(id)?;
        if let Some(room) = self.rooms.read().await.get(id) {
            return Ok(Arc::clone(room));
        }
        let mut rooms = self.rooms.write().await;
        Ok(Arc::clone(rooms.entry(id.to_owned()).or_insert_with(|| {
            info!(room = id, "room created");
            Room::new(id.to_owned(), self.settings.clone())
        })))
    }

    /// Resolve the room and register `conn` in it as one step, so a pending
    /// teardown can never remove the room between the two.
    pub async fn join(&self, id: &str, conn: ConnectionId) -> Result<Arc<Room>, RegistryError> {
        validate_room_id(id)?;
        let mut rooms = self.rooms.write().await;
        let room = Arc::clone(rooms.entry(id.to_owned()).or_insert_with(|| {
            info!(room = id, "room created");
            Room::new(id.to_owned(), self.settings.clone())
        }));
        Self::insert_peer(&room, conn).await;
        Ok(room)
    }

    pub async fn add_peer(&self, room: &Arc<Room>, conn: ConnectionId) {
        let _rooms = self.rooms.write().await;
        Self::insert_peer(room, conn).await;
    }

    async fn insert_peer(room: &Arc<Room>, conn: ConnectionId) {
        room.cancel_teardown();
        let peers = {
            let mut peers = room.peers.lock().await;
            peers.insert(conn, PeerRecord::new());
            peers.len()
        };
        *lock(&room.last_activity) = Utc::now();
        debug!(room = %room.id, conn = %conn, peers, "peer joined");
    }

    /// Remove `conn`. When the room becomes empty its destruction is
    /// scheduled after the grace period.
    pub async fn remove_peer(self: &Arc<Self>, room: &Arc<Room>, conn: ConnectionId) {
        let remaining = {
            let mut peers = room.peers.lock().await;
            peers.remove(&conn);
            peers.len()
        };
        *lock(&room.last_activity) = Utc::now();
        debug!(room = %room.id, conn = %conn, remaining, "peer left");
        if remaining == 0 {
            self.schedule_teardown(room);
        }
    }

    fn schedule_teardown(self: &Arc<Self>, room: &Arc<Room>) {
        let registry = Arc::downgrade(self);
        let target = Arc::downgrade(room);
        let id = room.id.clone();
        let grace = self.settings.grace_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(registry) = registry.upgrade() {
                registry.teardown(&id, &target).await;
            }
        });
        if let Some(previous) = lock(&room.teardown).replace(handle) {
            previous.abort();
        }
    }

    async fn teardown(&self, id: &str, target: &Weak<Room>) {
        let mut rooms = self.rooms.write().await;
        let Some(current) = rooms.get(id) else { return };
        if !std::ptr::eq(Arc::as_ptr(current), target.as_ptr()) {
            return;
        }
        if !current.peers.lock().await.is_empty() {
            return;
        }
        if let Some(room) = rooms.remove(id) {
            // This task is the teardown handle; detach it so dropping the room
            // does not abort the task that is finishing the removal.
            lock(&room.teardown).take();
            info!(room = id, "room destroyed");
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.rooms.read().await.contains_key(id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Connected peers in room `id` (0 when the room does not exist).
    pub async fn peer_count(&self, id: &str) -> usize {
        match self.get(id).await {
            Some(room) => room.peer_count().await,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tandem_common::awareness::{PresenceState, PresenceUser, Role};
    use tandem_common::crdt::{Document, Op, OpId, PeerId};

    use super::*;

    fn settings(grace_ms: u64) -> RoomSettings {
        RoomSettings { grace_period: Duration::from_millis(grace_ms), ..RoomSettings::default() }
    }

    fn presence(name: &str) -> PresenceState {
        PresenceState {
            user: PresenceUser { name: name.to_string(), color: "#4caf50".to_string(), role: Role::Owner },
            cursor: None,
        }
    }

    #[test]
    fn room_ids_are_validated() {
        assert!(validate_room_id("team-42_draft.v2").is_ok());
        assert_eq!(
            validate_room_id(""),
            Err(RegistryError::RoomIdLength { len: 0, max: MAX_ROOM_ID_LEN })
        );
        assert!(validate_room_id(&"a".repeat(129)).is_err());
        assert_eq!(validate_room_id("a/b"), Err(RegistryError::RoomIdCharacter { found: '/' }));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_under_concurrency() {
        let registry = RoomRegistry::new(settings(1_000));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move { registry.get_or_create("shared").await }));
        }
        let mut rooms = Vec::new();
        for task in tasks {
            rooms.push(task.await.expect("task should join").expect("room should resolve"));
        }
        assert!(rooms.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_room_is_destroyed_after_grace_period() {
        let registry = RoomRegistry::new(settings(500));
        let conn = Uuid::new_v4();
        let room = registry.join("ephemeral", conn).await.expect("join should succeed");
        let mut client = Document::new(PeerId(7));
        let update = client.insert(0, "forgotten").expect("insert should succeed");
        room.apply_update(conn, &update.encode()).await.expect("update should merge");
        registry.remove_peer(&room, conn).await;
        drop(room);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(registry.contains("ephemeral").await, "room should survive inside the grace period");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!registry.contains("ephemeral").await, "room should be gone after the grace period");

        let fresh = registry.join("ephemeral", Uuid::new_v4()).await.expect("rejoin should succeed");
        assert_eq!(fresh.text().await, "");
        assert!(fresh.state_vector().await.is_empty());
        let diff = fresh.handle_sync_step1(Uuid::new_v4(), &StateVector::new()).await;
        assert!(Update::decode(&diff).expect("diff should decode").is_empty(), "old history is not replayed");
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_within_grace_keeps_the_document() {
        let registry = RoomRegistry::new(settings(500));
        let first = Uuid::new_v4();
        let room = registry.join("sticky", first).await.expect("join should succeed");

        let mut client = Document::new(PeerId(7));
        let update = client.insert(0, "kept").expect("insert should succeed");
        room.apply_update(first, &update.encode()).await.expect("update should merge");
        registry.remove_peer(&room, first).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        let second = Uuid::new_v4();
        let rejoined = registry.join("sticky", second).await.expect("rejoin should succeed");
        assert!(Arc::ptr_eq(&room, &rejoined));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(registry.contains("sticky").await);
        assert_eq!(rejoined.text().await, "kept");
        assert_eq!(registry.peer_count("sticky").await, 1);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let registry = RoomRegistry::new(settings(1_000));
        let conn = Uuid::new_v4();
        let left = registry.join("left", conn).await.expect("join should succeed");
        let right = registry.join("right", Uuid::new_v4()).await.expect("join should succeed");

        let mut client = Document::new(PeerId(1));
        let update = client.insert(0, "only left").expect("insert should succeed");
        left.apply_update(conn, &update.encode()).await.expect("update should merge");

        assert_eq!(left.text().await, "only left");
        assert_eq!(right.text().await, "");
    }

    #[tokio::test]
    async fn corrupt_update_leaves_room_untouched() {
        let registry = RoomRegistry::new(settings(1_000));
        let conn = Uuid::new_v4();
        let room = registry.join("corrupt", conn).await.expect("join should succeed");
        let result = room.apply_update(conn, &[0xff, 0xff]).await;
        assert!(matches!(result, Err(MergeError::Decode(_))));
        assert!(room.state_vector().await.is_empty());
    }

    #[tokio::test]
    async fn gc_waits_until_every_peer_has_caught_up() {
        let registry = RoomRegistry::new(settings(1_000));
        let (writer, lurker) = (Uuid::new_v4(), Uuid::new_v4());
        let room = registry.join("gc", writer).await.expect("join should succeed");
        registry.join("gc", lurker).await.expect("join should succeed");

        let mut client = Document::new(PeerId(5));
        let inserted = client.insert(0, "abc").expect("insert should succeed");
        room.apply_update(writer, &inserted.encode()).await.expect("update should merge");
        let deleted = client.delete(0, 1).expect("delete should succeed");
        room.apply_update(writer, &deleted.encode()).await.expect("update should merge");
        assert_eq!(room.tombstone_count().await, 1, "lurker has not acknowledged the delete");

        room.handle_sync_step1(lurker, &client.state_vector()).await;
        assert_eq!(room.collect_garbage().await, 1);
        assert_eq!(room.text().await, "bc");
    }

    #[tokio::test]
    async fn ops_stuck_on_missing_dependencies_do_not_block_gc() {
        let registry = RoomRegistry::new(settings(1_000));
        let conn = Uuid::new_v4();
        let room = registry.join("stuck", conn).await.expect("join should succeed");

        // Clock 2 of a peer whose clock 1 never arrives.
        let gapped = Update::new(
            PeerId(9),
            vec![Op::Insert { id: OpId::new(PeerId(9), 2), lamport: 5, after: None, content: "?".to_string() }],
        );
        room.apply_update(conn, &gapped.encode()).await.expect("gapped update should be buffered");
        assert_eq!(room.pending_count().await, 1);

        let mut client = Document::new(PeerId(5));
        let inserted = client.insert(0, "abc").expect("insert should succeed");
        room.apply_update(conn, &inserted.encode()).await.expect("update should merge");
        let deleted = client.delete(1, 1).expect("delete should succeed");
        room.apply_update(conn, &deleted.encode()).await.expect("update should merge");

        assert_eq!(room.tombstone_count().await, 0, "the only peer has seen the delete");
        assert_eq!(room.text().await, "ac");
        assert_eq!(room.pending_count().await, 1);
    }

    #[tokio::test]
    async fn pending_ops_are_capped_per_room() {
        let registry = RoomRegistry::new(RoomSettings { max_pending_ops: 2, ..settings(1_000) });
        let conn = Uuid::new_v4();
        let room = registry.join("capped", conn).await.expect("join should succeed");
        for clock in 2..=6 {
            let id = OpId::new(PeerId(9), clock);
            let gapped =
                Update::new(PeerId(9), vec![Op::Insert { id, lamport: clock, after: None, content: "?".to_string() }]);
            room.apply_update(conn, &gapped.encode()).await.expect("gapped update should be buffered");
        }
        assert_eq!(room.pending_count().await, 2);
    }

    #[tokio::test]
    async fn awareness_changes_are_tracked_per_connection() {
        let registry = RoomRegistry::new(settings(1_000));
        let conn = Uuid::new_v4();
        let room = registry.join("presence", conn).await.expect("join should succeed");

        let entry = AwarenessEntry { peer: PeerId(3), clock: 1, state: Some(presence("ada")) };
        let changed = room
            .apply_awareness(conn, &awareness::encode_entries(&[entry.clone()]))
            .await
            .expect("awareness should decode");
        assert!(changed.is_some());

        let repeated = room
            .apply_awareness(conn, &awareness::encode_entries(&[entry]))
            .await
            .expect("awareness should decode");
        assert!(repeated.is_none(), "same clock is not a change");

        let leaves = room.remove_connection_awareness(conn).await.expect("leave should be produced");
        let decoded = awareness::decode_entries(&leaves).expect("leaves should decode");
        assert_eq!(decoded, vec![AwarenessEntry::leave(PeerId(3), 2)]);
        assert!(room.awareness_entries().await.is_empty());
    }

    #[tokio::test]
    async fn reconnected_client_keeps_presence_when_old_connection_closes() {
        let registry = RoomRegistry::new(settings(1_000));
        let (stale, fresh) = (Uuid::new_v4(), Uuid::new_v4());
        let room = registry.join("handover", stale).await.expect("join should succeed");
        registry.join("handover", fresh).await.expect("join should succeed");

        let first = AwarenessEntry { peer: PeerId(3), clock: 1, state: Some(presence("ada")) };
        room.apply_awareness(stale, &awareness::encode_entries(&[first]))
            .await
            .expect("awareness should decode");
        let second = AwarenessEntry { peer: PeerId(3), clock: 3, state: Some(presence("ada")) };
        room.apply_awareness(fresh, &awareness::encode_entries(&[second]))
            .await
            .expect("awareness should decode");

        assert!(room.remove_connection_awareness(stale).await.is_none());
        assert_eq!(room.awareness_entries().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_presence_is_gone_within_a_sweep_interval_of_the_timeout() {
        let timeout = Duration::from_millis(1_000);
        let registry = RoomRegistry::new(RoomSettings { awareness_timeout: timeout, ..settings(60_000) });
        let conn = Uuid::new_v4();
        let room = registry.join("sweep", conn).await.expect("join should succeed");
        let entry = AwarenessEntry { peer: PeerId(3), clock: 1, state: Some(presence("ada")) };
        room.apply_awareness(conn, &awareness::encode_entries(&[entry]))
            .await
            .expect("awareness should decode");

        tokio::time::sleep(timeout - Duration::from_millis(1)).await;
        assert_eq!(room.awareness_entries().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(room.awareness_entries().await.is_empty(), "expired presence is hidden at the timeout");
        let snapshot = awareness::decode_entries(&room.awareness_snapshot().await).expect("snapshot should decode");
        assert!(snapshot.is_empty(), "new joiners never see expired presence");

        tokio::time::sleep(awareness::sweep_interval(timeout) + Duration::from_millis(1)).await;
        assert!(room.awareness.lock().await.is_empty(), "the room task swept the record");
        assert_eq!(room.awareness.lock().await.clock_of(PeerId(3)), Some(1));
    }
}
