use std::sync::Arc;

use parkbeat_relay_kv::KvStore;
use parkbeat_relay_types::rooms::{Room, RoomKind, socket_geohashes_key, socket_projects_key};
use parkbeat_relay_types::{RECENCY_WINDOW_MS, RelayResult, SocketId, now_ms};
use tracing::{debug, warn};

/// One `(room, socket)` membership as stored in the room hash.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberRecord {
    pub socket_id: SocketId,
    pub last_seen_ms: i64,
}

impl SubscriberRecord {
    pub fn is_stale(&self, now: i64, expiry_ms: i64) -> bool {
        now - self.last_seen_ms > expiry_ms
    }
}

/// Subscription state shared by every relay instance, kept as four logical
/// maps in the KV store: room→{socket→lastSeen} plus a per-socket reverse
/// index per namespace. All operations are idempotent; last-writer-wins on
/// `last_seen_ms`.
pub struct SubscriptionRegistry {
    kv: Arc<dyn KvStore>,
    recency_window_ms: i64,
}

impl SubscriptionRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            recency_window_ms: RECENCY_WINDOW_MS,
        }
    }

    pub fn with_recency_window(kv: Arc<dyn KvStore>, recency_window_ms: i64) -> Self {
        Self {
            kv,
            recency_window_ms,
        }
    }

    pub async fn subscribe_geohash(&self, socket_id: &SocketId, geohash: &str) -> RelayResult<()> {
        self.subscribe(socket_id, &Room::geohash(geohash)).await
    }

    pub async fn unsubscribe_geohash(
        &self,
        socket_id: &SocketId,
        geohash: &str,
    ) -> RelayResult<()> {
        self.unsubscribe(socket_id, &Room::geohash(geohash)).await
    }

    pub async fn subscribe_project(&self, socket_id: &SocketId, project_id: &str) -> RelayResult<()> {
        self.subscribe(socket_id, &Room::project(project_id)).await
    }

    pub async fn unsubscribe_project(
        &self,
        socket_id: &SocketId,
        project_id: &str,
    ) -> RelayResult<()> {
        self.unsubscribe(socket_id, &Room::project(project_id)).await
    }

    async fn subscribe(&self, socket_id: &SocketId, room: &Room) -> RelayResult<()> {
        let room_key = room.sockets_key();
        let now = now_ms();

        // Clients re-send subscriptions aggressively around reconnects; a
        // fresh-enough record means there is nothing to write.
        let existing = self.kv.hgetall(&room_key).await?;
        if let Some(last_seen) = existing
            .get(socket_id.as_str())
            .and_then(|raw| raw.parse::<i64>().ok())
            && last_seen > now - self.recency_window_ms
        {
            debug!("Skipping {room} subscribe for {socket_id}, record is recent");
            return Ok(());
        }

        let reverse_key = self.reverse_key(socket_id, room.kind);
        self.kv.sadd(&reverse_key, &room.key).await?;
        if let Err(write_err) = self
            .kv
            .hset(&room_key, socket_id.as_str(), &now.to_string())
            .await
        {
            // Roll the partial reverse-index entry back; the original failure
            // is what the caller needs to see.
            if let Err(rollback_err) = self.kv.srem(&reverse_key, &room.key).await {
                warn!("Rollback of {reverse_key} after failed subscribe also failed: {rollback_err}");
            }
            return Err(write_err);
        }
        debug!("Subscribed {socket_id} to {room}");
        Ok(())
    }

    async fn unsubscribe(&self, socket_id: &SocketId, room: &Room) -> RelayResult<()> {
        let room_key = room.sockets_key();
        self.kv.hdel(&room_key, socket_id.as_str()).await?;
        if self.kv.hlen(&room_key).await? == 0 {
            self.kv.del(&room_key).await?;
        }
        self.kv
            .srem(&self.reverse_key(socket_id, room.kind), &room.key)
            .await?;
        debug!("Unsubscribed {socket_id} from {room}");
        Ok(())
    }

    /// Every socket currently recorded in the room, minus `exclude`. Staleness
    /// is reported, not filtered; reclaiming stale records is the cleanup
    /// pipeline's job.
    pub async fn active_subscribers(
        &self,
        room: &Room,
        exclude: &[SocketId],
    ) -> RelayResult<Vec<SubscriberRecord>> {
        let raw = self.kv.hgetall(&room.sockets_key()).await?;
        Ok(raw
            .into_iter()
            .filter(|(socket, _)| !exclude.iter().any(|e| e.as_str() == socket))
            .map(|(socket, last_seen)| SubscriberRecord {
                socket_id: SocketId::from(socket.as_str()),
                last_seen_ms: last_seen.parse().unwrap_or(0),
            })
            .collect())
    }

    /// All rooms the socket is subscribed to, from the reverse indexes.
    pub async fn rooms_for_socket(&self, socket_id: &SocketId) -> RelayResult<Vec<Room>> {
        let mut rooms = Vec::new();
        for prefix in self.kv.smembers(&socket_geohashes_key(socket_id)).await? {
            rooms.push(Room::geohash(prefix));
        }
        for id in self.kv.smembers(&socket_projects_key(socket_id)).await? {
            rooms.push(Room::project(id));
        }
        Ok(rooms)
    }

    /// Stamps `last_seen_ms = now` into every room the socket is in and
    /// returns those rooms. Driven by inbound pings.
    pub async fn refresh_liveness(&self, socket_id: &SocketId) -> RelayResult<Vec<Room>> {
        let rooms = self.rooms_for_socket(socket_id).await?;
        let now = now_ms().to_string();
        for room in &rooms {
            self.kv
                .hset(&room.sockets_key(), socket_id.as_str(), &now)
                .await?;
        }
        Ok(rooms)
    }

    /// Removes every record for the socket in the named scopes, reverse index
    /// included. The reverse index is authoritative; missing forward entries
    /// are tolerated. Safe to run concurrently from several instances.
    pub async fn cleanup(&self, socket_id: &SocketId, scope: &[RoomKind]) -> RelayResult<()> {
        for kind in scope {
            let reverse_key = self.reverse_key(socket_id, *kind);
            for key in self.kv.smembers(&reverse_key).await? {
                let room = Room { kind: *kind, key };
                let room_key = room.sockets_key();
                self.kv.hdel(&room_key, socket_id.as_str()).await?;
                if self.kv.hlen(&room_key).await? == 0 {
                    self.kv.del(&room_key).await?;
                }
            }
            self.kv.del(&reverse_key).await?;
        }
        debug!("Cleaned registry records for {socket_id}");
        Ok(())
    }

    fn reverse_key(&self, socket_id: &SocketId, kind: RoomKind) -> String {
        match kind {
            RoomKind::Geohash => socket_geohashes_key(socket_id),
            RoomKind::Project => socket_projects_key(socket_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parkbeat_relay_kv::MemoryKvStore;
    use parkbeat_relay_types::errors::RelayError;
    use pretty_assertions::assert_eq;

    use super::*;

    fn registry() -> (Arc<MemoryKvStore>, SubscriptionRegistry) {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = SubscriptionRegistry::new(kv.clone());
        (kv, registry)
    }

    fn socket(tag: &str) -> SocketId {
        SocketId::from(tag)
    }

    #[tokio::test]
    async fn subscribe_registers_both_sides() {
        let (kv, registry) = registry();
        let s1 = socket("s1");
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();

        let room = kv.hgetall("parkbeat:geohash:dr5ru:sockets").await.unwrap();
        assert!(room.contains_key("s1"));
        let reverse = kv.smembers("parkbeat:sockets:s1:geohashes").await.unwrap();
        assert_eq!(reverse, vec!["dr5ru".to_string()]);
    }

    #[tokio::test]
    async fn double_subscribe_leaves_identical_state() {
        let (kv, registry) = registry();
        let s1 = socket("s1");
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        let before = kv.hgetall("parkbeat:geohash:dr5ru:sockets").await.unwrap();

        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        let after = kv.hgetall("parkbeat:geohash:dr5ru:sockets").await.unwrap();
        assert_eq!(before, after);
        assert_eq!(
            kv.smembers("parkbeat:sockets:s1:geohashes").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn recency_window_damps_resubscribe_storms() {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = SubscriptionRegistry::new(kv.clone());
        let s1 = socket("s1");

        // a record from one second ago is recent, the write is skipped
        let recent = (now_ms() - 1_000).to_string();
        kv.hset("parkbeat:geohash:dr5ru:sockets", "s1", &recent)
            .await
            .unwrap();
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        let room = kv.hgetall("parkbeat:geohash:dr5ru:sockets").await.unwrap();
        assert_eq!(room.get("s1"), Some(&recent));

        // a record from outside the window is refreshed
        let old = (now_ms() - RECENCY_WINDOW_MS - 5_000).to_string();
        kv.hset("parkbeat:geohash:dr5ru:sockets", "s1", &old)
            .await
            .unwrap();
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        let room = kv.hgetall("parkbeat:geohash:dr5ru:sockets").await.unwrap();
        assert!(room.get("s1").unwrap().parse::<i64>().unwrap() > now_ms() - 2_000);
    }

    #[tokio::test]
    async fn unsubscribe_twice_is_idempotent_and_drops_empty_rooms() {
        let (kv, registry) = registry();
        let s1 = socket("s1");
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        registry.unsubscribe_geohash(&s1, "dr5ru").await.unwrap();
        registry.unsubscribe_geohash(&s1, "dr5ru").await.unwrap();

        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn active_subscribers_excludes_and_reports_staleness() {
        let (_kv, registry) = registry();
        let s1 = socket("s1");
        let s2 = socket("s2");
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        registry.subscribe_geohash(&s2, "dr5ru").await.unwrap();

        let all = registry
            .active_subscribers(&Room::geohash("dr5ru"), &[])
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].is_stale(now_ms(), 15_000));

        let minus_origin = registry
            .active_subscribers(&Room::geohash("dr5ru"), &[s1.clone()])
            .await
            .unwrap();
        assert_eq!(minus_origin.len(), 1);
        assert_eq!(minus_origin[0].socket_id, s2);
    }

    #[tokio::test]
    async fn cleanup_converges_to_zero_keys_for_the_socket() {
        let (kv, registry) = registry();
        let s1 = socket("s1");
        let s2 = socket("s2");
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        registry.subscribe_geohash(&s1, "dr5").await.unwrap();
        registry.subscribe_project(&s1, "p1").await.unwrap();
        registry.subscribe_geohash(&s2, "dr5ru").await.unwrap();

        registry
            .cleanup(&s1, &[RoomKind::Geohash, RoomKind::Project])
            .await
            .unwrap();

        for key in kv.keys() {
            assert!(!key.contains("s1"), "key {key} still references s1");
        }
        // the shared room still exists for the other socket
        let room = kv.hgetall("parkbeat:geohash:dr5ru:sockets").await.unwrap();
        assert_eq!(room.len(), 1);
        assert!(room.contains_key("s2"));
    }

    #[tokio::test]
    async fn cleanup_tolerates_missing_forward_entries() {
        let (kv, registry) = registry();
        let s1 = socket("s1");
        // reverse index says dr5ru, forward side never written (simulated drift)
        kv.sadd("parkbeat:sockets:s1:geohashes", "dr5ru").await.unwrap();

        registry.cleanup(&s1, &[RoomKind::Geohash]).await.unwrap();
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn refresh_liveness_touches_every_room() {
        let (kv, registry) = registry();
        let s1 = socket("s1");
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        registry.subscribe_project(&s1, "p1").await.unwrap();

        let stale = (now_ms() - 60_000).to_string();
        kv.hset("parkbeat:geohash:dr5ru:sockets", "s1", &stale)
            .await
            .unwrap();
        kv.hset("parkbeat:project:p1:sockets", "s1", &stale)
            .await
            .unwrap();

        let mut rooms = registry.refresh_liveness(&s1).await.unwrap();
        rooms.sort_by_key(|r| r.to_string());
        assert_eq!(rooms, vec![Room::geohash("dr5ru"), Room::project("p1")]);

        for key in [
            "parkbeat:geohash:dr5ru:sockets",
            "parkbeat:project:p1:sockets",
        ] {
            let last_seen: i64 = kv.hgetall(key).await.unwrap()["s1"].parse().unwrap();
            assert!(now_ms() - last_seen < 2_000);
        }
    }

    /// KV wrapper that fails the first `hset`, for rollback coverage.
    struct FailingHsetKv {
        inner: MemoryKvStore,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl KvStore for FailingHsetKv {
        async fn hset(&self, key: &str, field: &str, value: &str) -> RelayResult<()> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(RelayError::KvError("injected hset failure".into()));
            }
            self.inner.hset(key, field, value).await
        }
        async fn hdel(&self, key: &str, field: &str) -> RelayResult<()> {
            self.inner.hdel(key, field).await
        }
        async fn hlen(&self, key: &str) -> RelayResult<usize> {
            self.inner.hlen(key).await
        }
        async fn hgetall(&self, key: &str) -> RelayResult<HashMap<String, String>> {
            self.inner.hgetall(key).await
        }
        async fn sadd(&self, key: &str, member: &str) -> RelayResult<()> {
            self.inner.sadd(key, member).await
        }
        async fn srem(&self, key: &str, member: &str) -> RelayResult<()> {
            self.inner.srem(key, member).await
        }
        async fn smembers(&self, key: &str) -> RelayResult<Vec<String>> {
            self.inner.smembers(key).await
        }
        async fn del(&self, key: &str) -> RelayResult<()> {
            self.inner.del(key).await
        }
    }

    #[tokio::test]
    async fn failed_forward_write_rolls_back_the_reverse_index() {
        let kv = Arc::new(FailingHsetKv {
            inner: MemoryKvStore::new(),
            failed: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = SubscriptionRegistry::new(kv.clone());
        let s1 = socket("s1");

        let err = registry.subscribe_geohash(&s1, "dr5ru").await.unwrap_err();
        assert!(matches!(err, RelayError::KvError(_)));
        assert!(
            kv.smembers("parkbeat:sockets:s1:geohashes").await.unwrap().is_empty(),
            "reverse index entry should have been rolled back"
        );

        // the next attempt succeeds
        registry.subscribe_geohash(&s1, "dr5ru").await.unwrap();
        assert_eq!(
            kv.smembers("parkbeat:sockets:s1:geohashes").await.unwrap(),
            vec!["dr5ru".to_string()]
        );
    }
}
