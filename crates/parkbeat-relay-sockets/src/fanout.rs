use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use parkbeat_relay_cleanup::CleanupQueue;
use parkbeat_relay_registry::SubscriptionRegistry;
use parkbeat_relay_types::events::ServerEvent;
use parkbeat_relay_types::geo::fanout_prefixes;
use parkbeat_relay_types::rooms::Room;
use parkbeat_relay_types::{RelayResult, STALE_EXPIRY_MS, SocketId, now_ms};
use prometheus::{IntCounter, register_int_counter};
use tracing::{debug, warn};

use crate::connections::ConnectionRegistry;

static FANNED_OUT_EVENTS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "relay_fanned_out_events",
        "Events delivered to subscribers by the fan-out engine",
    )
    .unwrap()
});

/// Computes the notify set for a mutated project and pushes the event through
/// the connection layer. Only sockets this instance owns receive anything;
/// ids recorded by sibling instances are skipped here and served by their own
/// fan-out. Stale records observed along the way get an opportunistic
/// cleanup scheduled.
pub struct FanoutEngine {
    registry: Arc<SubscriptionRegistry>,
    connections: Arc<ConnectionRegistry>,
    cleanup: Arc<CleanupQueue>,
}

impl FanoutEngine {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        connections: Arc<ConnectionRegistry>,
        cleanup: Arc<CleanupQueue>,
    ) -> Self {
        Self {
            registry,
            connections,
            cleanup,
        }
    }

    /// Notifies every subscriber whose subscribed prefix is a prefix of
    /// `geohash`, walking `g[0..L], g[0..L-1], …, g[0..1]`. A socket
    /// subscribed to several matching prefixes is notified exactly once.
    pub async fn fanout_geohash(
        &self,
        geohash: &str,
        event: &ServerEvent,
        exclude: Option<&SocketId>,
    ) -> RelayResult<usize> {
        let exclude_list: Vec<SocketId> = exclude.cloned().into_iter().collect();
        let mut notify_set: HashSet<SocketId> = HashSet::new();
        let now = now_ms();

        for prefix in fanout_prefixes(geohash) {
            let room = Room::geohash(prefix);
            for record in self.registry.active_subscribers(&room, &exclude_list).await? {
                if record.is_stale(now, STALE_EXPIRY_MS)
                    && !self.connections.is_connected(&record.socket_id)
                {
                    self.cleanup.enqueue_opportunistic(&record.socket_id).await;
                    continue;
                }
                notify_set.insert(record.socket_id);
            }
        }

        self.deliver(notify_set, event).await
    }

    /// Single-room fan-out for `project:<id>` subscribers.
    pub async fn fanout_project(
        &self,
        project_id: &str,
        event: &ServerEvent,
        exclude: Option<&SocketId>,
    ) -> RelayResult<usize> {
        let exclude_list: Vec<SocketId> = exclude.cloned().into_iter().collect();
        let room = Room::project(project_id);
        let mut notify_set: HashSet<SocketId> = HashSet::new();
        let now = now_ms();

        for record in self.registry.active_subscribers(&room, &exclude_list).await? {
            if record.is_stale(now, STALE_EXPIRY_MS)
                && !self.connections.is_connected(&record.socket_id)
            {
                self.cleanup.enqueue_opportunistic(&record.socket_id).await;
                continue;
            }
            notify_set.insert(record.socket_id);
        }

        self.deliver(notify_set, event).await
    }

    async fn deliver(
        &self,
        notify_set: HashSet<SocketId>,
        event: &ServerEvent,
    ) -> RelayResult<usize> {
        let mut delivered = 0usize;
        for socket_id in notify_set {
            if !self.connections.is_connected(&socket_id) {
                continue;
            }
            match self.connections.send(&socket_id, event.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // the socket died between the membership read and the
                    // write; its close path owns the cleanup
                    warn!("Fan-out write to {socket_id} failed: {e}");
                }
            }
        }
        FANNED_OUT_EVENTS.inc_by(delivered as u64);
        debug!("Fanned {} out to {delivered} sockets", event.kind());
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use parkbeat_relay_kv::{KvStore, MemoryKvStore};
    use parkbeat_relay_types::events::DeleteProjectRequest;
    use parkbeat_relay_types::rooms::cleanup_queue_key;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;

    struct Fixture {
        kv: Arc<MemoryKvStore>,
        registry: Arc<SubscriptionRegistry>,
        connections: Arc<ConnectionRegistry>,
        engine: FanoutEngine,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = Arc::new(SubscriptionRegistry::new(kv.clone()));
        let connections = Arc::new(ConnectionRegistry::default());
        let cleanup = Arc::new(CleanupQueue::new(kv.clone(), registry.clone()));
        let engine = FanoutEngine::new(registry.clone(), connections.clone(), cleanup);
        Fixture {
            kv,
            registry,
            connections,
            engine,
        }
    }

    async fn connect_and_subscribe(
        fx: &Fixture,
        tag: &str,
        prefixes: &[&str],
    ) -> (SocketId, mpsc::Receiver<ServerEvent>) {
        let socket = SocketId::from(tag);
        let rx = fx.connections.register(&socket, None);
        for prefix in prefixes {
            fx.registry.subscribe_geohash(&socket, prefix).await.unwrap();
        }
        (socket, rx)
    }

    fn event() -> ServerEvent {
        ServerEvent::DeleteProject(DeleteProjectRequest { id: "p1".into() })
    }

    #[tokio::test]
    async fn notifies_every_matching_prefix_subscriber() {
        let fx = fixture();
        let (_a, mut rx_a) = connect_and_subscribe(&fx, "a", &["dr5r"]).await;
        let (_b, mut rx_b) = connect_and_subscribe(&fx, "b", &["dr5ru8"]).await;
        let (_c, mut rx_c) = connect_and_subscribe(&fx, "c", &["9q8yy"]).await;

        let delivered = fx
            .engine
            .fanout_geohash("dr5ru8aaa", &event(), None)
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn socket_on_multiple_prefixes_is_notified_exactly_once() {
        let fx = fixture();
        let (_a, mut rx) = connect_and_subscribe(&fx, "a", &["a", "ab", "abc"]).await;

        let delivered = fx
            .engine
            .fanout_geohash("abcdef", &event(), None)
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn origin_socket_can_be_excluded() {
        let fx = fixture();
        let (origin, mut rx_origin) = connect_and_subscribe(&fx, "origin", &["dr5r"]).await;
        let (_other, mut rx_other) = connect_and_subscribe(&fx, "other", &["dr5r"]).await;

        let delivered = fx
            .engine
            .fanout_geohash("dr5ru8aaa", &event(), Some(&origin))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(rx_origin.try_recv().is_err());
        assert!(rx_other.try_recv().is_ok());
    }

    #[tokio::test]
    async fn ghost_subscribers_are_skipped_and_scheduled_for_cleanup() {
        let fx = fixture();
        // never connected locally, and stale: a crashed instance left it behind
        fx.kv
            .hset(
                "parkbeat:geohash:dr5r:sockets",
                "ghost",
                &(now_ms() - STALE_EXPIRY_MS - 1_000).to_string(),
            )
            .await
            .unwrap();
        fx.kv
            .sadd("parkbeat:sockets:ghost:geohashes", "dr5r")
            .await
            .unwrap();

        let delivered = fx
            .engine
            .fanout_geohash("dr5ru8aaa", &event(), None)
            .await
            .unwrap();

        assert_eq!(delivered, 0);
        let queued = fx.kv.hgetall(&cleanup_queue_key()).await.unwrap();
        assert!(queued.contains_key("ghost"));
    }

    #[tokio::test]
    async fn fresh_remote_subscribers_are_left_for_their_own_instance() {
        let fx = fixture();
        fx.kv
            .hset(
                "parkbeat:geohash:dr5r:sockets",
                "remote",
                &now_ms().to_string(),
            )
            .await
            .unwrap();

        let delivered = fx
            .engine
            .fanout_geohash("dr5ru8aaa", &event(), None)
            .await
            .unwrap();

        assert_eq!(delivered, 0);
        let queued = fx.kv.hgetall(&cleanup_queue_key()).await.unwrap();
        assert!(queued.is_empty(), "fresh remote socket must not be reaped");
    }

    #[tokio::test]
    async fn project_room_fanout_hits_only_that_room() {
        let fx = fixture();
        let p_sub = SocketId::from("p-sub");
        let mut rx_p = fx.connections.register(&p_sub, None);
        fx.registry.subscribe_project(&p_sub, "p1").await.unwrap();
        let (_geo, mut rx_geo) = connect_and_subscribe(&fx, "geo", &["dr5r"]).await;

        let delivered = fx
            .engine
            .fanout_project("p1", &event(), None)
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(rx_p.try_recv().is_ok());
        assert!(rx_geo.try_recv().is_err());
    }
}
