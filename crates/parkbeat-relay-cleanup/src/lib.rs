use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parkbeat_relay_kv::KvStore;
use parkbeat_relay_registry::SubscriptionRegistry;
use parkbeat_relay_types::rooms::{CleanupQueueEntry, RoomKind, cleanup_queue_key};
use parkbeat_relay_types::{CLEANUP_ENTRY_TTL_MS, RelayResult, SocketId, now_ms};
use prometheus::{IntCounter, register_int_counter};
use tokio::time::interval;
use tracing::{debug, info, warn};

static CLEANUPS_DRAINED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "relay_cleanups_drained",
        "Number of cleanup queue entries drained by this instance",
    )
    .unwrap()
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainStats {
    pub drained: usize,
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Distributed garbage collector for orphaned subscriptions. The queue is a
/// shared KV hash; the process that owned a socket enqueues it on
/// close/error, and every process drains on connect and on a timer, so a
/// crashed instance's sockets are reclaimed by whichever instance runs next.
pub struct CleanupQueue {
    kv: Arc<dyn KvStore>,
    registry: Arc<SubscriptionRegistry>,
}

impl CleanupQueue {
    pub fn new(kv: Arc<dyn KvStore>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self { kv, registry }
    }

    /// Marks a socket's registry records for reclamation. Never blocks socket
    /// teardown on anything beyond this single KV write.
    pub async fn enqueue(&self, socket_id: &SocketId, scope: Vec<RoomKind>) -> RelayResult<()> {
        let entry = CleanupQueueEntry {
            enqueued_at: now_ms(),
            scope,
        };
        self.kv
            .hset(
                &cleanup_queue_key(),
                socket_id.as_str(),
                &serde_json::to_string(&entry)?,
            )
            .await?;
        debug!("Enqueued cleanup for {socket_id}");
        Ok(())
    }

    /// Fire-and-forget variant used on the read path when a reader observes a
    /// stale subscriber. Failures only get logged; the next reader retries.
    pub async fn enqueue_opportunistic(&self, socket_id: &SocketId) {
        if let Err(e) = self
            .enqueue(socket_id, vec![RoomKind::Geohash, RoomKind::Project])
            .await
        {
            warn!("Opportunistic cleanup enqueue for {socket_id} failed: {e}");
        }
    }

    pub async fn drain(&self) -> RelayResult<DrainStats> {
        self.drain_with_filter(|_| false).await
    }

    /// Drains every queued entry. `skip_socket` lets the caller protect
    /// sockets it still owns a live transport for (their entry stays queued
    /// and is retried after they actually go away). Entries are deleted only
    /// after a successful cleanup, so a failed cleanup retries on the next
    /// cycle; entries past their TTL are dropped unconditionally. Cleanups
    /// are idempotent, concurrent drains from other instances are harmless.
    pub async fn drain_with_filter(
        &self,
        skip_socket: impl Fn(&SocketId) -> bool,
    ) -> RelayResult<DrainStats> {
        let queue_key = cleanup_queue_key();
        let entries = self.kv.hgetall(&queue_key).await?;
        let mut stats = DrainStats::default();
        let now = now_ms();

        for (raw_socket, raw_entry) in entries {
            let socket_id = SocketId::from(raw_socket.as_str());
            let entry: CleanupQueueEntry = match serde_json::from_str(&raw_entry) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Dropping unreadable cleanup entry for {socket_id}: {e}");
                    self.kv.hdel(&queue_key, &raw_socket).await?;
                    stats.expired += 1;
                    continue;
                }
            };

            if now - entry.enqueued_at > CLEANUP_ENTRY_TTL_MS {
                debug!("Dropping cleanup entry for {socket_id}, past queue TTL");
                self.kv.hdel(&queue_key, &raw_socket).await?;
                stats.expired += 1;
                continue;
            }

            if skip_socket(&socket_id) {
                stats.skipped += 1;
                continue;
            }

            match self.registry.cleanup(&socket_id, &entry.scope).await {
                Ok(()) => {
                    self.kv.hdel(&queue_key, &raw_socket).await?;
                    CLEANUPS_DRAINED.inc();
                    stats.drained += 1;
                }
                Err(e) => {
                    warn!("Cleanup of {socket_id} failed, leaving entry queued: {e}");
                    stats.failed += 1;
                }
            }
        }

        if stats != DrainStats::default() {
            info!(
                "Cleanup drain: {} drained, {} expired, {} skipped, {} failed",
                stats.drained, stats.expired, stats.skipped, stats.failed
            );
        }
        Ok(stats)
    }
}

/// Periodic drain, spawned once per instance next to the other background
/// tasks. An immediate first tick covers the "drain on connect" obligation
/// for instances that boot without traffic.
pub fn spawn_cleanup_loop(
    queue: Arc<CleanupQueue>,
    drain_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(drain_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = queue.drain().await {
                warn!("Periodic cleanup drain failed: {e}");
            }
        }
    })
}
