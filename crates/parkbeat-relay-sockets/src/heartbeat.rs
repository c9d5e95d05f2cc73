use std::sync::Arc;
use std::time::Duration;

use parkbeat_relay_cleanup::CleanupQueue;
use parkbeat_relay_types::events::{HeartbeatFrame, ServerEvent};
use parkbeat_relay_types::now_ms;
use tokio::time::interval;
use tracing::debug;

use crate::connections::ConnectionRegistry;

/// Emits a `heartbeat` frame per subscribed room on every tick and reaps
/// sockets whose writer side has gone away. Cadence should stay at or below
/// a third of the idle expiry so clients always see a beat between pings.
pub fn spawn_heartbeat(
    connections: Arc<ConnectionRegistry>,
    cleanup: Arc<CleanupQueue>,
    heartbeat_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            sweep(&connections, &cleanup).await;
        }
    })
}

async fn sweep(connections: &ConnectionRegistry, cleanup: &CleanupQueue) {
    for socket_id in connections.closed_sockets() {
        debug!("Reaping closed socket {socket_id}");
        connections.deregister(&socket_id);
        cleanup.enqueue_opportunistic(&socket_id).await;
    }

    for socket_id in connections.socket_ids() {
        let last_ping_time = connections.last_ping_ms(&socket_id).unwrap_or_else(now_ms);
        for room in connections.rooms(&socket_id) {
            connections.send_droppable(
                &socket_id,
                ServerEvent::Heartbeat(HeartbeatFrame {
                    room,
                    last_ping_time,
                }),
            );
        }
    }
}
