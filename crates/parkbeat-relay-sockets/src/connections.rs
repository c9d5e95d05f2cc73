use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parkbeat_relay_types::errors::RelayError;
use parkbeat_relay_types::events::ServerEvent;
use parkbeat_relay_types::rooms::Room;
use parkbeat_relay_types::{RelayResult, SocketId, now_ms};
use prometheus::{IntGauge, register_int_gauge};
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

static CONNECTED_SOCKETS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "relay_connected_sockets",
        "Number of sockets connected to this instance",
    )
    .unwrap()
});

struct ConnectionHandle {
    sender: mpsc::Sender<ServerEvent>,
    user_id: Option<String>,
    connected_at: DateTime<Utc>,
    last_ping_ms: AtomicI64,
    // local mirror of this socket's rooms, used by the heartbeat sweeper so
    // the sweep never touches the KV
    rooms: Mutex<HashSet<Room>>,
}

/// The sockets this instance owns. One bounded outbound channel per socket:
/// business events apply backpressure to their emitter, droppable frames
/// (heartbeat, pong) are shed when the channel is full and replaced by the
/// next sweep.
pub struct ConnectionRegistry {
    connections: DashMap<SocketId, Arc<ConnectionHandle>>,
    outbound_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            outbound_capacity,
        }
    }

    /// Registers a fresh socket and returns the receiving half its writer
    /// task forwards to the transport.
    pub fn register(
        &self,
        socket_id: &SocketId,
        user_id: Option<String>,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.connections.insert(
            socket_id.clone(),
            Arc::new(ConnectionHandle {
                sender: tx,
                user_id,
                connected_at: Utc::now(),
                last_ping_ms: AtomicI64::new(now_ms()),
                rooms: Mutex::new(HashSet::new()),
            }),
        );
        CONNECTED_SOCKETS.set(self.connections.len() as i64);
        debug!("Registered socket {socket_id}");
        rx
    }

    pub fn deregister(&self, socket_id: &SocketId) {
        self.connections.remove(socket_id);
        CONNECTED_SOCKETS.set(self.connections.len() as i64);
        debug!("Deregistered socket {socket_id}");
    }

    pub fn is_connected(&self, socket_id: &SocketId) -> bool {
        self.connections.contains_key(socket_id)
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_id(&self, socket_id: &SocketId) -> Option<String> {
        self.connections
            .get(socket_id)
            .and_then(|handle| handle.user_id.clone())
    }

    pub fn connected_at(&self, socket_id: &SocketId) -> Option<DateTime<Utc>> {
        self.connections.get(socket_id).map(|h| h.connected_at)
    }

    /// Delivers a business event, blocking the caller while the socket's
    /// outbound queue is full.
    pub async fn send(&self, socket_id: &SocketId, event: ServerEvent) -> RelayResult<()> {
        let handle = self
            .connections
            .get(socket_id)
            .map(|entry| entry.value().clone())
            .ok_or(RelayError::SocketClosed)?;
        handle
            .sender
            .send(event)
            .await
            .map_err(|e| RelayError::SocketSendError(e.to_string()))
    }

    /// Best-effort delivery for droppable frames.
    pub fn send_droppable(&self, socket_id: &SocketId, event: ServerEvent) {
        if let Some(handle) = self.connections.get(socket_id)
            && let Err(e) = handle.sender.try_send(event)
        {
            trace!("Dropped frame for {socket_id}: {e}");
        }
    }

    pub fn record_ping(&self, socket_id: &SocketId) {
        if let Some(handle) = self.connections.get(socket_id) {
            handle.last_ping_ms.store(now_ms(), Ordering::Relaxed);
        }
    }

    pub fn last_ping_ms(&self, socket_id: &SocketId) -> Option<i64> {
        self.connections
            .get(socket_id)
            .map(|h| h.last_ping_ms.load(Ordering::Relaxed))
    }

    pub fn join_room(&self, socket_id: &SocketId, room: Room) {
        if let Some(handle) = self.connections.get(socket_id) {
            handle.rooms.lock().expect("room set poisoned").insert(room);
        }
    }

    pub fn leave_room(&self, socket_id: &SocketId, room: &Room) {
        if let Some(handle) = self.connections.get(socket_id) {
            handle.rooms.lock().expect("room set poisoned").remove(room);
        }
    }

    pub fn rooms(&self, socket_id: &SocketId) -> Vec<Room> {
        self.connections
            .get(socket_id)
            .map(|handle| {
                handle
                    .rooms
                    .lock()
                    .expect("room set poisoned")
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn socket_ids(&self) -> Vec<SocketId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Sockets whose outbound side is gone (writer task dropped the
    /// receiver). The heartbeat sweep reaps these.
    pub fn closed_sockets(&self) -> Vec<SocketId> {
        self.connections
            .iter()
            .filter(|e| e.value().sender.is_closed())
            .map(|e| e.key().clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}
