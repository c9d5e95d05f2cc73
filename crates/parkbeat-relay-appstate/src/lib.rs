use std::sync::Arc;

use parkbeat_relay_cleanup::CleanupQueue;
use parkbeat_relay_kv::{KvStore, MemoryKvStore};
use parkbeat_relay_registry::SubscriptionRegistry;
use parkbeat_relay_sockets::{ConnectionRegistry, DEFAULT_OUTBOUND_CAPACITY, FanoutEngine};
use parkbeat_relay_store::{MemoryProjectStore, ProjectStore};
use parkbeat_relay_types::RECENCY_WINDOW_MS;

/// Everything a handler needs, wired once at startup and cloned into every
/// route and background task.
#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub store: Arc<dyn ProjectStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub cleanup: Arc<CleanupQueue>,
    pub fanout: Arc<FanoutEngine>,
}

impl AppState {
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

pub struct AppStateBuilder {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn ProjectStore>,
    outbound_capacity: usize,
    recency_window_ms: i64,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            store: Arc::new(MemoryProjectStore::new()),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            recency_window_ms: RECENCY_WINDOW_MS,
        }
    }

    pub fn with_kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = kv;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_outbound_capacity(mut self, outbound_capacity: usize) -> Self {
        self.outbound_capacity = outbound_capacity;
        self
    }

    pub fn with_recency_window_ms(mut self, recency_window_ms: i64) -> Self {
        self.recency_window_ms = recency_window_ms;
        self
    }

    pub fn build(self) -> AppState {
        let registry = Arc::new(SubscriptionRegistry::with_recency_window(
            self.kv.clone(),
            self.recency_window_ms,
        ));
        let connections = Arc::new(ConnectionRegistry::new(self.outbound_capacity));
        let cleanup = Arc::new(CleanupQueue::new(self.kv.clone(), registry.clone()));
        let fanout = Arc::new(FanoutEngine::new(
            registry.clone(),
            connections.clone(),
            cleanup.clone(),
        ));
        AppState {
            kv: self.kv,
            store: self.store,
            registry,
            connections,
            cleanup,
            fanout,
        }
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
