use std::collections::HashMap;

use async_trait::async_trait;
use parkbeat_relay_types::RelayResult;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryKvStore;
pub use self::redis::RedisKvStore;

/// The slice of the external KV store the relay consumes: hashes, sets and
/// whole-key deletion. Subscription maps live here so that any stateless
/// instance can read and repair them.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hset(&self, key: &str, field: &str, value: &str) -> RelayResult<()>;
    async fn hdel(&self, key: &str, field: &str) -> RelayResult<()>;
    async fn hlen(&self, key: &str) -> RelayResult<usize>;
    async fn hgetall(&self, key: &str) -> RelayResult<HashMap<String, String>>;
    async fn sadd(&self, key: &str, member: &str) -> RelayResult<()>;
    async fn srem(&self, key: &str, member: &str) -> RelayResult<()>;
    async fn smembers(&self, key: &str) -> RelayResult<Vec<String>>;
    async fn del(&self, key: &str) -> RelayResult<()>;
}
