use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parkbeat_relay_types::RelayResult;
use parkbeat_relay_types::errors::RelayError;
use redis::cluster::ClusterClient;
use redis::{AsyncCommands, Client, Commands};
use tokio::sync::RwLock;
use tracing::info;

use super::KvStore;
use crate::redis::RedisClientOptions::{Cluster, Single};

enum RedisClientOptions {
    Single(Client),
    Cluster(ClusterClient),
}

/// Redis-backed registry store shared by every relay instance.
pub struct RedisKvStore {
    read_timeout: Duration,
    write_timeout: Duration,
    redis_client: Arc<RwLock<RedisClientOptions>>,
}

impl RedisKvStore {
    pub fn new(
        url: &str,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<RedisKvStore, RelayError> {
        let client = Client::open(url)?;
        let addr = client.get_connection_info().addr().clone();
        info!("[REDIS KV]: Configured single node client {addr:?}");
        Ok(Self {
            redis_client: Arc::new(RwLock::new(Single(client))),
            read_timeout,
            write_timeout,
        })
    }

    pub fn new_with_cluster(
        urls: Vec<String>,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<RedisKvStore, RelayError> {
        info!("[REDIS KV]: Configuring cluster client against {urls:?}");
        let client = ClusterClient::builder(urls)
            .connection_timeout(read_timeout)
            .build()?;
        Ok(Self {
            redis_client: Arc::new(RwLock::new(Cluster(client))),
            read_timeout,
            write_timeout,
        })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> RelayResult<()> {
        let mut client = self.redis_client.write().await;
        match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.write_timeout))
                            .set_response_timeout(Some(self.write_timeout)),
                    )
                    .await?;
                let _: () = conn.hset(key, field, value).await?;
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                let _: () = conn.hset(key, field, value)?;
            }
        };
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> RelayResult<()> {
        let mut client = self.redis_client.write().await;
        match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.write_timeout))
                            .set_response_timeout(Some(self.write_timeout)),
                    )
                    .await?;
                let _: () = conn.hdel(key, field).await?;
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                let _: () = conn.hdel(key, field)?;
            }
        };
        Ok(())
    }

    async fn hlen(&self, key: &str) -> RelayResult<usize> {
        let mut client = self.redis_client.write().await;
        let len: usize = match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.read_timeout))
                            .set_response_timeout(Some(self.read_timeout)),
                    )
                    .await?;
                conn.hlen(key).await?
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                conn.hlen(key)?
            }
        };
        Ok(len)
    }

    async fn hgetall(&self, key: &str) -> RelayResult<HashMap<String, String>> {
        let mut client = self.redis_client.write().await;
        let all: HashMap<String, String> = match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.read_timeout))
                            .set_response_timeout(Some(self.read_timeout)),
                    )
                    .await?;
                conn.hgetall(key).await?
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                conn.hgetall(key)?
            }
        };
        Ok(all)
    }

    async fn sadd(&self, key: &str, member: &str) -> RelayResult<()> {
        let mut client = self.redis_client.write().await;
        match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.write_timeout))
                            .set_response_timeout(Some(self.write_timeout)),
                    )
                    .await?;
                let _: () = conn.sadd(key, member).await?;
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                let _: () = conn.sadd(key, member)?;
            }
        };
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> RelayResult<()> {
        let mut client = self.redis_client.write().await;
        match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.write_timeout))
                            .set_response_timeout(Some(self.write_timeout)),
                    )
                    .await?;
                let _: () = conn.srem(key, member).await?;
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                let _: () = conn.srem(key, member)?;
            }
        };
        Ok(())
    }

    async fn smembers(&self, key: &str) -> RelayResult<Vec<String>> {
        let mut client = self.redis_client.write().await;
        let members: Vec<String> = match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.read_timeout))
                            .set_response_timeout(Some(self.read_timeout)),
                    )
                    .await?;
                conn.smembers(key).await?
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                conn.smembers(key)?
            }
        };
        Ok(members)
    }

    async fn del(&self, key: &str) -> RelayResult<()> {
        let mut client = self.redis_client.write().await;
        match &mut *client {
            Single(c) => {
                let mut conn = c
                    .get_multiplexed_async_connection_with_config(
                        &redis::AsyncConnectionConfig::new()
                            .set_connection_timeout(Some(self.write_timeout))
                            .set_response_timeout(Some(self.write_timeout)),
                    )
                    .await?;
                let _: () = conn.del(key).await?;
            }
            Cluster(c) => {
                let mut conn = c.get_connection()?;
                let _: () = conn.del(key)?;
            }
        };
        Ok(())
    }
}
