use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use parkbeat_relay_types::RelayResult;
use parkbeat_relay_types::errors::RelayError;

use super::KvStore;

enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

/// In-process KV twin with redis hash/set semantics (empty collections vanish,
/// type mismatches error). Backs the `memory` run mode and the test suites.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Value>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

fn wrong_type(key: &str) -> RelayError {
    RelayError::KvError(format!(
        "WRONGTYPE operation against a key holding the wrong kind of value: {key}"
    ))
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> RelayResult<()> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        match entry.value_mut() {
            Value::Hash(hash) => {
                hash.insert(field.to_string(), value.to_string());
                Ok(())
            }
            Value::Set(_) => Err(wrong_type(key)),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> RelayResult<()> {
        let emptied = match self.entries.get_mut(key) {
            Some(mut entry) => match entry.value_mut() {
                Value::Hash(hash) => {
                    hash.remove(field);
                    hash.is_empty()
                }
                Value::Set(_) => return Err(wrong_type(key)),
            },
            None => false,
        };
        if emptied {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn hlen(&self, key: &str) -> RelayResult<usize> {
        match self.entries.get(key) {
            Some(entry) => match entry.value() {
                Value::Hash(hash) => Ok(hash.len()),
                Value::Set(_) => Err(wrong_type(key)),
            },
            None => Ok(0),
        }
    }

    async fn hgetall(&self, key: &str) -> RelayResult<HashMap<String, String>> {
        match self.entries.get(key) {
            Some(entry) => match entry.value() {
                Value::Hash(hash) => Ok(hash.clone()),
                Value::Set(_) => Err(wrong_type(key)),
            },
            None => Ok(HashMap::new()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> RelayResult<()> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(HashSet::new()));
        match entry.value_mut() {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            Value::Hash(_) => Err(wrong_type(key)),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> RelayResult<()> {
        let emptied = match self.entries.get_mut(key) {
            Some(mut entry) => match entry.value_mut() {
                Value::Set(set) => {
                    set.remove(member);
                    set.is_empty()
                }
                Value::Hash(_) => return Err(wrong_type(key)),
            },
            None => false,
        };
        if emptied {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> RelayResult<Vec<String>> {
        match self.entries.get(key) {
            Some(entry) => match entry.value() {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                Value::Hash(_) => Err(wrong_type(key)),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn del(&self, key: &str) -> RelayResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn hash_operations_round_trip() {
        let kv = MemoryKvStore::new();
        kv.hset("room", "s1", "100").await.unwrap();
        kv.hset("room", "s2", "200").await.unwrap();
        kv.hset("room", "s1", "150").await.unwrap();

        assert_eq!(kv.hlen("room").await.unwrap(), 2);
        let all = kv.hgetall("room").await.unwrap();
        assert_eq!(all.get("s1"), Some(&"150".to_string()));
        assert_eq!(all.get("s2"), Some(&"200".to_string()));
    }

    #[tokio::test]
    async fn empty_collections_disappear() {
        let kv = MemoryKvStore::new();
        kv.hset("room", "s1", "100").await.unwrap();
        kv.hdel("room", "s1").await.unwrap();
        assert_eq!(kv.key_count(), 0);

        kv.sadd("idx", "a").await.unwrap();
        kv.srem("idx", "a").await.unwrap();
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn missing_keys_read_as_empty() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.hlen("nope").await.unwrap(), 0);
        assert!(kv.hgetall("nope").await.unwrap().is_empty());
        assert!(kv.smembers("nope").await.unwrap().is_empty());
        kv.hdel("nope", "field").await.unwrap();
        kv.del("nope").await.unwrap();
    }

    #[tokio::test]
    async fn type_mismatch_errors_like_redis() {
        let kv = MemoryKvStore::new();
        kv.hset("key", "f", "v").await.unwrap();
        let err = kv.sadd("key", "member").await.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[tokio::test]
    async fn set_operations_round_trip() {
        let kv = MemoryKvStore::new();
        kv.sadd("idx", "dr5ru").await.unwrap();
        kv.sadd("idx", "dr5ru").await.unwrap();
        kv.sadd("idx", "dr5").await.unwrap();

        let mut members = kv.smembers("idx").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["dr5".to_string(), "dr5ru".to_string()]);
    }
}
