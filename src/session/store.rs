// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Key-value session store.
//!
//! All session-scoped state lives behind the [`SessionStore`] trait: hashes
//! for session and conversation attributes, a set of active session ids, and
//! a list per conversation for chat history. Two implementations are
//! provided: [`RedisStore`] for production and [`MemoryStore`] for tests and
//! for running without Redis.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Minimal hash/set/list store with per-key TTL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Set multiple fields on a hash, creating it if absent.
    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// Get one hash field.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Get all fields of a hash; empty map if the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// List the members of a set.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Push a value onto the front of a list.
    async fn list_push_front(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Trim a list to the inclusive index range (negative indices count from
    /// the end, as in Redis).
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError>;

    /// Read the inclusive index range of a list.
    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError>;

    /// Set a key's time-to-live in seconds.
    async fn expire(&self, key: &str, seconds: i64) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis-backed store over a multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a ping.
    pub async fn connect(host: &str, port: u16, db: i64) -> Result<Self, StoreError> {
        let client = redis::Client::open(format!("redis://{}:{}/{}", host, port, db))?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn list_push_front(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, seconds).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Slot {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if Instant::now() >= at)
    }
}

/// In-process store with lazily enforced TTLs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` over the live (non-expired) entry map.
    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut map = self.inner.lock().expect("memory store poisoned");
        map.retain(|_, entry| !entry.expired());
        f(&mut map)
    }
}

/// Resolve a Redis-style index (negative counts from the end) to [0, len].
fn resolve_index(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        (index as usize).min(len)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        self.with_map(|map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::Hash(HashMap::new()),
                expires_at: None,
            });
            if let Slot::Hash(hash) = &mut entry.slot {
                for (field, value) in fields {
                    hash.insert((*field).to_string(), value.clone());
                }
            }
        });
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.with_map(|map| match map.get(key) {
            Some(Entry {
                slot: Slot::Hash(hash),
                ..
            }) => hash.get(field).cloned(),
            _ => None,
        }))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.with_map(|map| match map.get(key) {
            Some(Entry {
                slot: Slot::Hash(hash),
                ..
            }) => hash.clone(),
            _ => HashMap::new(),
        }))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_map(|map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::Set(HashSet::new()),
                expires_at: None,
            });
            if let Slot::Set(set) = &mut entry.slot {
                set.insert(member.to_string());
            }
        });
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_map(|map| {
            if let Some(Entry {
                slot: Slot::Set(set),
                ..
            }) = map.get_mut(key)
            {
                set.remove(member);
            }
        });
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.with_map(|map| match map.get(key) {
            Some(Entry {
                slot: Slot::Set(set),
                ..
            }) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }))
    }

    async fn list_push_front(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.with_map(|map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::List(VecDeque::new()),
                expires_at: None,
            });
            if let Slot::List(list) = &mut entry.slot {
                list.push_front(value);
            }
        });
        Ok(())
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        self.with_map(|map| {
            if let Some(Entry {
                slot: Slot::List(list),
                ..
            }) = map.get_mut(key)
            {
                let len = list.len();
                if len == 0 {
                    return;
                }
                let start = resolve_index(start, len);
                let stop = resolve_index(stop, len).min(len - 1);
                if start > stop {
                    list.clear();
                } else {
                    let kept: VecDeque<String> = list.range(start..=stop).cloned().collect();
                    *list = kept;
                }
            }
        });
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self.with_map(|map| match map.get(key) {
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => {
                let len = list.len();
                if len == 0 {
                    return Vec::new();
                }
                let start = resolve_index(start, len);
                let stop = resolve_index(stop, len).min(len - 1);
                if start > stop {
                    Vec::new()
                } else {
                    list.range(start..=stop).cloned().collect()
                }
            }
            _ => Vec::new(),
        }))
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), StoreError> {
        self.with_map(|map| {
            if let Some(entry) = map.get_mut(key) {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds.max(0) as u64));
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_set_and_get() {
        let store = MemoryStore::new();
        store
            .hash_set("session:1", &[("state", "NEW".to_string())])
            .await
            .unwrap();
        assert_eq!(
            store.hash_get("session:1", "state").await.unwrap(),
            Some("NEW".to_string())
        );
        assert_eq!(store.hash_get("session:1", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_get_all() {
        let store = MemoryStore::new();
        store
            .hash_set(
                "h",
                &[("a", "1".to_string()), ("b", "2".to_string())],
            )
            .await
            .unwrap();
        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], "1");
        assert!(store.hash_get_all("absent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = MemoryStore::new();
        store.set_add("s", "x").await.unwrap();
        store.set_add("s", "y").await.unwrap();
        store.set_add("s", "x").await.unwrap();
        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["x", "y"]);
        store.set_remove("s", "x").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["y"]);
    }

    #[tokio::test]
    async fn test_list_push_front_order() {
        let store = MemoryStore::new();
        store.list_push_front("l", "first".to_string()).await.unwrap();
        store.list_push_front("l", "second".to_string()).await.unwrap();
        let items = store.list_range("l", 0, -1).await.unwrap();
        assert_eq!(items, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_list_range_bounds() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.list_push_front("l", i.to_string()).await.unwrap();
        }
        // List is [4, 3, 2, 1, 0].
        assert_eq!(store.list_range("l", 0, 1).await.unwrap(), vec!["4", "3"]);
        assert_eq!(store.list_range("l", 0, 99).await.unwrap().len(), 5);
        assert!(store.list_range("l", 4, 1).await.unwrap().is_empty());
        assert!(store.list_range("absent", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_trim_keeps_prefix() {
        let store = MemoryStore::new();
        for i in 0..6 {
            store.list_push_front("l", i.to_string()).await.unwrap();
        }
        store.list_trim("l", 0, 2).await.unwrap();
        let items = store.list_range("l", 0, -1).await.unwrap();
        assert_eq!(items, vec!["5", "4", "3"]);
    }

    #[tokio::test]
    async fn test_expire_removes_key() {
        let store = MemoryStore::new();
        store
            .hash_set("k", &[("f", "v".to_string())])
            .await
            .unwrap();
        store.expire("k", 0).await.unwrap();
        // TTL of zero expires immediately.
        assert_eq!(store.hash_get("k", "f").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_future_keeps_key() {
        let store = MemoryStore::new();
        store
            .hash_set("k", &[("f", "v".to_string())])
            .await
            .unwrap();
        store.expire("k", 3600).await.unwrap();
        assert_eq!(
            store.hash_get("k", "f").await.unwrap(),
            Some("v".to_string())
        );
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(0, 5), 0);
        assert_eq!(resolve_index(3, 5), 3);
        assert_eq!(resolve_index(9, 5), 5);
        assert_eq!(resolve_index(-1, 5), 4);
        assert_eq!(resolve_index(-5, 5), 0);
        assert_eq!(resolve_index(-9, 5), 0);
    }
}
