//! Keyed store adapter shared by the rate limiter, response cache, and
//! analytics pipeline.
//!
//! Every counter and cache entry lives in one key-value store behind the
//! [`KeyValueStore`] trait. The production backend is Redis over a single
//! multiplexed connection; when no Redis URL is configured the service runs
//! on the in-process [`MemoryStore`] instead, which keeps a single-node
//! deployment (and the test suite) working without external infrastructure.
//!
//! Key namespaces are fixed string prefixes (`rate_limit:`, per-route cache
//! prefixes, `analytics:`) and no two components touch each other's keys, so
//! the store's atomic increment is the only concurrency primitive needed.

use crate::error::GateError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Batch size for SCAN iterations and bulk deletes.
const SCAN_COUNT: usize = 100;

/// Upper bound on any single store operation. A store that stops answering
/// must surface as an error the callers can fail open on, not as a hung
/// request.
const OP_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, GateError>;

    /// Set a value with a TTL; overwrites any existing value and TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GateError>;

    /// Delete a single key. Deleting an absent key is a no-op success.
    async fn delete(&self, key: &str) -> Result<(), GateError>;

    /// Expand the prefix to all matching keys and delete them.
    /// Returns the number of keys removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, GateError>;

    /// Atomic increment; creates the key at 1 if absent.
    /// Returns the post-increment value.
    async fn increment(&self, key: &str) -> Result<i64, GateError>;

    /// Atomic decrement; creates the key at -1 if absent.
    async fn decrement(&self, key: &str) -> Result<i64, GateError>;

    /// Set a TTL on an existing key without touching its value.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), GateError>;

    /// All live keys under a prefix.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, GateError>;

    async fn ping(&self) -> Result<(), GateError>;
}

/// Redis-backed store over one multiplexed async connection.
///
/// The connection is established once at startup and cloned per operation;
/// reconnection on transient failure is the redis client's concern. Every
/// command is bounded by [`OP_TIMEOUT`] so callers never await the store
/// indefinitely.
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, GateError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { connection })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    async fn run<T, F>(&self, op: F) -> Result<T, GateError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(OP_TIMEOUT, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GateError::StoreUnavailable(
                "store operation timed out".to_string(),
            )),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GateError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GateError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(key).arg(ttl.as_secs().max(1)).arg(value);
        self.run(async move { cmd.query_async::<_, ()>(&mut conn).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), GateError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.run(async move { cmd.query_async::<_, ()>(&mut conn).await })
            .await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, GateError> {
        let keys = self.scan_prefix(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut removed: u64 = 0;
        for chunk in keys.chunks(SCAN_COUNT) {
            let mut conn = self.conn();
            let mut cmd = redis::cmd("DEL");
            for key in chunk {
                cmd.arg(key);
            }
            let count: u64 = self
                .run(async move { cmd.query_async(&mut conn).await })
                .await?;
            removed += count;
        }

        debug!(prefix = %prefix, removed, "deleted keys by prefix");
        Ok(removed)
    }

    async fn increment(&self, key: &str) -> Result<i64, GateError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.run(async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn decrement(&self, key: &str) -> Result<i64, GateError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("DECR");
        cmd.arg(key);
        self.run(async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), GateError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(ttl.as_secs().max(1));
        self.run(async move { cmd.query_async::<_, ()>(&mut conn).await })
            .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, GateError> {
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let mut conn = self.conn();
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT);
            let (next, batch): (u64, Vec<String>) = self
                .run(async move { cmd.query_async(&mut conn).await })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn ping(&self) -> Result<(), GateError> {
        let mut conn = self.conn();
        let cmd = redis::cmd("PING");
        self.run(async move { cmd.query_async::<_, String>(&mut conn).await })
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store with lazy TTL eviction.
///
/// Mirrors Redis semantics closely enough for the limiter and cache:
/// INCR/DECR create absent keys at 0 before applying, and an increment
/// preserves any TTL already on the key.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn evict_expired(entries: &mut HashMap<String, MemoryEntry>, key: &str) {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64, GateError> {
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key);

        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry.value.parse().unwrap_or(0);
        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GateError> {
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, key);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GateError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), GateError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, GateError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn increment(&self, key: &str) -> Result<i64, GateError> {
        self.add(key, 1).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, GateError> {
        self.add(key, -1).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), GateError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, GateError> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), GateError> {
        Ok(())
    }
}
