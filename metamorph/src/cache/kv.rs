//! Key-value store abstraction.
//!
//! The cache engine and queue façade coordinate exclusively through these
//! operations. Production uses Redis; tests and single-node mode use the
//! in-memory implementation, whose TTLs run on `tokio::time` so virtual-time
//! tests can fast-forward expiry.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redis::aio::MultiplexedConnection;

use crate::Result;

/// Minimal key-value surface used for cache records and in-flight markers.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Fetch several keys in one round-trip, preserving order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several keys in one batched operation.
    async fn set_many(&self, pairs: &[(String, String)]) -> Result<()>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Set the key only if it does not exist, with a TTL. Returns whether the
    /// write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
}

/// Redis-backed [`KvStore`].
pub struct RedisKv {
    client: redis::Client,
}

impl RedisKv {
    pub fn connect(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Cheap reachability probe for readiness checks.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        Ok(cmd.query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_many(&self, pairs: &[(String, String)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("MSET");
        for (key, value) in pairs {
            cmd.arg(key).arg(value);
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<tokio::time::Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| tokio::time::Instant::now() >= at)
    }
}

/// In-memory [`KvStore`] with lazy TTL expiry.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, key: &str) -> Option<String> {
        // The read guard must drop before remove_if touches the same shard.
        let (value, expired) = match self.entries.get(key) {
            Some(entry) if entry.is_expired() => (None, true),
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        value
    }

    fn write(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| tokio::time::Instant::now() + ttl),
            },
        );
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        Ok(keys.iter().map(|key| self.read(key)).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, value, None);
        Ok(())
    }

    async fn set_many(&self, pairs: &[(String, String)]) -> Result<()> {
        for (key, value) in pairs {
            self.write(key, value, None);
        }
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.write(key, value, Some(ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let fresh_entry = || MemoryEntry {
            value: value.to_string(),
            expires_at: Some(tokio::time::Instant::now() + ttl),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(fresh_entry());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh_entry());
                Ok(true)
            }
        }
    }
}
