//! Key-value backends for the exact cache tier.
//!
//! The default backend is an in-process map. When a Redis URL is
//! configured, the shared server takes over so identical prompts hit across
//! daemon restarts and sibling processes. Every operation is infallible to
//! the caller: a backend failure is a miss, never an error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration);

    /// Delete every key under `prefix`. Returns the count removed.
    async fn delete_prefix(&self, prefix: &str) -> usize;

    /// True when the backend is currently reachable.
    fn available(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// In-process map with per-key expiry.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), deadline));
    }

    async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    fn available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Shared Redis backend. Errors degrade to misses.
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    /// Connect to the configured server. A connection failure here is
    /// reported to the caller so it can fall back to a degraded backend.
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match redis::AsyncCommands::get::<_, Option<String>>(&mut conn, key).await {
            Ok(value) => value,
            Err(err) => {
                debug!("Redis get error: {}", err);
                None
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) {
        let mut conn = self.conn.clone();
        let result: Result<(), _> =
            redis::AsyncCommands::set_ex(&mut conn, key, value, ttl.as_secs()).await;
        if let Err(err) = result {
            debug!("Redis set error: {}", err);
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let keys: Vec<String> =
            match redis::AsyncCommands::keys::<_, Vec<String>>(&mut conn, &pattern).await {
                Ok(keys) => keys,
                Err(err) => {
                    debug!("Redis keys error: {}", err);
                    return 0;
                }
            };
        if keys.is_empty() {
            return 0;
        }
        let count = keys.len();
        if let Err(err) = redis::AsyncCommands::del::<_, ()>(&mut conn, keys).await {
            debug!("Redis del error: {}", err);
            return 0;
        }
        count
    }

    fn available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Backend used when the configured KV server is unreachable: every read is
/// a miss, every write is dropped.
#[derive(Debug, Default)]
pub struct NoopKv;

#[async_trait]
impl Kv for NoopKv {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) {}

    async fn delete_prefix(&self, _prefix: &str) -> usize {
        0
    }

    fn available(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Build the best available KV backend for an optional Redis URL.
pub async fn open_kv(redis_url: Option<&str>) -> Box<dyn Kv> {
    match redis_url {
        Some(url) => match RedisKv::connect(url).await {
            Ok(kv) => Box::new(kv),
            Err(err) => {
                warn!("Redis unavailable ({}) - cache operating in no-op mode", err);
                Box::new(NoopKv)
            }
        },
        None => Box::new(MemoryKv::new()),
    }
}
