//! Redis key-value store adapter

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::domain::CacheError;
use crate::domain::cache::KvStore;

use super::retry::RetryPolicy;

/// Lock release: delete the key only while the owner still matches.
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end"#;

/// Configuration for the Redis adapter
#[derive(Debug, Clone)]
pub struct RedisKvStoreConfig {
    /// Redis connection URL (e.g. "redis://127.0.0.1:6379")
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
    /// Per-attempt timeout for KV operations
    pub op_timeout: Duration,
    /// Bounded retry applied around each operation
    pub retry: RetryPolicy,
}

impl Default for RedisKvStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            op_timeout: Duration::from_millis(150),
            retry: RetryPolicy::default(),
        }
    }
}

impl RedisKvStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Redis-backed [`KvStore`].
///
/// Connection pooling via `ConnectionManager`; SETNX-with-expiry for atomic
/// lock acquisition; a Lua script for compare-and-delete; SCAN (never KEYS)
/// for pattern deletion.
#[derive(Clone)]
pub struct RedisKvStore {
    connection: ConnectionManager,
    config: RedisKvStoreConfig,
}

impl fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKvStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisKvStore {
    pub async fn connect(config: RedisKvStoreConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            CacheError::store_unavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::store_unavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self { connection, config })
    }

    pub async fn with_url(url: impl Into<String>) -> Result<Self, CacheError> {
        Self::connect(RedisKvStoreConfig::new(url)).await
    }

    fn prefix_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    async fn scan_delete(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection.clone();
        let mut cursor = 0u64;
        let mut total_deleted = 0usize;

        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    CacheError::store_unavailable(format!(
                        "Failed to scan keys with pattern '{}': {}",
                        pattern, e
                    ))
                })?;

            if !keys.is_empty() {
                let deleted: i32 = conn.del(&keys).await.map_err(|e| {
                    CacheError::store_unavailable(format!("Failed to delete keys: {}", e))
                })?;
                total_deleted += deleted as usize;
            }

            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(total_deleted)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let prefixed = self.prefix_key(key);

        self.config
            .retry
            .run("get", self.config.op_timeout, || {
                let mut conn = self.connection.clone();
                let prefixed = prefixed.clone();
                async move {
                    conn.get(&prefixed).await.map_err(|e| {
                        CacheError::store_unavailable(format!(
                            "Failed to get key '{}': {}",
                            prefixed, e
                        ))
                    })
                }
            })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let prefixed = self.prefix_key(key);
        let ttl_secs = ttl.as_secs().max(1);

        self.config
            .retry
            .run("set", self.config.op_timeout, || {
                let mut conn = self.connection.clone();
                let prefixed = prefixed.clone();
                let value = value.to_string();
                async move {
                    let _: () = conn.set_ex(&prefixed, value, ttl_secs).await.map_err(|e| {
                        CacheError::store_unavailable(format!(
                            "Failed to set key '{}': {}",
                            prefixed, e
                        ))
                    })?;
                    Ok(())
                }
            })
            .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let prefixed = self.prefix_key(key);
        let ttl_secs = ttl.as_secs().max(1);

        // Single atomic SET NX EX; lock acquisition must not retry a
        // possibly-succeeded attempt, so no retry here.
        let mut conn = self.connection.clone();
        let result: Result<Option<String>, _> = tokio::time::timeout(
            self.config.op_timeout,
            redis::cmd("SET")
                .arg(&prefixed)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn),
        )
        .await
        .map_err(|_| CacheError::timeout("set_nx"))?;

        let reply = result.map_err(|e| {
            CacheError::store_unavailable(format!("Failed to set_nx key '{}': {}", prefixed, e))
        })?;

        // Redis replies OK when set, nil when the key already existed
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let prefixed = self.prefix_key(key);

        self.config
            .retry
            .run("delete", self.config.op_timeout, || {
                let mut conn = self.connection.clone();
                let prefixed = prefixed.clone();
                async move {
                    let deleted: i32 = conn.del(&prefixed).await.map_err(|e| {
                        CacheError::store_unavailable(format!(
                            "Failed to delete key '{}': {}",
                            prefixed, e
                        ))
                    })?;
                    Ok(deleted > 0)
                }
            })
            .await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let prefixed = self.prefix_key(key);
        let script = redis::Script::new(COMPARE_AND_DELETE);

        let mut conn = self.connection.clone();
        let result: Result<i32, _> = tokio::time::timeout(
            self.config.op_timeout,
            script.key(&prefixed).arg(expected).invoke_async(&mut conn),
        )
        .await
        .map_err(|_| CacheError::timeout("delete_if_equals"))?;

        let deleted = result.map_err(|e| {
            CacheError::store_unavailable(format!(
                "Failed compare-and-delete for key '{}': {}",
                prefixed, e
            ))
        })?;

        Ok(deleted > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let prefixed = self.prefix_key(pattern);
        // Pattern scans walk the keyspace; give them the retry budget but a
        // wider per-attempt window than point operations.
        self.config
            .retry
            .run("delete_pattern", self.config.op_timeout * 10, || {
                let prefixed = prefixed.clone();
                async move { self.scan_delete(&prefixed).await }
            })
            .await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let prefixed = self.prefix_key(key);

        self.config
            .retry
            .run("set_add", self.config.op_timeout, || {
                let mut conn = self.connection.clone();
                let prefixed = prefixed.clone();
                let members = members.to_vec();
                async move {
                    let _: () = conn.sadd(&prefixed, &members).await.map_err(|e| {
                        CacheError::store_unavailable(format!(
                            "Failed to add to set '{}': {}",
                            prefixed, e
                        ))
                    })?;
                    Ok(())
                }
            })
            .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let prefixed = self.prefix_key(key);

        self.config
            .retry
            .run("set_members", self.config.op_timeout, || {
                let mut conn = self.connection.clone();
                let prefixed = prefixed.clone();
                async move {
                    conn.smembers(&prefixed).await.map_err(|e| {
                        CacheError::store_unavailable(format!(
                            "Failed to read set '{}': {}",
                            prefixed, e
                        ))
                    })
                }
            })
            .await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let prefixed = self.prefix_key(key);

        self.config
            .retry
            .run("set_remove", self.config.op_timeout, || {
                let mut conn = self.connection.clone();
                let prefixed = prefixed.clone();
                let members = members.to_vec();
                async move {
                    let _: () = conn.srem(&prefixed, &members).await.map_err(|e| {
                        CacheError::store_unavailable(format!(
                            "Failed to remove from set '{}': {}",
                            prefixed, e
                        ))
                    })?;
                    Ok(())
                }
            })
            .await
    }
}
