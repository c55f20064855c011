//! Redis storage backend for distributed rate limiting.
//!
//! Scripts run server-side with `EVALSHA` (falling back to `EVAL` when the
//! server has not cached them yet), so every admission check is one round
//! trip and Redis serializes it against all other commands.

use std::collections::HashMap;
use std::time::Duration;

use deadpool_redis::redis::{self, RedisError, RedisWrite, ToRedisArgs, cmd};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use parking_lot::RwLock;
use tracing::info;

use crate::error::{ConnectionError, RateLimitError, Result, StorageError};
use crate::script::{Script, ScriptArg};
use crate::storage::Storage;

/// Redis storage configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Prefix prepended to every key a script receives
    pub key_prefix: String,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: String::new(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set how long to wait for a pooled connection.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    fn pool_config(&self) -> PoolConfig {
        let mut pool = PoolConfig::new(self.pool_size.max(1));
        pool.timeouts.wait = Some(self.connection_timeout);
        pool.timeouts.create = Some(self.connection_timeout);
        pool
    }
}

/// Redis storage backend for distributed rate limiting.
///
/// Uses connection pooling for high performance.
///
/// # Example
///
/// ```ignore
/// use skp_distlimit::storage::{RedisStorage, RedisConfig};
///
/// let config = RedisConfig::new("redis://localhost:6379")
///     .with_prefix("myapp:")
///     .with_pool_size(20);
///
/// let storage = RedisStorage::new(config).await?;
/// ```
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    scripts: RwLock<HashMap<&'static str, redis::Script>>,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStorage {
    /// Create a new Redis storage from configuration.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(config.pool_config());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        info!(
            pool_size = config.pool_size,
            key_prefix = %config.key_prefix,
            "Connected to Redis rate limit store"
        );

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            scripts: RwLock::new(HashMap::new()),
        })
    }

    /// Create a new Redis storage from a URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    /// Get the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|_| StorageError::PoolExhausted.into())
    }

    /// Compiled form of `script`, hashed once per storage.
    fn compiled(&self, script: &Script) -> redis::Script {
        if let Some(compiled) = self.scripts.read().get(script.name()) {
            return compiled.clone();
        }
        self.scripts
            .write()
            .entry(script.name())
            .or_insert_with(|| redis::Script::new(script.lua()))
            .clone()
    }
}

impl Storage for RedisStorage {
    async fn eval(&self, script: &'static Script, keys: &[String], args: &[ScriptArg]) -> Result<Vec<i64>> {
        let compiled = self.compiled(script);
        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(self.full_key(key));
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.get_conn().await?;
        let reply: Vec<i64> = invocation
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| map_redis_error(script.name(), e))?;

        Ok(reply)
    }
}

impl ToRedisArgs for ScriptArg {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.to_string().as_bytes());
    }
}

fn map_redis_error(script: &'static str, err: RedisError) -> RateLimitError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        ConnectionError::ConnectionFailed(err.to_string()).into()
    } else {
        StorageError::script(script, err.to_string()).into()
    }
}
