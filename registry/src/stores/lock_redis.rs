//! Redis-based locking strategy.
//!
//! The lock is a single key `{prefix}:lock:{domain}` holding the holder id:
//! - **Acquire**: `SET key holder NX EX timeout` (fails while any holder, including this one, has it)
//! - **Release**: compare-and-delete in a Lua script
//! - **Stale locks**: Redis drops the key once the timeout passes

use crate::config::LockConfig;
use crate::constants::redis_keys;
use crate::error::{Result, TicketError};
use crate::providers::LockingStrategy;
use redis::aio::ConnectionManager;
use redis::Client;

/// Releases the lock only when it is still held by the caller.
const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// Redis-based locking strategy.
#[derive(Clone)]
pub struct RedisLockingStrategy {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,

    /// Fully qualified lock key.
    key: String,

    config: LockConfig,
}

impl RedisLockingStrategy {
    /// Create a new Redis locking strategy.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `key_prefix` - Prefix shared with the ticket registry
    /// * `config` - Lock domain, holder and timeout
    ///
    /// # Errors
    ///
    /// Returns error if connection to Redis fails.
    pub async fn new(redis_url: &str, key_prefix: &str, config: LockConfig) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| TicketError::storage("Failed to create Redis client", e))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| TicketError::storage("Failed to create Redis connection manager", e))?;

        Ok(Self::from_connection_manager(conn_manager, key_prefix, config))
    }

    /// Create a strategy over an existing connection manager.
    #[must_use]
    pub fn from_connection_manager(
        conn_manager: ConnectionManager,
        key_prefix: &str,
        config: LockConfig,
    ) -> Self {
        let key = format!("{key_prefix}:{}:{}", redis_keys::LOCK, config.lock_domain);
        Self {
            conn_manager,
            key,
            config,
        }
    }
}

impl LockingStrategy for RedisLockingStrategy {
    async fn acquire(&self) -> Result<bool> {
        let mut conn = self.conn_manager.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.config.holder_id)
            .arg("NX")
            .arg("EX")
            .arg(self.config.timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| TicketError::storage("Failed to acquire lock", e))?;

        let acquired = reply.is_some();
        tracing::debug!(
            lock_domain = %self.config.lock_domain,
            holder_id = %self.config.holder_id,
            acquired,
            "Lock acquisition attempted"
        );
        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.config.holder_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TicketError::storage("Failed to release lock", e))?;

        tracing::debug!(
            lock_domain = %self.config.lock_domain,
            holder_id = %self.config.holder_id,
            released = released == 1,
            "Lock release attempted"
        );
        Ok(())
    }
}
