//! PostgreSQL locking strategy.
//!
//! Locks live in one table, one row per lock domain:
//!
//! ```sql
//! CREATE TABLE LOCKS (
//!     APPLICATION_ID  VARCHAR(50) NOT NULL PRIMARY KEY,
//!     UNIQUE_ID       VARCHAR(50) NULL,
//!     EXPIRATION_DATE TIMESTAMP   NULL
//! );
//! ```
//!
//! A `NULL` holder means released. Acquisition locks the row with
//! `SELECT ... FOR UPDATE` and claims it if it is released or expired.
//!
//! # Example
//!
//! ```no_run
//! use sso_ticket_registry::config::LockConfig;
//! use sso_ticket_registry::stores::PostgresLockingStrategy;
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/cas").await?;
//! let lock = PostgresLockingStrategy::new(pool, LockConfig::default());
//! lock.create_table().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::LockConfig;
use crate::error::{Result, TicketError};
use crate::providers::LockingStrategy;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use sqlx::PgPool;
use sso_ticket_core::{Clock, SystemClock};

/// `PostgreSQL` locking strategy.
#[derive(Clone)]
pub struct PostgresLockingStrategy<C = SystemClock> {
    /// `PostgreSQL` connection pool.
    pool: PgPool,

    config: LockConfig,

    clock: C,
}

impl PostgresLockingStrategy<SystemClock> {
    /// Create a new `PostgreSQL` locking strategy.
    ///
    /// # Arguments
    ///
    /// * `pool` - `PostgreSQL` connection pool
    /// * `config` - Lock domain, holder and timeout
    #[must_use]
    pub const fn new(pool: PgPool, config: LockConfig) -> Self {
        Self {
            pool,
            config,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> PostgresLockingStrategy<C> {
    /// Use a different time source for lock expiry.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> PostgresLockingStrategy<C2> {
        PostgresLockingStrategy {
            pool: self.pool,
            config: self.config,
            clock,
        }
    }

    /// Create the lock table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails.
    pub async fn create_table(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS LOCKS (
                APPLICATION_ID VARCHAR(50) NOT NULL PRIMARY KEY,
                UNIQUE_ID VARCHAR(50) NULL,
                EXPIRATION_DATE TIMESTAMP NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TicketError::storage("Failed to create lock table", e))?;
        Ok(())
    }

    fn expiration(&self, now: DateTime<Utc>) -> NaiveDateTime {
        TimeDelta::from_std(self.config.timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .naive_utc()
    }
}

impl<C: Clock> LockingStrategy for PostgresLockingStrategy<C> {
    async fn acquire(&self) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = self.expiration(now);
        let domain = self.config.lock_domain.as_str();
        let holder = self.config.holder_id.as_str();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TicketError::storage("Failed to begin lock transaction", e))?;

        let row: Option<(Option<String>, Option<NaiveDateTime>)> = sqlx::query_as(
            "SELECT UNIQUE_ID, EXPIRATION_DATE FROM LOCKS WHERE APPLICATION_ID = $1 FOR UPDATE",
        )
        .bind(domain)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| TicketError::storage("Failed to read lock row", e))?;

        let acquired = match row {
            None => {
                let inserted = sqlx::query(
                    "INSERT INTO LOCKS (APPLICATION_ID, UNIQUE_ID, EXPIRATION_DATE) VALUES ($1, $2, $3)",
                )
                .bind(domain)
                .bind(holder)
                .bind(expires_at)
                .execute(&mut *tx)
                .await;

                match inserted {
                    Ok(_) => true,
                    // Another node created the row first
                    Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                        tx.rollback()
                            .await
                            .map_err(|e| TicketError::storage("Failed to roll back lock transaction", e))?;
                        return Ok(false);
                    }
                    Err(e) => return Err(TicketError::storage("Failed to create lock row", e)),
                }
            }
            Some((holder_id, expiration)) => {
                let claimable = match (holder_id, expiration) {
                    (None, _) => true,
                    (Some(_), Some(expiration)) => now.naive_utc() > expiration,
                    (Some(_), None) => false,
                };
                if claimable {
                    sqlx::query(
                        "UPDATE LOCKS SET UNIQUE_ID = $1, EXPIRATION_DATE = $2 WHERE APPLICATION_ID = $3",
                    )
                    .bind(holder)
                    .bind(expires_at)
                    .bind(domain)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| TicketError::storage("Failed to claim lock row", e))?;
                }
                claimable
            }
        };

        tx.commit()
            .await
            .map_err(|e| TicketError::storage("Failed to commit lock transaction", e))?;

        tracing::debug!(lock_domain = %domain, holder_id = %holder, acquired, "Lock acquisition attempted");
        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        let result = sqlx::query(
            "UPDATE LOCKS SET UNIQUE_ID = NULL, EXPIRATION_DATE = NULL WHERE APPLICATION_ID = $1 AND UNIQUE_ID = $2",
        )
        .bind(&self.config.lock_domain)
        .bind(&self.config.holder_id)
        .execute(&self.pool)
        .await
        .map_err(|e| TicketError::storage("Failed to release lock", e))?;

        tracing::debug!(
            lock_domain = %self.config.lock_domain,
            holder_id = %self.config.holder_id,
            released = result.rows_affected() > 0,
            "Lock release attempted"
        );
        Ok(())
    }
}
