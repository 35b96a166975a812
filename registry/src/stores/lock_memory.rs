//! In-memory locking strategy.
//!
//! A [`LockTable`] plays the role of the shared lock table; every
//! [`InMemoryLockingStrategy`] built over the same table behaves like a
//! separate cluster node contending for the same rows.

use crate::config::LockConfig;
use crate::error::{Result, TicketError};
use crate::providers::LockingStrategy;
use chrono::{DateTime, TimeDelta, Utc};
use sso_ticket_core::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One row of the lock table. A `None` holder means released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Node currently holding the lock.
    pub holder_id: Option<String>,

    /// When the current holder's claim lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Lock rows keyed by lock domain, shared between strategies.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    rows: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl LockTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current row for `lock_domain`.
    ///
    /// # Errors
    ///
    /// Returns error if the table mutex is poisoned.
    pub fn entry(&self, lock_domain: &str) -> Result<Option<LockEntry>> {
        Ok(self
            .rows
            .lock()
            .map_err(|_| TicketError::poisoned())?
            .get(lock_domain)
            .cloned())
    }
}

/// Locking strategy over a [`LockTable`].
#[derive(Debug, Clone)]
pub struct InMemoryLockingStrategy<C = SystemClock> {
    table: LockTable,
    config: LockConfig,
    clock: C,
}

impl InMemoryLockingStrategy<SystemClock> {
    /// Create a strategy over `table`.
    #[must_use]
    pub const fn new(table: LockTable, config: LockConfig) -> Self {
        Self {
            table,
            config,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> InMemoryLockingStrategy<C> {
    /// Use a different time source for lock expiry.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> InMemoryLockingStrategy<C2> {
        InMemoryLockingStrategy {
            table: self.table,
            config: self.config,
            clock,
        }
    }

    fn expiration(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.config.timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl<C: Clock> LockingStrategy for InMemoryLockingStrategy<C> {
    async fn acquire(&self) -> Result<bool> {
        let now = self.clock.now();
        let mut rows = self.table.rows.lock().map_err(|_| TicketError::poisoned())?;

        let acquired = match rows.get(&self.config.lock_domain) {
            None => true,
            Some(entry) => match (&entry.holder_id, entry.expires_at) {
                (None, _) => true,
                (Some(_), Some(expires_at)) => now > expires_at,
                (Some(_), None) => false,
            },
        };

        if acquired {
            rows.insert(
                self.config.lock_domain.clone(),
                LockEntry {
                    holder_id: Some(self.config.holder_id.clone()),
                    expires_at: Some(self.expiration(now)),
                },
            );
        }

        tracing::debug!(
            lock_domain = %self.config.lock_domain,
            holder_id = %self.config.holder_id,
            acquired,
            "Lock acquisition attempted"
        );
        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        let mut rows = self.table.rows.lock().map_err(|_| TicketError::poisoned())?;

        if let Some(entry) = rows.get_mut(&self.config.lock_domain) {
            if entry.holder_id.as_deref() == Some(self.config.holder_id.as_str()) {
                entry.holder_id = None;
                entry.expires_at = None;
                tracing::debug!(
                    lock_domain = %self.config.lock_domain,
                    holder_id = %self.config.holder_id,
                    "Lock released"
                );
            }
        }
        Ok(())
    }
}
