//! Ticket registry cleaner.
//!
//! Periodically evicts expired tickets from a [`TicketRegistry`], under a
//! [`LockingStrategy`] so at most one node of a cluster cleans at a time.
//!
//! # Scan
//!
//! Ticket-granting tickets are scanned first, then service tickets, each in
//! pages re-queried by offset. After every page the offset advances by the
//! number of tickets that survived it:
//!
//! ```text
//! next_offset = offset + page_len - removed_from_page
//! ```
//!
//! `removed_from_page` counts every ticket of the scanned kind the page's
//! deletions took out, including proxy-granting tickets removed with their
//! session. Removed tickets shrink the collection at the scanned positions,
//! so a page that was removed completely re-requests the same offset. The
//! scan stops at the first empty page.
//!
//! # Example
//!
//! ```no_run
//! use sso_ticket_registry::cleaner::TicketRegistryCleaner;
//! use sso_ticket_registry::config::{CleanerConfig, LockConfig};
//! use sso_ticket_registry::providers::NoopLogoutManager;
//! use sso_ticket_registry::stores::{DefaultTicketRegistry, InMemoryLockingStrategy, LockTable};
//!
//! # async fn example() {
//! let cleaner = TicketRegistryCleaner::new(
//!     DefaultTicketRegistry::new(),
//!     InMemoryLockingStrategy::new(LockTable::new(), LockConfig::default()),
//!     NoopLogoutManager,
//!     CleanerConfig::default(),
//! );
//! let shutdown = cleaner.shutdown_flag();
//! let handle = cleaner.spawn();
//!
//! // Later, during application shutdown
//! shutdown.store(true, std::sync::atomic::Ordering::Release);
//! let _ = handle.await;
//! # }
//! ```

use crate::config::CleanerConfig;
use crate::constants::metric_names;
use crate::error::Result;
use crate::providers::{LockingStrategy, LogoutManager, RemovedTickets, TicketRegistry};
use sso_ticket_core::{Clock, SystemClock, TicketKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Granularity at which a sleeping cleaner notices shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one cleaner run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanerReport {
    /// Tickets removed while scanning ticket-granting tickets, including
    /// cascaded children.
    pub tgt_removed: usize,

    /// Service tickets removed.
    pub st_removed: usize,

    /// The run stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl CleanerReport {
    /// Total tickets removed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.tgt_removed + self.st_removed
    }
}

/// Removes expired tickets in batches.
pub struct TicketRegistryCleaner<R, L, M, C = SystemClock> {
    registry: R,
    lock: L,
    logout_manager: M,
    clock: C,
    config: CleanerConfig,
    shutdown: Arc<AtomicBool>,
}

impl<R, L, M> TicketRegistryCleaner<R, L, M, SystemClock>
where
    R: TicketRegistry,
    L: LockingStrategy,
    M: LogoutManager,
{
    /// Create a cleaner.
    #[must_use]
    pub fn new(registry: R, lock: L, logout_manager: M, config: CleanerConfig) -> Self {
        Self {
            registry,
            lock,
            logout_manager,
            clock: SystemClock,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<R, L, M, C> TicketRegistryCleaner<R, L, M, C>
where
    R: TicketRegistry,
    L: LockingStrategy,
    M: LogoutManager,
    C: Clock,
{
    /// Use a different time source for expiry checks.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> TicketRegistryCleaner<R, L, M, C2> {
        TicketRegistryCleaner {
            registry: self.registry,
            lock: self.lock,
            logout_manager: self.logout_manager,
            clock,
            config: self.config,
            shutdown: self.shutdown,
        }
    }

    /// Share an existing shutdown flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Flag that stops the cleaner between batches once set.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Registry being cleaned.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run one cleaning pass.
    ///
    /// A pass that cannot take the lock does nothing and reports zero
    /// removals. The lock is released whether or not the scan succeeded.
    ///
    /// # Errors
    ///
    /// Returns error if lock acquisition or release fails, or if a batch
    /// cannot be retrieved. Failures to delete individual tickets are
    /// logged and skipped.
    pub async fn clean(&self) -> Result<CleanerReport> {
        if !self.lock.acquire().await? {
            tracing::debug!("Cleaner lock held elsewhere, skipping run");
            metrics::counter!(metric_names::CLEANER_SKIPPED).increment(1);
            return Ok(CleanerReport::default());
        }
        metrics::counter!(metric_names::CLEANER_RUNS).increment(1);

        let outcome = self.scan().await;
        let released = self.lock.release().await;
        let report = outcome?;
        released?;

        tracing::info!(
            tgt_removed = report.tgt_removed,
            st_removed = report.st_removed,
            interrupted = report.interrupted,
            "Ticket registry cleaner run finished"
        );
        Ok(report)
    }

    async fn scan(&self) -> Result<CleanerReport> {
        let mut report = CleanerReport::default();

        match self.scan_ticket_granting_tickets().await? {
            Some(removed) => report.tgt_removed = removed,
            None => {
                report.interrupted = true;
                return Ok(report);
            }
        }
        match self.scan_service_tickets().await? {
            Some(removed) => report.st_removed = removed,
            None => report.interrupted = true,
        }
        Ok(report)
    }

    /// Returns the number removed, or `None` if interrupted.
    async fn scan_ticket_granting_tickets(&self) -> Result<Option<usize>> {
        let batch_size = self.config.batch_size;
        let mut offset = 0;
        let mut total = 0;

        loop {
            if self.is_shutdown() {
                return Ok(None);
            }
            let batch = self
                .registry
                .get_ticket_granting_ticket_batch(offset, batch_size)
                .await?;
            if batch.is_empty() {
                return Ok(Some(total));
            }

            let now = self.clock.now();
            let fetched = batch.len();
            let mut removed_from_batch = 0;

            for mut tgt in batch.into_iter().filter(|tgt| tgt.is_expired(now)) {
                tgt.expire();
                if let Err(error) = self.logout_manager.perform_logout(&tgt).await {
                    tracing::warn!(ticket_id = %tgt.id(), %error, "Single logout failed for expired ticket");
                }
                // Cascaded proxy-granting tickets leave this keyspace too
                if let Some(removed) = self.delete(tgt.id(), TicketKind::TicketGranting).await {
                    removed_from_batch += removed.ticket_granting;
                    total += removed.total();
                }
            }

            tracing::debug!(offset, fetched, removed = removed_from_batch, "Cleaned ticket-granting ticket batch");
            offset = (offset + fetched).saturating_sub(removed_from_batch);
        }
    }

    /// Returns the number removed, or `None` if interrupted.
    async fn scan_service_tickets(&self) -> Result<Option<usize>> {
        let batch_size = self.config.batch_size;
        let mut offset = 0;
        let mut total = 0;

        loop {
            if self.is_shutdown() {
                return Ok(None);
            }
            let batch = self.registry.get_service_ticket_batch(offset, batch_size).await?;
            if batch.is_empty() {
                return Ok(Some(total));
            }

            let now = self.clock.now();
            let fetched = batch.len();
            let mut removed_from_batch = 0;

            for st in batch.iter().filter(|st| st.is_expired(now)) {
                if let Some(removed) = self.delete(st.id(), TicketKind::Service).await {
                    removed_from_batch += removed.service;
                    total += removed.total();
                }
            }

            tracing::debug!(offset, fetched, removed = removed_from_batch, "Cleaned service ticket batch");
            offset = (offset + fetched).saturating_sub(removed_from_batch);
        }
    }

    /// Delete one ticket, swallowing failures. Returns what the cascade removed on success.
    async fn delete(&self, id: &sso_ticket_core::TicketId, kind: TicketKind) -> Option<RemovedTickets> {
        let label = match kind {
            TicketKind::TicketGranting => "tgt",
            TicketKind::Service => "st",
        };
        match self.registry.remove_ticket(id).await {
            Ok(removed) => {
                metrics::counter!(metric_names::CLEANER_REMOVED, "kind" => label)
                    .increment(u64::try_from(removed.total()).unwrap_or(u64::MAX));
                Some(removed)
            }
            Err(error) => {
                tracing::warn!(ticket_id = %id, %error, "Failed to delete expired ticket, skipping");
                metrics::counter!(metric_names::CLEANER_DELETE_FAILURES).increment(1);
                None
            }
        }
    }

    /// Sleep for `duration`, waking early on shutdown. Returns `false` on shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_shutdown() {
                return false;
            }
            let step = remaining.min(SHUTDOWN_POLL_INTERVAL);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        !self.is_shutdown()
    }

    /// Run the cleaner on its schedule until shutdown is requested.
    ///
    /// Waits `start_delay`, then cleans every `repeat_interval`. Failed
    /// runs are logged and retried on the next tick.
    pub async fn run(&self) {
        if !self.config.enabled {
            tracing::info!("Ticket registry cleaner disabled");
            return;
        }
        tracing::info!(
            start_delay_ms = self.config.start_delay.as_millis(),
            repeat_interval_ms = self.config.repeat_interval.as_millis(),
            batch_size = self.config.batch_size,
            "Ticket registry cleaner scheduled"
        );

        if !self.pause(self.config.start_delay).await {
            return;
        }
        loop {
            if let Err(error) = self.clean().await {
                tracing::error!(%error, "Ticket registry cleaner run aborted");
            }
            if !self.pause(self.config.repeat_interval).await {
                tracing::info!("Ticket registry cleaner stopped");
                return;
            }
        }
    }
}

impl<R, L, M, C> TicketRegistryCleaner<R, L, M, C>
where
    R: TicketRegistry + 'static,
    L: LockingStrategy + 'static,
    M: LogoutManager + 'static,
    C: Clock + 'static,
{
    /// Spawn [`TicketRegistryCleaner::run`] on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::mocks::MockLogoutManager;
    use crate::stores::{DefaultTicketRegistry, InMemoryLockingStrategy, LockTable};
    use chrono::TimeDelta;
    use sso_ticket_core::{Clock, ExpirationPolicy, TicketId};
    use sso_ticket_testing::{MutableClock, fixtures};

    fn cleaner(
        registry: &DefaultTicketRegistry,
        table: &LockTable,
        logout: &MockLogoutManager,
        clock: &MutableClock,
    ) -> TicketRegistryCleaner<DefaultTicketRegistry, InMemoryLockingStrategy<MutableClock>, MockLogoutManager, MutableClock>
    {
        TicketRegistryCleaner::new(
            registry.clone(),
            InMemoryLockingStrategy::new(table.clone(), LockConfig::default()).with_clock(clock.clone()),
            logout.clone(),
            CleanerConfig::new().with_batch_size(3),
        )
        .with_clock(clock.clone())
    }

    #[tokio::test]
    async fn test_removes_only_expired_tickets() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let logout = MockLogoutManager::new();
        let short = ExpirationPolicy::timeout(Duration::from_secs(60));

        let mut expiring = fixtures::ticket_granting_ticket_with_policy("TGT-1-a", short, &clock);
        let child = fixtures::service_ticket(&mut expiring, "ST-1-a", ExpirationPolicy::NeverExpires, &clock);
        let mut survivor = fixtures::ticket_granting_ticket("TGT-2-a", &clock);
        let lone_st = fixtures::service_ticket(&mut survivor, "ST-2-a", short, &clock);

        registry.add_ticket(expiring.clone().into()).await?;
        registry.add_ticket(child.into()).await?;
        registry.add_ticket(survivor.clone().into()).await?;
        registry.add_ticket(lone_st.into()).await?;

        clock.advance(TimeDelta::seconds(61));
        let report = cleaner(&registry, &LockTable::new(), &logout, &clock).clean().await?;

        // Expired TGT + cascaded child, then the expired lone ST
        assert_eq!(report.tgt_removed, 2);
        assert_eq!(report.st_removed, 1);
        assert_eq!(report.total(), 3);
        assert!(!report.interrupted);
        assert_eq!(logout.logged_out()?, vec![expiring.id().clone()]);
        assert_eq!(registry.get_tickets().await?.len(), 1);
        assert!(registry.get_ticket(survivor.id()).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_cascaded_proxy_tickets_do_not_hide_later_sessions() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let logout = MockLogoutManager::new();

        // Index order: expired session, its live proxy ticket, another expired session
        let mut first = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        clock.advance(TimeDelta::seconds(1));
        let proxy = first.grant_proxy_granting_ticket(
            TicketId::from("PGT-1-p"),
            fixtures::service("proxy"),
            fixtures::authentication("https://proxy.example.com", clock.now()),
            ExpirationPolicy::NeverExpires,
            clock.now(),
        );
        clock.advance(TimeDelta::seconds(1));
        let mut second = fixtures::ticket_granting_ticket("TGT-2-b", &clock);
        first.expire();
        second.expire();

        registry.add_ticket(first.clone().into()).await?;
        registry.add_ticket(proxy.into()).await?;
        registry.add_ticket(second.clone().into()).await?;

        let cleaner = TicketRegistryCleaner::new(
            registry.clone(),
            InMemoryLockingStrategy::new(LockTable::new(), LockConfig::default()).with_clock(clock.clone()),
            logout.clone(),
            CleanerConfig::new().with_batch_size(2),
        )
        .with_clock(clock.clone());

        let report = cleaner.clean().await?;

        assert_eq!(report.tgt_removed, 3);
        assert!(registry.get_ticket(second.id()).await?.is_none());
        assert_eq!(registry.session_count().await?, 0);
        assert_eq!(logout.logged_out()?, vec![first.id().clone(), second.id().clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_skips_when_lock_is_held() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let table = LockTable::new();
        let mut expired = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        expired.expire();
        registry.add_ticket(expired.into()).await?;

        let other_node = InMemoryLockingStrategy::new(
            table.clone(),
            LockConfig::new(crate::constants::DEFAULT_LOCK_DOMAIN.to_string(), "other".to_string()),
        )
        .with_clock(clock.clone());
        assert!(other_node.acquire().await?);

        let report = cleaner(&registry, &table, &MockLogoutManager::new(), &clock).clean().await?;
        assert_eq!(report, CleanerReport::default());
        assert_eq!(registry.session_count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_releases_lock_after_run() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let table = LockTable::new();
        let cleaner = cleaner(&DefaultTicketRegistry::new(), &table, &MockLogoutManager::new(), &clock);

        cleaner.clean().await?;
        cleaner.clean().await?;
        let entry = table.entry(crate::constants::DEFAULT_LOCK_DOMAIN)?;
        assert!(entry.is_some_and(|e| e.holder_id.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_logout_failure_does_not_stop_removal() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut expired = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        expired.expire();
        registry.add_ticket(expired.into()).await?;

        let report = cleaner(&registry, &LockTable::new(), &MockLogoutManager::failing(), &clock)
            .clean()
            .await?;
        assert_eq!(report.tgt_removed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_run() -> Result<()> {
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut expired = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        expired.expire();
        registry.add_ticket(expired.into()).await?;

        let table = LockTable::new();
        let cleaner = cleaner(&registry, &table, &MockLogoutManager::new(), &clock);
        cleaner.shutdown_flag().store(true, Ordering::Release);

        let report = cleaner.clean().await?;
        assert!(report.interrupted);
        assert_eq!(report.total(), 0);
        assert_eq!(registry.session_count().await?, 1);

        // Lock released even though the run was interrupted
        let entry = table.entry(crate::constants::DEFAULT_LOCK_DOMAIN)?;
        assert!(entry.is_some_and(|e| e.holder_id.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_spawned_cleaner_runs_until_shutdown() -> Result<()> {
        sso_ticket_testing::init_tracing();
        let clock = MutableClock::new(fixtures::epoch());
        let registry = DefaultTicketRegistry::new();
        let mut expired = fixtures::ticket_granting_ticket("TGT-1-a", &clock);
        expired.expire();
        registry.add_ticket(expired.into()).await?;

        let cleaner = TicketRegistryCleaner::new(
            registry.clone(),
            InMemoryLockingStrategy::new(LockTable::new(), LockConfig::default()),
            MockLogoutManager::new(),
            CleanerConfig::new()
                .with_start_delay(Duration::ZERO)
                .with_repeat_interval(Duration::from_millis(10)),
        );
        let shutdown = cleaner.shutdown_flag();
        let handle = cleaner.spawn();

        for _ in 0..100 {
            if registry.session_count().await? == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.session_count().await?, 0);

        shutdown.store(true, Ordering::Release);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .map_err(|e| crate::TicketError::Internal(e.to_string()))?
            .map_err(|e| crate::TicketError::Internal(e.to_string()))?;
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_cleaner_returns_immediately() {
        let cleaner = TicketRegistryCleaner::new(
            DefaultTicketRegistry::new(),
            InMemoryLockingStrategy::new(LockTable::new(), LockConfig::default()),
            MockLogoutManager::new(),
            CleanerConfig::new().with_enabled(false),
        );
        assert!(
            tokio::time::timeout(Duration::from_secs(1), cleaner.run())
                .await
                .is_ok()
        );
    }
}
