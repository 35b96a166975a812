//! Registry configuration.
//!
//! This module provides configuration structures for the coordinator, the
//! locking strategies, the cleaner and the Redis backend. Values are supplied
//! by the embedding application; nothing here reads files or the environment
//! except the default lock holder id.

use crate::constants::{DEFAULT_LOCK_DOMAIN, DEFAULT_LOCK_TIMEOUT_SECS, redis_keys};
use sso_ticket_core::ExpirationPolicy;
use std::time::Duration;

/// Expiration policies and session tracking for issued tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketConfig {
    /// Policy bound to new ticket-granting tickets.
    ///
    /// Default: 8 hour ceiling, 2 hour idle timeout
    pub ticket_granting_ticket_policy: ExpirationPolicy,

    /// Policy for service tickets issued from freshly presented credentials.
    ///
    /// Default: single use, 10 seconds
    pub service_ticket_fresh_login_policy: ExpirationPolicy,

    /// Policy for service tickets issued from an existing session.
    ///
    /// Default: single use, 10 seconds
    pub service_ticket_sso_policy: ExpirationPolicy,

    /// Policy bound to proxy-granting tickets.
    ///
    /// Default: same as ticket-granting tickets
    pub proxy_granting_ticket_policy: ExpirationPolicy,

    /// Forget earlier grants for the same service so single logout only
    /// reaches the most recent one.
    ///
    /// Default: `true`
    pub only_track_most_recent_session: bool,
}

impl TicketConfig {
    /// Create configuration with the given session policy.
    #[must_use]
    pub const fn new(ticket_granting_ticket_policy: ExpirationPolicy) -> Self {
        let service_ticket_policy =
            ExpirationPolicy::multi_time_use(1, Duration::from_secs(10));
        Self {
            ticket_granting_ticket_policy,
            service_ticket_fresh_login_policy: service_ticket_policy,
            service_ticket_sso_policy: service_ticket_policy,
            proxy_granting_ticket_policy: ticket_granting_ticket_policy,
            only_track_most_recent_session: true,
        }
    }

    /// Set both service ticket policies.
    #[must_use]
    pub const fn with_service_ticket_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.service_ticket_fresh_login_policy = policy;
        self.service_ticket_sso_policy = policy;
        self
    }

    /// Set the policy for service tickets issued from an existing session.
    #[must_use]
    pub const fn with_sso_service_ticket_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.service_ticket_sso_policy = policy;
        self
    }

    /// Set the proxy-granting ticket policy.
    #[must_use]
    pub const fn with_proxy_granting_ticket_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.proxy_granting_ticket_policy = policy;
        self
    }

    /// Set most-recent-session tracking.
    #[must_use]
    pub const fn with_only_track_most_recent_session(mut self, enabled: bool) -> Self {
        self.only_track_most_recent_session = enabled;
        self
    }

    /// Service ticket policy for a grant with or without fresh credentials.
    #[must_use]
    pub const fn service_ticket_policy(&self, credentials_provided: bool) -> ExpirationPolicy {
        if credentials_provided {
            self.service_ticket_fresh_login_policy
        } else {
            self.service_ticket_sso_policy
        }
    }
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self::new(ExpirationPolicy::ticket_granting_ticket(
            Duration::from_secs(8 * 3600),
            Duration::from_secs(2 * 3600),
        ))
    }
}

/// Distributed lock configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Name of the protected resource. All nodes contending for the same
    /// work must use the same domain.
    pub lock_domain: String,

    /// Identity of this node. Must be unique per node.
    ///
    /// Default: `{hostname}-{pid}`
    pub holder_id: String,

    /// Time after which an unreleased lock may be taken over.
    ///
    /// Default: 1 hour
    pub timeout: Duration,
}

impl LockConfig {
    /// Create lock configuration.
    #[must_use]
    pub const fn new(lock_domain: String, holder_id: String) -> Self {
        Self {
            lock_domain,
            holder_id,
            timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }

    /// Set the lock timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default holder id: `{hostname}-{pid}`.
    #[must_use]
    pub fn default_holder_id() -> String {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("{host}-{}", std::process::id())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_DOMAIN.to_string(), Self::default_holder_id())
    }
}

/// Ticket registry cleaner configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanerConfig {
    /// Whether the scheduled cleaner runs at all.
    ///
    /// Default: `true`
    pub enabled: bool,

    /// Delay before the first run.
    ///
    /// Default: 20 seconds
    pub start_delay: Duration,

    /// Delay between the end of one run and the start of the next.
    ///
    /// Default: 120 seconds
    pub repeat_interval: Duration,

    /// Tickets fetched per batch.
    ///
    /// Default: 500
    pub batch_size: usize,
}

impl CleanerConfig {
    /// Create cleaner configuration with default timings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: true,
            start_delay: Duration::from_secs(20),
            repeat_interval: Duration::from_secs(120),
            batch_size: 500,
        }
    }

    /// Enable or disable the scheduled cleaner.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the start delay.
    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Set the repeat interval.
    #[must_use]
    pub const fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = interval;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Redis ticket registry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisRegistryConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    pub url: String,

    /// Prefix for every key written by the registry.
    ///
    /// Default: `cas`
    pub key_prefix: String,
}

impl RedisRegistryConfig {
    /// Create Redis configuration.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: redis_keys::DEFAULT_PREFIX.to_string(),
        }
    }

    /// Set the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }
}

impl Default for RedisRegistryConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379")
    }
}
