//! # SSO Ticket Testing
//!
//! Testing utilities and helpers for the SSO ticket registry.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`MutableClock`])
//! - Ticket and authentication fixtures
//! - Property-based testing strategies
//! - Tracing initialisation for tests
//!
//! ## Example
//!
//! ```
//! use sso_ticket_testing::{MutableClock, fixtures};
//! use sso_ticket_core::Clock;
//! use chrono::Duration;
//!
//! let clock = MutableClock::new(fixtures::epoch());
//! let tgt = fixtures::ticket_granting_ticket("TGT-1-test", &clock);
//!
//! clock.advance(Duration::hours(1));
//! assert!(!tgt.is_expired(clock.now()));
//! ```

use chrono::{DateTime, Utc};
use sso_ticket_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use sso_ticket_testing::mocks::FixedClock;
    /// use sso_ticket_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test advances it.
    ///
    /// Clones share the same time, so a clock handed to a registry or lock
    /// can be advanced from the test body.
    #[derive(Debug, Clone)]
    pub struct MutableClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MutableClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or backward for a negative delta).
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }

        /// Jump to an absolute time.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for MutableClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::fixtures::epoch())
    }
}

/// Ticket and authentication fixtures.
pub mod fixtures {
    use super::{Clock, DateTime, Utc};
    use chrono::TimeZone;
    use sso_ticket_core::{
        Authentication, ExpirationPolicy, Principal, Service, ServiceTicket, TicketGrantingTicket,
        TicketId,
    };

    /// Fixed reference time used by the test clocks (2025-01-01 00:00:00 UTC).
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Authentication for `principal_id` with a couple of attributes.
    #[must_use]
    pub fn authentication(principal_id: &str, at: DateTime<Utc>) -> Authentication {
        Authentication::new(
            Principal::new(principal_id)
                .with_attribute("mail", format!("{principal_id}@example.com"))
                .with_attribute("memberOf", "staff"),
            at,
        )
        .with_attribute("authenticationMethod", "password")
    }

    /// A web application service.
    #[must_use]
    pub fn service(name: &str) -> Service {
        Service::new(format!("https://{name}.example.com/login"))
    }

    /// A never-expiring root TGT for `casuser`.
    #[must_use]
    pub fn ticket_granting_ticket(id: &str, clock: &impl Clock) -> TicketGrantingTicket {
        ticket_granting_ticket_with_policy(id, ExpirationPolicy::NeverExpires, clock)
    }

    /// A root TGT for `casuser` bound to `policy`.
    #[must_use]
    pub fn ticket_granting_ticket_with_policy(
        id: &str,
        policy: ExpirationPolicy,
        clock: &impl Clock,
    ) -> TicketGrantingTicket {
        let now = clock.now();
        TicketGrantingTicket::new(
            TicketId::from(id),
            authentication("casuser", now),
            policy,
            now,
        )
    }

    /// Grant a service ticket from `parent` for the `app` service.
    #[must_use]
    pub fn service_ticket(
        parent: &mut TicketGrantingTicket,
        id: &str,
        policy: ExpirationPolicy,
        clock: &impl Clock,
    ) -> ServiceTicket {
        parent.grant_service_ticket(
            TicketId::from(id),
            service("app"),
            policy,
            false,
            false,
            clock.now(),
        )
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use proptest::prelude::*;
    use sso_ticket_core::ExpirationPolicy;
    use std::time::Duration;

    /// Durations between one second and one day.
    pub fn duration() -> impl Strategy<Value = Duration> {
        (1u64..86_400).prop_map(Duration::from_secs)
    }

    /// Any expiration policy variant.
    pub fn expiration_policy() -> impl Strategy<Value = ExpirationPolicy> {
        prop_oneof![
            Just(ExpirationPolicy::NeverExpires),
            duration().prop_map(ExpirationPolicy::timeout),
            duration().prop_map(|time_to_kill| ExpirationPolicy::HardTimeout { time_to_kill }),
            (duration(), duration()).prop_map(|(a, b)| {
                ExpirationPolicy::ticket_granting_ticket(a.max(b), a.min(b))
            }),
            (1u32..10, duration()).prop_map(|(uses, ttl)| ExpirationPolicy::multi_time_use(uses, ttl)),
            (duration(), duration()).prop_map(|(a, b)| ExpirationPolicy::Throttled {
                time_to_kill: a.max(b),
                time_in_between_uses: a.min(b),
            }),
        ]
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG` for the current test binary.
///
/// Safe to call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, MutableClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), fixtures::epoch());
    }

    #[test]
    fn test_mutable_clock_shared_between_clones() {
        let clock = MutableClock::new(fixtures::epoch());
        let handle = clock.clone();

        handle.advance(Duration::minutes(5));
        assert_eq!(clock.now(), fixtures::epoch() + Duration::minutes(5));

        clock.set(fixtures::epoch());
        assert_eq!(handle.now(), fixtures::epoch());
    }
}
