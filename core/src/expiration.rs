//! Expiration policies.
//!
//! A policy is a pure function of a ticket's usage state and the current
//! time. Exactly one policy is bound to a ticket when it is created and it
//! never changes afterwards.

use crate::ticket::TicketState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rule deciding when a ticket stops being valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    /// The ticket never expires on its own.
    #[default]
    NeverExpires,

    /// Expires once `time_to_live` has elapsed since the last use
    /// (since creation for an unused ticket).
    Timeout {
        /// Idle time after which the ticket expires.
        time_to_live: Duration,
    },

    /// Expires once `time_to_kill` has elapsed since creation, regardless of use.
    HardTimeout {
        /// Lifetime measured from creation.
        time_to_kill: Duration,
    },

    /// Idle timeout with a hard ceiling, the usual session policy.
    TicketGrantingTicket {
        /// Hard ceiling measured from creation.
        max_time_to_live: Duration,
        /// Idle time after which the ticket expires.
        time_to_kill: Duration,
    },

    /// Expires after a bounded number of uses, or after `time_to_live`
    /// has elapsed since the last use.
    MultiTimeUseOrTimeout {
        /// Number of uses after which the ticket expires.
        number_of_uses: u32,
        /// Idle time after which the ticket expires.
        time_to_live: Duration,
    },

    /// Expires after `time_to_kill` of inactivity, or when it is used again
    /// within `time_in_between_uses` of the previous use.
    Throttled {
        /// Idle time after which the ticket expires.
        time_to_kill: Duration,
        /// Minimum spacing between two uses.
        time_in_between_uses: Duration,
    },
}

impl ExpirationPolicy {
    /// Fixed time-to-live policy.
    #[must_use]
    pub const fn timeout(time_to_live: Duration) -> Self {
        Self::Timeout { time_to_live }
    }

    /// Idle-timeout-with-hard-ceiling policy.
    #[must_use]
    pub const fn ticket_granting_ticket(max_time_to_live: Duration, time_to_kill: Duration) -> Self {
        Self::TicketGrantingTicket {
            max_time_to_live,
            time_to_kill,
        }
    }

    /// Bounded-use-count policy.
    #[must_use]
    pub const fn multi_time_use(number_of_uses: u32, time_to_live: Duration) -> Self {
        Self::MultiTimeUseOrTimeout {
            number_of_uses,
            time_to_live,
        }
    }

    /// Returns `true` if a ticket in `state` is expired at `now`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_ticket_core::{ExpirationPolicy, TicketState};
    /// # use chrono::{Duration, Utc};
    /// let created = Utc::now();
    /// let state = TicketState::new(created);
    /// let policy = ExpirationPolicy::timeout(std::time::Duration::from_secs(10));
    ///
    /// assert!(!policy.is_expired(&state, created + Duration::seconds(9)));
    /// assert!(policy.is_expired(&state, created + Duration::seconds(10)));
    /// ```
    #[must_use]
    pub fn is_expired(&self, state: &TicketState, now: DateTime<Utc>) -> bool {
        let since_last_use = elapsed(state.last_used_at, now);

        match *self {
            Self::NeverExpires => false,
            Self::Timeout { time_to_live } => since_last_use >= time_to_live,
            Self::HardTimeout { time_to_kill } => elapsed(state.created_at, now) >= time_to_kill,
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => elapsed(state.created_at, now) >= max_time_to_live || since_last_use >= time_to_kill,
            Self::MultiTimeUseOrTimeout {
                number_of_uses,
                time_to_live,
            } => state.use_count >= number_of_uses || since_last_use >= time_to_live,
            Self::Throttled {
                time_to_kill,
                time_in_between_uses,
            } => {
                if since_last_use >= time_to_kill {
                    return true;
                }
                state.use_count > 0 && since_last_use <= time_in_between_uses
            }
        }
    }

    /// Time left before a backend may evict a ticket in `state` on its own.
    ///
    /// Returns `None` when the ticket never expires. Use-count and throttle
    /// rules cannot be expressed as a TTL, so the reported window is an upper
    /// bound and the cleaner remains responsible for those.
    #[must_use]
    pub fn remaining_time_to_live(&self, state: &TicketState, now: DateTime<Utc>) -> Option<Duration> {
        let since_last_use = elapsed(state.last_used_at, now);
        let since_creation = elapsed(state.created_at, now);

        match *self {
            Self::NeverExpires => None,
            Self::Timeout { time_to_live }
            | Self::MultiTimeUseOrTimeout { time_to_live, .. } => {
                Some(time_to_live.saturating_sub(since_last_use))
            }
            Self::Throttled { time_to_kill, .. } => Some(time_to_kill.saturating_sub(since_last_use)),
            Self::HardTimeout { time_to_kill } => Some(time_to_kill.saturating_sub(since_creation)),
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => Some(
                max_time_to_live
                    .saturating_sub(since_creation)
                    .min(time_to_kill.saturating_sub(since_last_use)),
            ),
        }
    }
}

/// Time elapsed from `since` to `now`; zero if the clock went backwards.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
