//! Registry constants.
//!
//! This module contains constant values used throughout the ticket registry.

/// Redis key layout used by the distributed backends.
///
/// Full key format: `{prefix}:{segment}:{id}` (e.g. `cas:tgt:TGT-1-abc`).
pub mod redis_keys {
    /// Default key prefix.
    pub const DEFAULT_PREFIX: &str = "cas";

    /// Ticket-granting ticket keyspace.
    pub const TICKET_GRANTING: &str = "tgt";

    /// Service ticket keyspace.
    pub const SERVICE: &str = "st";

    /// Sorted-set index of ticket ids, one per keyspace.
    pub const INDEX: &str = "index";

    /// Set of child ticket ids per ticket-granting ticket.
    pub const CHILDREN: &str = "children";

    /// Single-use consumption marker per service ticket.
    pub const CONSUMED: &str = "consumed";

    /// Lock keyspace.
    pub const LOCK: &str = "lock";
}

/// Metric names emitted by the cleaner.
pub mod metric_names {
    /// Cleaner runs that held the lock.
    pub const CLEANER_RUNS: &str = "ticket_registry_cleaner_runs_total";

    /// Tickets removed, labelled by `kind`.
    pub const CLEANER_REMOVED: &str = "ticket_registry_cleaner_removed_total";

    /// Runs skipped because another node held the lock.
    pub const CLEANER_SKIPPED: &str = "ticket_registry_cleaner_skipped_total";

    /// Per-ticket deletions that failed and were skipped.
    pub const CLEANER_DELETE_FAILURES: &str = "ticket_registry_cleaner_delete_failures_total";
}

/// Lock domain used by the cleaner unless configured otherwise.
pub const DEFAULT_LOCK_DOMAIN: &str = "cas-ticket-registry-cleaner";

/// Seconds a lock stays valid without release.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 3600;

/// Optimistic attempts a shared backend makes before giving up on a contended grant.
pub const GRANT_MAX_ATTEMPTS: usize = 16;

/// Page size used when a backend walks its whole keyspace.
pub const SNAPSHOT_PAGE_SIZE: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_segments_are_distinct() {
        let segments = [
            redis_keys::TICKET_GRANTING,
            redis_keys::SERVICE,
            redis_keys::INDEX,
            redis_keys::CHILDREN,
            redis_keys::CONSUMED,
            redis_keys::LOCK,
        ];
        for (i, a) in segments.iter().enumerate() {
            for b in &segments[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
