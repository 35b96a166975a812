//! Unique ticket identifier generation.

use crate::ticket::TicketId;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default length of the random part of a ticket id.
pub const DEFAULT_RANDOM_LENGTH: usize = 32;

/// Generates ids of the form `PREFIX-<counter>-<random>[-<suffix>]`.
///
/// The counter keeps ids unique within a process even if the random part
/// collides; the optional suffix identifies the issuing node in a cluster.
///
/// # Examples
///
/// ```
/// # use sso_ticket_core::TicketIdGenerator;
/// let generator = TicketIdGenerator::new().with_suffix("node1");
/// let id = generator.new_ticket_id("TGT");
///
/// assert_eq!(id.prefix(), "TGT");
/// assert!(id.as_str().ends_with("-node1"));
/// ```
#[derive(Debug)]
pub struct TicketIdGenerator {
    counter: AtomicU64,
    random_length: usize,
    suffix: Option<String>,
}

impl TicketIdGenerator {
    /// Create a generator with the default random length and no suffix.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            random_length: DEFAULT_RANDOM_LENGTH,
            suffix: None,
        }
    }

    /// Set the length of the random part.
    #[must_use]
    pub const fn with_random_length(mut self, random_length: usize) -> Self {
        self.random_length = random_length;
        self
    }

    /// Append a node suffix to every generated id.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Generate a new id with the given prefix.
    pub fn new_ticket_id(&self, prefix: &str) -> TicketId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.random_length)
            .map(char::from)
            .collect();

        match &self.suffix {
            Some(suffix) => TicketId(format!("{prefix}-{sequence}-{random}-{suffix}")),
            None => TicketId(format!("{prefix}-{sequence}-{random}")),
        }
    }
}

impl Default for TicketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_prefixed() {
        let generator = TicketIdGenerator::new();
        let ids: HashSet<TicketId> = (0..1000).map(|_| generator.new_ticket_id("ST")).collect();

        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.prefix() == "ST"));
    }

    #[test]
    fn test_random_length() {
        let generator = TicketIdGenerator::new().with_random_length(8);
        let id = generator.new_ticket_id("TGT");
        let parts: Vec<&str> = id.as_str().split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2].len(), 8);
    }
}
