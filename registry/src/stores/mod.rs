//! Storage implementations for the ticket registry.
//!
//! This module provides ticket storage and lock backends:
//!
//! - **Default Ticket Registry** (memory) - Single-process map with cascade index
//! - **Ticket Registry** (Redis) - Shared ticket storage with policy-driven TTL
//! - **Locking Strategy** (memory) - Shared lock table for tests and single nodes
//! - **Locking Strategy** (Redis) - `SET NX EX` lock with compare-and-delete release
//! - **Locking Strategy** (PostgreSQL) - `LOCKS` table with row locking

pub mod lock_memory;
pub mod lock_redis;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod ticket_redis;

// Re-exports
pub use lock_memory::{InMemoryLockingStrategy, LockEntry, LockTable};
pub use lock_redis::RedisLockingStrategy;
pub use memory::DefaultTicketRegistry;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLockingStrategy;
pub use ticket_redis::RedisTicketRegistry;
