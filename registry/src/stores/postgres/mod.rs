//! PostgreSQL storage implementations.
//!
//! This module provides the lock table used by clustered deployments that
//! already run PostgreSQL.

pub mod lock;

// Re-exports
pub use lock::PostgresLockingStrategy;
