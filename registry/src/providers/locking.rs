//! Distributed locking strategy trait.

use crate::error::Result;
use std::future::Future;

/// Cluster-wide mutual exclusion for maintenance work.
///
/// # Implementation Notes
///
/// - `acquire` never blocks on contention
/// - Locks are not reentrant: a holder calling `acquire` twice without
///   releasing gets `false` the second time
/// - A lock that is not released becomes available after its timeout
pub trait LockingStrategy: Send + Sync {
    /// Try to take the lock.
    ///
    /// # Returns
    ///
    /// `true` if this node now holds the lock.
    ///
    /// # Errors
    ///
    /// Returns error if the lock backend is unavailable.
    fn acquire(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Release the lock if this node holds it. Releasing a lock held by
    /// another node is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the lock backend is unavailable.
    fn release(&self) -> impl Future<Output = Result<()>> + Send;
}
