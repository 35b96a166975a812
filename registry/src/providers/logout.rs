//! Logout manager trait.

use crate::error::Result;
use sso_ticket_core::TicketGrantingTicket;
use std::future::Future;

/// Single logout notifier.
///
/// Invoked before a ticket-granting ticket is destroyed, either explicitly
/// or by the cleaner, so every service in [`TicketGrantingTicket::services`]
/// can end its local session.
pub trait LogoutManager: Send + Sync {
    /// Notify the services of `ticket` that the session ended.
    ///
    /// # Errors
    ///
    /// Returns error if notification could not be dispatched.
    fn perform_logout(
        &self,
        ticket: &TicketGrantingTicket,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Logout manager that notifies nobody.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogoutManager;

impl LogoutManager for NoopLogoutManager {
    async fn perform_logout(&self, _ticket: &TicketGrantingTicket) -> Result<()> {
        Ok(())
    }
}
