//! Mock logout manager for testing.

use crate::error::{Result, TicketError};
use crate::providers::LogoutManager;
use sso_ticket_core::{TicketGrantingTicket, TicketId};
use std::sync::{Arc, Mutex};

/// Mock logout manager.
///
/// Records the id of every ticket-granting ticket it was asked to log out,
/// and can be switched to fail.
#[derive(Debug, Clone, Default)]
pub struct MockLogoutManager {
    logged_out: Arc<Mutex<Vec<TicketId>>>,
    fail: bool,
}

impl MockLogoutManager {
    /// Create a recording logout manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logout manager whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Tickets logged out so far, in call order.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn logged_out(&self) -> Result<Vec<TicketId>> {
        Ok(self
            .logged_out
            .lock()
            .map_err(|_| TicketError::poisoned())?
            .clone())
    }
}

impl LogoutManager for MockLogoutManager {
    async fn perform_logout(&self, ticket: &TicketGrantingTicket) -> Result<()> {
        if self.fail {
            return Err(TicketError::Internal("logout notification failed".to_string()));
        }
        self.logged_out
            .lock()
            .map_err(|_| TicketError::poisoned())?
            .push(ticket.id().clone());
        Ok(())
    }
}
