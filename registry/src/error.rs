//! Error types for ticket registry operations.

use sso_ticket_core::{TicketId, TicketKind};
use thiserror::Error;

/// Result type alias for ticket registry operations.
pub type Result<T> = std::result::Result<T, TicketError>;

/// Error taxonomy for the ticket registry and the coordinator.
///
/// A missing ticket is never an error: lookups return `Option::None`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    // ═══════════════════════════════════════════════════════════
    // Ticket Errors
    // ═══════════════════════════════════════════════════════════

    /// A ticket exists under the id but has a different kind.
    #[error("Ticket {id} is a {actual}, expected a {expected}")]
    TypeMismatch {
        /// Requested ticket id
        id: TicketId,
        /// Kind the caller asked for
        expected: TicketKind,
        /// Kind actually stored
        actual: TicketKind,
    },

    /// Ticket is unknown, consumed, or otherwise unusable.
    #[error("Invalid ticket: {id}")]
    InvalidTicket {
        /// Offending ticket id
        id: TicketId,
    },

    /// Ticket has expired.
    #[error("Ticket has expired: {id}")]
    TicketExpired {
        /// Offending ticket id
        id: TicketId,
    },

    /// Malformed input (empty id, id prefix not matching the ticket kind).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ═══════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════

    /// Service is not registered.
    #[error("Service is not authorized: {service}")]
    UnauthorizedService {
        /// Service identifier
        service: String,
    },

    /// Service does not participate in SSO and no credentials were presented.
    #[error("Service does not allow single sign-on: {service}")]
    UnauthorizedSsoService {
        /// Service identifier
        service: String,
    },

    /// Service is not allowed to obtain proxy-granting tickets.
    #[error("Service is not allowed to proxy: {service}")]
    UnauthorizedProxying {
        /// Service identifier
        service: String,
    },

    /// Presented credentials authenticate a different principal than the session.
    #[error("Principal mismatch: session belongs to {expected}, credentials are for {actual}")]
    PrincipalMismatch {
        /// Principal of the session
        expected: String,
        /// Principal of the presented credentials
        actual: String,
    },

    /// Service ticket validated for another service than it was issued for.
    #[error("Service ticket {id} was not issued for {service}")]
    ServiceMismatch {
        /// Service ticket id
        id: TicketId,
        /// Service presented at validation
        service: String,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Storage backend is unreachable or returned an error.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Ticket could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (poisoned lock, collaborator failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TicketError {
    /// Returns `true` if the error means the presented ticket cannot be used.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_ticket_registry::TicketError;
    /// # use sso_ticket_core::TicketId;
    /// assert!(TicketError::InvalidTicket { id: TicketId::from("ST-1-a") }.is_invalid_ticket());
    /// assert!(TicketError::TicketExpired { id: TicketId::from("ST-1-a") }.is_invalid_ticket());
    /// assert!(!TicketError::StorageUnavailable("down".into()).is_invalid_ticket());
    /// ```
    #[must_use]
    pub const fn is_invalid_ticket(&self) -> bool {
        matches!(self, Self::InvalidTicket { .. } | Self::TicketExpired { .. })
    }

    /// Returns `true` if the caller was refused by service authorization.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::UnauthorizedService { .. }
                | Self::UnauthorizedSsoService { .. }
                | Self::UnauthorizedProxying { .. }
        )
    }

    pub(crate) fn storage(context: &str, error: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(format!("{context}: {error}"))
    }

    pub(crate) fn serialization(error: impl std::fmt::Display) -> Self {
        Self::Serialization(error.to_string())
    }

    pub(crate) fn poisoned() -> Self {
        Self::Internal("Mutex lock failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message() {
        let error = TicketError::TypeMismatch {
            id: TicketId::from("ST-1-a"),
            expected: TicketKind::TicketGranting,
            actual: TicketKind::Service,
        };
        assert_eq!(
            error.to_string(),
            "Ticket ST-1-a is a service ticket, expected a ticket-granting ticket"
        );
        assert!(!error.is_invalid_ticket());
    }

    #[test]
    fn test_unauthorized_classification() {
        let error = TicketError::UnauthorizedProxying {
            service: "https://app.example.com".into(),
        };
        assert!(error.is_unauthorized());
        assert!(!TicketError::Internal("x".into()).is_unauthorized());
    }
}
