//! Ticket registry trait.

use crate::error::{Result, TicketError};
use chrono::{DateTime, Utc};
use sso_ticket_core::{ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketKind};
use std::future::Future;

/// Ticket storage.
///
/// This trait abstracts over the backend holding tickets (process memory,
/// Redis). Tickets handed out are copies: a caller that mutates one must
/// write it back with [`TicketRegistry::update_ticket`].
///
/// # Implementation Notes
///
/// - All operations must be safe under concurrent invocation
/// - A missing ticket is `Ok(None)`, never an error
/// - Deleting a ticket-granting ticket removes every descendant
/// - Batches are ordered by creation time, then id
pub trait TicketRegistry: Send + Sync {
    /// Store a ticket.
    ///
    /// Re-adding an existing id replaces the stored ticket.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The id is empty or its prefix does not match the ticket kind
    /// - The backend is unavailable
    fn add_ticket(&self, ticket: Ticket) -> impl Future<Output = Result<()>> + Send;

    /// Look up a ticket of any kind.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn get_ticket(&self, id: &TicketId) -> impl Future<Output = Result<Option<Ticket>>> + Send;

    /// Look up a ticket that must be of kind `expected`.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::TypeMismatch` if a ticket of another kind is
    /// stored under `id`.
    fn get_ticket_of_kind(
        &self,
        id: &TicketId,
        expected: TicketKind,
    ) -> impl Future<Output = Result<Option<Ticket>>> + Send {
        async move {
            match self.get_ticket(id).await? {
                Some(ticket) if ticket.kind() != expected => Err(TicketError::TypeMismatch {
                    id: id.clone(),
                    expected,
                    actual: ticket.kind(),
                }),
                found => Ok(found),
            }
        }
    }

    /// Look up a ticket-granting ticket.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::TypeMismatch` if `id` names a service ticket.
    fn get_ticket_granting_ticket(
        &self,
        id: &TicketId,
    ) -> impl Future<Output = Result<Option<TicketGrantingTicket>>> + Send {
        async move {
            Ok(self
                .get_ticket_of_kind(id, TicketKind::TicketGranting)
                .await?
                .and_then(|ticket| match ticket {
                    Ticket::Granting(tgt) => Some(tgt),
                    Ticket::Service(_) => None,
                }))
        }
    }

    /// Look up a service ticket.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::TypeMismatch` if `id` names a ticket-granting ticket.
    fn get_service_ticket(
        &self,
        id: &TicketId,
    ) -> impl Future<Output = Result<Option<ServiceTicket>>> + Send {
        async move {
            Ok(self
                .get_ticket_of_kind(id, TicketKind::Service)
                .await?
                .and_then(|ticket| match ticket {
                    Ticket::Service(st) => Some(st),
                    Ticket::Granting(_) => None,
                }))
        }
    }

    /// Write back a mutated copy of a stored ticket.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No ticket is stored under the id → `TicketError::InvalidTicket`
    /// - The ticket is malformed or the backend is unavailable
    fn update_ticket(&self, ticket: Ticket) -> impl Future<Output = Result<()>> + Send;

    /// Atomically grant a child ticket from a stored ticket-granting ticket.
    ///
    /// `grant` runs against the current stored parent and returns the child
    /// it granted. The mutated parent and the child are then written
    /// together, so concurrent grants on one session never lose an update and
    /// a child is never stored after its parent was removed. `grant` may be
    /// invoked more than once if the backend retries; an error from it
    /// aborts the grant without writing anything.
    ///
    /// # Returns
    ///
    /// The granted child, or `None` if no parent is stored under `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `grant` fails (its error is returned unchanged)
    /// - `parent_id` names a service ticket → `TicketError::TypeMismatch`
    /// - The child is malformed or not a child of `parent_id` → `TicketError::InvalidArgument`
    /// - The backend is unavailable
    fn grant_ticket<T, F>(
        &self,
        parent_id: &TicketId,
        grant: F,
    ) -> impl Future<Output = Result<Option<T>>> + Send
    where
        T: Into<Ticket> + Clone + Send,
        F: FnMut(&mut TicketGrantingTicket) -> Result<T> + Send;

    /// Delete a ticket and, for ticket-granting tickets, all its descendants.
    ///
    /// # Returns
    ///
    /// Tickets removed per kind, including cascaded children. An unknown id
    /// removes nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn remove_ticket(&self, id: &TicketId) -> impl Future<Output = Result<RemovedTickets>> + Send;

    /// Delete a ticket and, for ticket-granting tickets, all its descendants.
    ///
    /// # Returns
    ///
    /// Number of tickets removed, including cascaded children. An unknown id
    /// returns 0.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn delete_ticket(&self, id: &TicketId) -> impl Future<Output = Result<usize>> + Send {
        async move { Ok(self.remove_ticket(id).await?.total()) }
    }

    /// Point-in-time snapshot of every stored ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn get_tickets(&self) -> impl Future<Output = Result<Vec<Ticket>>> + Send;

    /// Page of ticket-granting tickets.
    ///
    /// Returns an empty page once `offset` is past the end.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn get_ticket_granting_ticket_batch(
        &self,
        offset: usize,
        count: usize,
    ) -> impl Future<Output = Result<Vec<TicketGrantingTicket>>> + Send;

    /// Page of service tickets.
    ///
    /// Returns an empty page once `offset` is past the end.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn get_service_ticket_batch(
        &self,
        offset: usize,
        count: usize,
    ) -> impl Future<Output = Result<Vec<ServiceTicket>>> + Send;

    /// Atomically consume a service ticket.
    ///
    /// Exactly one of any number of concurrent callers receives the
    /// consumed ticket; the others get `None`.
    ///
    /// # Returns
    ///
    /// The consumed ticket, or `None` if it is absent, already consumed or
    /// expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::TypeMismatch` if `id` names a ticket-granting ticket.
    fn claim_service_ticket(
        &self,
        id: &TicketId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<ServiceTicket>>> + Send;

    /// Number of stored ticket-granting tickets.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn session_count(&self) -> impl Future<Output = Result<usize>> + Send;

    /// Number of stored service tickets.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn service_ticket_count(&self) -> impl Future<Output = Result<usize>> + Send;
}

/// Tickets removed by one deletion, counted per keyspace.
///
/// Proxy-granting tickets count as ticket-granting tickets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovedTickets {
    /// Ticket-granting and proxy-granting tickets removed
    pub ticket_granting: usize,
    /// Service tickets removed
    pub service: usize,
}

impl RemovedTickets {
    /// Total across both kinds.
    #[must_use]
    pub const fn total(self) -> usize {
        self.ticket_granting + self.service
    }

    /// Count one removed ticket of `kind`.
    pub fn record(&mut self, kind: TicketKind) {
        match kind {
            TicketKind::TicketGranting => self.ticket_granting += 1,
            TicketKind::Service => self.service += 1,
        }
    }

    /// Removed count of `kind`.
    #[must_use]
    pub const fn of_kind(self, kind: TicketKind) -> usize {
        match kind {
            TicketKind::TicketGranting => self.ticket_granting,
            TicketKind::Service => self.service,
        }
    }
}

/// Check a child handed back by [`TicketRegistry::grant_ticket`].
///
/// # Errors
///
/// Returns `TicketError::InvalidArgument` if the child is malformed or names
/// another parent.
pub fn validate_child(parent_id: &TicketId, child: &Ticket) -> Result<()> {
    validate_ticket(child)?;
    if child.parent_id() != Some(parent_id) {
        return Err(TicketError::InvalidArgument(format!(
            "ticket {} is not a child of {parent_id}",
            child.id()
        )));
    }
    Ok(())
}

/// Reject tickets a registry must not store.
///
/// # Errors
///
/// Returns `TicketError::InvalidArgument` if the id is empty or its prefix
/// does not match the ticket kind.
pub fn validate_ticket(ticket: &Ticket) -> Result<()> {
    let id = ticket.id();
    if id.as_str().is_empty() {
        return Err(TicketError::InvalidArgument("ticket id is empty".to_string()));
    }
    if !ticket.kind().accepts(id) {
        return Err(TicketError::InvalidArgument(format!(
            "ticket id {id} does not carry a {} prefix",
            ticket.kind()
        )));
    }
    Ok(())
}

/// Sort key shared by every backend's batch retrieval.
pub(crate) fn batch_order(ticket: &Ticket) -> (DateTime<Utc>, &TicketId) {
    (ticket.state().created_at, ticket.id())
}
