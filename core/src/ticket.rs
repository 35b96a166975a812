//! Ticket data model.
//!
//! A [`Ticket`] is either a [`TicketGrantingTicket`] (an authenticated SSO
//! session) or a [`ServiceTicket`] (a single-use grant for one application).
//! Both share a [`TicketState`] usage record and a bound [`ExpirationPolicy`].
//!
//! Tickets are plain values. Code that mutates a ticket fetched from a
//! registry must write it back explicitly.

use crate::authentication::{Authentication, Service};
use crate::expiration::ExpirationPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════

/// Opaque ticket identifier carrying a kind-specific prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl TicketId {
    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix before the first `-` (`TGT`, `PGT`, `ST`).
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }
}

impl From<&str> for TicketId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TicketId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two ticket variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    /// Session-granting ticket (including proxy-granting tickets).
    TicketGranting,

    /// Single-use service ticket.
    Service,
}

impl TicketKind {
    /// Identifier prefix for tickets of this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => TicketGrantingTicket::PREFIX,
            Self::Service => ServiceTicket::PREFIX,
        }
    }

    /// Returns `true` if `id` carries a prefix this kind accepts.
    #[must_use]
    pub fn accepts(self, id: &TicketId) -> bool {
        Self::from_id(id) == Some(self)
    }

    /// Kind implied by the prefix of `id`, if the prefix is known.
    #[must_use]
    pub fn from_id(id: &TicketId) -> Option<Self> {
        match id.prefix() {
            TicketGrantingTicket::PREFIX | TicketGrantingTicket::PROXY_PREFIX => {
                Some(Self::TicketGranting)
            }
            ServiceTicket::PREFIX => Some(Self::Service),
            _ => None,
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TicketGranting => f.write_str("ticket-granting ticket"),
            Self::Service => f.write_str("service ticket"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared State
// ═══════════════════════════════════════════════════════════════════════

/// Usage record shared by every ticket kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Time of the most recent use (creation time until first use).
    pub last_used_at: DateTime<Utc>,

    /// Time of the use before the most recent one.
    pub previous_used_at: Option<DateTime<Utc>>,

    /// Number of times the ticket was used.
    pub use_count: u32,

    /// Latched once the ticket is observed expired or explicitly expired.
    pub expired: bool,
}

impl TicketState {
    /// Fresh state for a ticket created at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_used_at: now,
            previous_used_at: None,
            use_count: 0,
            expired: false,
        }
    }

    /// Record one use at `now`.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_used_at = Some(self.last_used_at);
        self.last_used_at = now;
        self.use_count = self.use_count.saturating_add(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Ticket Granting Ticket
// ═══════════════════════════════════════════════════════════════════════

/// An authenticated SSO session.
///
/// A root TGT has no parent. A proxy-granting ticket is a TGT whose parent
/// is the TGT that issued the proxied service ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    id: TicketId,
    state: TicketState,
    expiration_policy: ExpirationPolicy,
    authentication: Authentication,
    /// Authentications of the ancestors, closest first, root last.
    parent_authentications: Vec<Authentication>,
    parent_id: Option<TicketId>,
    proxied_by: Option<Service>,
    services: BTreeMap<TicketId, Service>,
    proxy_granting_tickets: BTreeSet<TicketId>,
}

impl TicketGrantingTicket {
    /// Identifier prefix of root ticket-granting tickets.
    pub const PREFIX: &'static str = "TGT";

    /// Identifier prefix of proxy-granting tickets.
    pub const PROXY_PREFIX: &'static str = "PGT";

    /// Create a root ticket-granting ticket.
    #[must_use]
    pub fn new(
        id: TicketId,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state: TicketState::new(now),
            expiration_policy,
            authentication,
            parent_authentications: Vec::new(),
            parent_id: None,
            proxied_by: None,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeSet::new(),
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub const fn id(&self) -> &TicketId {
        &self.id
    }

    /// Usage state.
    #[must_use]
    pub const fn state(&self) -> &TicketState {
        &self.state
    }

    /// Bound expiration policy.
    #[must_use]
    pub const fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Authentication that created this ticket.
    #[must_use]
    pub const fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// Authentication of the root ticket of the proxy chain.
    #[must_use]
    pub fn root_authentication(&self) -> &Authentication {
        self.parent_authentications
            .last()
            .unwrap_or(&self.authentication)
    }

    /// Authentications from this ticket up to the root.
    #[must_use]
    pub fn chained_authentications(&self) -> Vec<Authentication> {
        std::iter::once(&self.authentication)
            .chain(&self.parent_authentications)
            .cloned()
            .collect()
    }

    /// Parent ticket for proxy-granting tickets.
    #[must_use]
    pub const fn parent_id(&self) -> Option<&TicketId> {
        self.parent_id.as_ref()
    }

    /// Service that was proxied to obtain this ticket.
    #[must_use]
    pub const fn proxied_by(&self) -> Option<&Service> {
        self.proxied_by.as_ref()
    }

    /// Returns `true` for a root ticket (not a proxy-granting ticket).
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Service tickets granted by this ticket, with their services.
    #[must_use]
    pub const fn services(&self) -> &BTreeMap<TicketId, Service> {
        &self.services
    }

    /// Proxy-granting tickets issued under this ticket.
    #[must_use]
    pub const fn proxy_granting_tickets(&self) -> &BTreeSet<TicketId> {
        &self.proxy_granting_tickets
    }

    /// Forget every granted service (after single logout has run).
    pub fn remove_all_services(&mut self) {
        self.services.clear();
    }

    /// Returns `true` if the ticket is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.expired || self.expiration_policy.is_expired(&self.state, now)
    }

    /// Evaluate expiry at `now` and latch the result.
    pub fn check_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            self.state.expired = true;
        }
        self.state.expired
    }

    /// Explicitly and irreversibly invalidate the ticket.
    pub fn expire(&mut self) {
        self.state.expired = true;
    }

    /// Grant a service ticket for `service`.
    ///
    /// Records the grant as a use of this ticket. When
    /// `only_track_most_recent_session` is set, an earlier grant for a
    /// matching service is forgotten so single logout only targets the most
    /// recent one.
    #[must_use]
    pub fn grant_service_ticket(
        &mut self,
        id: TicketId,
        service: Service,
        expiration_policy: ExpirationPolicy,
        credentials_provided: bool,
        only_track_most_recent_session: bool,
        now: DateTime<Utc>,
    ) -> ServiceTicket {
        self.state.record_use(now);

        if only_track_most_recent_session {
            self.services.retain(|_, existing| !existing.matches(&service));
        }
        self.services.insert(id.clone(), service.clone());

        let from_new_login = self.state.use_count == 1 || credentials_provided;

        ServiceTicket {
            id,
            state: TicketState::new(now),
            expiration_policy,
            ticket_granting_ticket_id: self.id.clone(),
            service,
            from_new_login,
            consumed: false,
        }
    }

    /// Grant a proxy-granting ticket to `proxied_by` on behalf of this session.
    #[must_use]
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: TicketId,
        proxied_by: Service,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        self.proxy_granting_tickets.insert(id.clone());

        Self {
            id,
            state: TicketState::new(now),
            expiration_policy,
            authentication,
            parent_authentications: self.chained_authentications(),
            parent_id: Some(self.id.clone()),
            proxied_by: Some(proxied_by),
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeSet::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Service Ticket
// ═══════════════════════════════════════════════════════════════════════

/// Single-use grant for one target application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    id: TicketId,
    state: TicketState,
    expiration_policy: ExpirationPolicy,
    ticket_granting_ticket_id: TicketId,
    service: Service,
    from_new_login: bool,
    consumed: bool,
}

impl ServiceTicket {
    /// Identifier prefix of service tickets.
    pub const PREFIX: &'static str = "ST";

    /// Ticket identifier.
    #[must_use]
    pub const fn id(&self) -> &TicketId {
        &self.id
    }

    /// Usage state.
    #[must_use]
    pub const fn state(&self) -> &TicketState {
        &self.state
    }

    /// Bound expiration policy.
    #[must_use]
    pub const fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Ticket-granting ticket that issued this ticket.
    #[must_use]
    pub const fn ticket_granting_ticket_id(&self) -> &TicketId {
        &self.ticket_granting_ticket_id
    }

    /// Target application.
    #[must_use]
    pub const fn service(&self) -> &Service {
        &self.service
    }

    /// Returns `true` if issued from freshly presented credentials.
    #[must_use]
    pub const fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// Returns `true` once the ticket has been validated.
    #[must_use]
    pub const fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Returns `true` if the ticket is consumed or expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.consumed || self.state.expired || self.expiration_policy.is_expired(&self.state, now)
    }

    /// Evaluate expiry at `now` and latch the result.
    pub fn check_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            self.state.expired = true;
        }
        self.state.expired
    }

    /// Explicitly and irreversibly invalidate the ticket.
    pub fn expire(&mut self) {
        self.state.expired = true;
    }

    /// Consume the ticket.
    ///
    /// Returns `true` only for the first call on an unexpired ticket. The
    /// consumed ticket reports expired from then on.
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> bool {
        if self.check_expired(now) {
            return false;
        }
        self.state.record_use(now);
        self.consumed = true;
        true
    }

    /// Consume the ticket and check it was issued for `service`.
    ///
    /// The ticket is consumed even when the service does not match.
    pub fn is_valid_for(&mut self, service: &Service, now: DateTime<Utc>) -> bool {
        self.try_consume(now) && self.service.matches(service)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tagged Variant
// ═══════════════════════════════════════════════════════════════════════

/// Any ticket stored in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ticket {
    /// Ticket-granting ticket.
    Granting(TicketGrantingTicket),

    /// Service ticket.
    Service(ServiceTicket),
}

impl Ticket {
    /// Ticket identifier.
    #[must_use]
    pub const fn id(&self) -> &TicketId {
        match self {
            Self::Granting(tgt) => tgt.id(),
            Self::Service(st) => st.id(),
        }
    }

    /// Ticket kind.
    #[must_use]
    pub const fn kind(&self) -> TicketKind {
        match self {
            Self::Granting(_) => TicketKind::TicketGranting,
            Self::Service(_) => TicketKind::Service,
        }
    }

    /// Usage state.
    #[must_use]
    pub const fn state(&self) -> &TicketState {
        match self {
            Self::Granting(tgt) => tgt.state(),
            Self::Service(st) => st.state(),
        }
    }

    /// Bound expiration policy.
    #[must_use]
    pub const fn expiration_policy(&self) -> &ExpirationPolicy {
        match self {
            Self::Granting(tgt) => tgt.expiration_policy(),
            Self::Service(st) => st.expiration_policy(),
        }
    }

    /// Owning ticket-granting ticket, if any.
    #[must_use]
    pub const fn parent_id(&self) -> Option<&TicketId> {
        match self {
            Self::Granting(tgt) => tgt.parent_id(),
            Self::Service(st) => Some(st.ticket_granting_ticket_id()),
        }
    }

    /// Returns `true` if the ticket is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Granting(tgt) => tgt.is_expired(now),
            Self::Service(st) => st.is_expired(now),
        }
    }

    /// Explicitly and irreversibly invalidate the ticket.
    pub fn expire(&mut self) {
        match self {
            Self::Granting(tgt) => tgt.expire(),
            Self::Service(st) => st.expire(),
        }
    }

    /// Time left before a backend may evict this ticket on its own.
    #[must_use]
    pub fn remaining_time_to_live(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.expiration_policy()
            .remaining_time_to_live(self.state(), now)
    }

    /// Borrow as a ticket-granting ticket.
    #[must_use]
    pub const fn as_ticket_granting_ticket(&self) -> Option<&TicketGrantingTicket> {
        match self {
            Self::Granting(tgt) => Some(tgt),
            Self::Service(_) => None,
        }
    }

    /// Borrow as a service ticket.
    #[must_use]
    pub const fn as_service_ticket(&self) -> Option<&ServiceTicket> {
        match self {
            Self::Service(st) => Some(st),
            Self::Granting(_) => None,
        }
    }
}

impl From<TicketGrantingTicket> for Ticket {
    fn from(value: TicketGrantingTicket) -> Self {
        Self::Granting(value)
    }
}

impl From<ServiceTicket> for Ticket {
    fn from(value: ServiceTicket) -> Self {
        Self::Service(value)
    }
}
