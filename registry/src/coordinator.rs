//! Central authentication service.
//!
//! The coordinator issues, validates, delegates and destroys tickets on top
//! of a [`TicketRegistry`]. Protocol adapters talk to it; it never talks to
//! a storage backend directly.
//!
//! ```text
//! create_ticket_granting_ticket ──▶ TGT
//!                                    │ grant_service_ticket
//!                                    ▼
//!                                    ST ──validate_service_ticket──▶ Assertion
//!                                    │ delegate_ticket_granting_ticket
//!                                    ▼
//!                                   PGT ──grant_service_ticket──▶ ST ...
//! ```

use crate::config::TicketConfig;
use crate::error::{Result, TicketError};
use crate::providers::{LogoutManager, RegisteredService, ServiceRegistry, TicketRegistry};
use sso_ticket_core::{
    Assertion, Authentication, Clock, Service, ServiceTicket, SystemClock, Ticket,
    TicketGrantingTicket, TicketId, TicketIdGenerator,
};

/// Ticket lifecycle coordinator.
///
/// # Type Parameters
///
/// - `R`: Ticket storage
/// - `S`: Registered service lookup
/// - `L`: Single logout notifier
/// - `C`: Time source
pub struct CentralAuthenticationService<R, S, L, C = SystemClock> {
    registry: R,
    services: S,
    logout_manager: L,
    clock: C,
    id_generator: TicketIdGenerator,
    config: TicketConfig,
}

impl<R, S, L> CentralAuthenticationService<R, S, L, SystemClock>
where
    R: TicketRegistry,
    S: ServiceRegistry,
    L: LogoutManager,
{
    /// Create a coordinator.
    #[must_use]
    pub const fn new(registry: R, services: S, logout_manager: L, config: TicketConfig) -> Self {
        Self {
            registry,
            services,
            logout_manager,
            clock: SystemClock,
            id_generator: TicketIdGenerator::new(),
            config,
        }
    }
}

impl<R, S, L, C> CentralAuthenticationService<R, S, L, C>
where
    R: TicketRegistry,
    S: ServiceRegistry,
    L: LogoutManager,
    C: Clock,
{
    /// Use a different time source.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> CentralAuthenticationService<R, S, L, C2> {
        CentralAuthenticationService {
            registry: self.registry,
            services: self.services,
            logout_manager: self.logout_manager,
            clock,
            id_generator: self.id_generator,
            config: self.config,
        }
    }

    /// Use a different ticket id generator (e.g. one with a node suffix).
    #[must_use]
    pub fn with_id_generator(mut self, id_generator: TicketIdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Underlying ticket registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// Start a single sign-on session.
    ///
    /// # Errors
    ///
    /// Returns error if the ticket cannot be stored.
    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<TicketGrantingTicket> {
        let id = self.id_generator.new_ticket_id(TicketGrantingTicket::PREFIX);
        let principal = authentication.principal.id.clone();
        let tgt = TicketGrantingTicket::new(
            id,
            authentication,
            self.config.ticket_granting_ticket_policy,
            self.clock.now(),
        );

        self.registry.add_ticket(tgt.clone().into()).await?;
        tracing::info!(ticket_id = %tgt.id(), principal = %principal, "Created ticket-granting ticket");
        Ok(tgt)
    }

    /// Issue a service ticket for `service` from a ticket-granting ticket.
    ///
    /// `authentication` carries freshly presented credentials, if any. The
    /// session is updated and the ticket stored in one registry step, so
    /// concurrent grants on one session all take effect.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The ticket-granting ticket is unknown → `TicketError::InvalidTicket`
    /// - It has expired → `TicketError::TicketExpired` (the ticket is removed)
    /// - The service is not registered → `TicketError::UnauthorizedService`
    /// - The service does not allow SSO and the session was already used
    ///   without fresh credentials → `TicketError::UnauthorizedSsoService`
    /// - Fresh credentials belong to someone else → `TicketError::PrincipalMismatch`
    pub async fn grant_service_ticket(
        &self,
        ticket_granting_ticket_id: &TicketId,
        service: Service,
        authentication: Option<Authentication>,
    ) -> Result<ServiceTicket> {
        let now = self.clock.now();
        let tgt = self
            .registry
            .get_ticket_granting_ticket(ticket_granting_ticket_id)
            .await?
            .ok_or_else(|| invalid(ticket_granting_ticket_id))?;
        if tgt.is_expired(now) {
            return Err(self.remove_expired(ticket_granting_ticket_id).await);
        }

        let registered = self.registered_service(&service).await?;
        let credentials_provided = authentication.is_some();
        let id = self.id_generator.new_ticket_id(ServiceTicket::PREFIX);
        let policy = self.config.service_ticket_policy(credentials_provided);
        let only_track_most_recent_session = self.config.only_track_most_recent_session;

        let granted = self
            .registry
            .grant_ticket(ticket_granting_ticket_id, |tgt| {
                if tgt.is_expired(now) {
                    return Err(expired(tgt.id()));
                }
                if !registered.sso_enabled && !credentials_provided && tgt.state().use_count > 0 {
                    return Err(TicketError::UnauthorizedSsoService {
                        service: service.id.clone(),
                    });
                }
                if let Some(fresh) = &authentication {
                    let session_principal = &tgt.authentication().principal.id;
                    if fresh.principal.id != *session_principal {
                        return Err(TicketError::PrincipalMismatch {
                            expected: session_principal.clone(),
                            actual: fresh.principal.id.clone(),
                        });
                    }
                }
                Ok(tgt.grant_service_ticket(
                    id.clone(),
                    service.clone(),
                    policy,
                    credentials_provided,
                    only_track_most_recent_session,
                    now,
                ))
            })
            .await;

        let st = match granted {
            Ok(Some(st)) => st,
            Ok(None) => return Err(invalid(ticket_granting_ticket_id)),
            Err(TicketError::TicketExpired { .. }) => {
                return Err(self.remove_expired(ticket_granting_ticket_id).await);
            }
            Err(error) => return Err(error),
        };

        tracing::info!(
            ticket_id = %st.id(),
            parent_id = %st.ticket_granting_ticket_id(),
            service = %st.service(),
            from_new_login = st.is_from_new_login(),
            "Granted service ticket"
        );
        Ok(st)
    }

    /// Validate a service ticket presented by `service`.
    ///
    /// The ticket is consumed and removed whether or not validation
    /// succeeds. The returned assertion carries the principal as released to
    /// the registered service.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The ticket is unknown, consumed or expired → `TicketError::InvalidTicket`
    /// - It was issued for another service → `TicketError::ServiceMismatch`
    /// - The service is not registered → `TicketError::UnauthorizedService`
    /// - The granting session is gone → `TicketError::InvalidTicket`, or has
    ///   expired → `TicketError::TicketExpired`
    pub async fn validate_service_ticket(
        &self,
        service_ticket_id: &TicketId,
        service: &Service,
    ) -> Result<Assertion> {
        let now = self.clock.now();
        let Some(st) = self
            .registry
            .claim_service_ticket(service_ticket_id, now)
            .await?
        else {
            tracing::debug!(ticket_id = %service_ticket_id, "Service ticket unknown, consumed or expired");
            return Err(invalid(service_ticket_id));
        };
        self.registry.delete_ticket(service_ticket_id).await?;

        if !st.service().matches(service) {
            tracing::debug!(ticket_id = %service_ticket_id, %service, "Service ticket presented by another service");
            return Err(TicketError::ServiceMismatch {
                id: service_ticket_id.clone(),
                service: service.id.clone(),
            });
        }

        let registered = self.registered_service(service).await?;
        let parent_id = st.ticket_granting_ticket_id();
        let parent = self
            .registry
            .get_ticket_granting_ticket(parent_id)
            .await?
            .ok_or_else(|| invalid(parent_id))?;
        if parent.is_expired(now) {
            tracing::debug!(ticket_id = %service_ticket_id, parent_id = %parent_id, "Granting session expired");
            return Err(expired(parent_id));
        }

        let mut chained_authentications = parent.chained_authentications();
        if let Some(root) = chained_authentications.last_mut() {
            *root = registered.release_authentication(root);
        }

        tracing::info!(ticket_id = %service_ticket_id, %service, "Validated service ticket");
        Ok(Assertion {
            chained_authentications,
            service: st.service().clone(),
            from_new_login: st.is_from_new_login(),
        })
    }

    /// Grant a proxy-granting ticket to the service a ticket was issued for.
    ///
    /// The service ticket is not consumed. The new ticket is a child of the
    /// service ticket's parent and is removed with it.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The service ticket or its parent is unknown → `TicketError::InvalidTicket`
    /// - Either has expired → `TicketError::TicketExpired`
    /// - The service may not proxy → `TicketError::UnauthorizedProxying`
    pub async fn delegate_ticket_granting_ticket(
        &self,
        service_ticket_id: &TicketId,
        authentication: Authentication,
    ) -> Result<TicketGrantingTicket> {
        let now = self.clock.now();
        let st = self
            .registry
            .get_service_ticket(service_ticket_id)
            .await?
            .ok_or_else(|| invalid(service_ticket_id))?;
        if st.is_expired(now) {
            return Err(expired(service_ticket_id));
        }

        let allowed = self
            .services
            .find_service(st.service())
            .await?
            .is_some_and(|registered| registered.proxy_allowed);
        if !allowed {
            return Err(TicketError::UnauthorizedProxying {
                service: st.service().id.clone(),
            });
        }

        let parent_id = st.ticket_granting_ticket_id();
        let id = self
            .id_generator
            .new_ticket_id(TicketGrantingTicket::PROXY_PREFIX);
        let policy = self.config.proxy_granting_ticket_policy;

        let pgt = self
            .registry
            .grant_ticket(parent_id, |parent| {
                if parent.is_expired(now) {
                    return Err(expired(parent.id()));
                }
                Ok(parent.grant_proxy_granting_ticket(
                    id.clone(),
                    st.service().clone(),
                    authentication.clone(),
                    policy,
                    now,
                ))
            })
            .await?
            .ok_or_else(|| invalid(parent_id))?;

        tracing::info!(ticket_id = %pgt.id(), parent_id = %parent_id, proxied_by = %st.service(), "Delegated proxy-granting ticket");
        Ok(pgt)
    }

    /// End a single sign-on session.
    ///
    /// Services the session logged into are notified, then the ticket and
    /// everything it granted are removed. A failed notification is logged
    /// and does not keep the session alive.
    ///
    /// # Returns
    ///
    /// Number of tickets removed; 0 for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns error if `id` names a service ticket or the registry fails.
    pub async fn destroy_ticket_granting_ticket(&self, id: &TicketId) -> Result<usize> {
        let Some(mut tgt) = self.registry.get_ticket_granting_ticket(id).await? else {
            tracing::debug!(ticket_id = %id, "Ticket-granting ticket already gone");
            return Ok(0);
        };

        tgt.expire();
        if let Err(error) = self.logout_manager.perform_logout(&tgt).await {
            tracing::warn!(ticket_id = %id, %error, "Single logout notification failed");
        }

        let removed = self.registry.delete_ticket(id).await?;
        tracing::info!(ticket_id = %id, removed, "Destroyed ticket-granting ticket");
        Ok(removed)
    }

    /// Look up any ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the registry fails.
    pub async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        self.registry.get_ticket(id).await
    }

    /// Remove an expired ticket-granting ticket and build the error reporting it.
    async fn remove_expired(&self, id: &TicketId) -> TicketError {
        tracing::debug!(ticket_id = %id, "Ticket-granting ticket expired, removing");
        if let Err(error) = self.registry.delete_ticket(id).await {
            return error;
        }
        expired(id)
    }

    async fn registered_service(&self, service: &Service) -> Result<RegisteredService> {
        self.services
            .find_service(service)
            .await?
            .ok_or_else(|| {
                tracing::debug!(%service, "Service not registered");
                TicketError::UnauthorizedService {
                    service: service.id.clone(),
                }
            })
    }
}

fn invalid(id: &TicketId) -> TicketError {
    TicketError::InvalidTicket { id: id.clone() }
}

fn expired(id: &TicketId) -> TicketError {
    TicketError::TicketExpired { id: id.clone() }
}
