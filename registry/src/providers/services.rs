//! Service registry trait.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sso_ticket_core::{Authentication, Principal, Service};
use std::future::Future;

/// Registered service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredService {
    /// Service identifier, matched against requests with [`Service::matches`].
    pub id: String,

    /// Whether an existing session may be reused without fresh credentials.
    pub sso_enabled: bool,

    /// Whether the service may obtain proxy-granting tickets.
    pub proxy_allowed: bool,

    /// Whether the principal id is withheld from validation responses.
    pub anonymous_access: bool,

    /// Principal attributes released to the service. `None` releases all.
    pub allowed_attributes: Option<Vec<String>>,
}

impl RegisteredService {
    /// Create a service with SSO enabled, no proxying and all attributes released.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sso_enabled: true,
            proxy_allowed: false,
            anonymous_access: false,
            allowed_attributes: None,
        }
    }

    /// Set SSO participation.
    #[must_use]
    pub const fn with_sso_enabled(mut self, enabled: bool) -> Self {
        self.sso_enabled = enabled;
        self
    }

    /// Set proxy permission.
    #[must_use]
    pub const fn with_proxy_allowed(mut self, allowed: bool) -> Self {
        self.proxy_allowed = allowed;
        self
    }

    /// Set anonymous access.
    #[must_use]
    pub const fn with_anonymous_access(mut self, anonymous: bool) -> Self {
        self.anonymous_access = anonymous;
        self
    }

    /// Restrict released attributes.
    #[must_use]
    pub fn with_allowed_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// Returns `true` if this definition covers `service`.
    #[must_use]
    pub fn matches(&self, service: &Service) -> bool {
        Service::new(self.id.as_str()).matches(service)
    }

    /// Principal as released to this service.
    ///
    /// Anonymous services receive an empty id; attributes are filtered to
    /// `allowed_attributes` when set.
    #[must_use]
    pub fn release_principal(&self, principal: &Principal) -> Principal {
        let id = if self.anonymous_access {
            String::new()
        } else {
            principal.id.clone()
        };
        let attributes = match &self.allowed_attributes {
            Some(allowed) => principal
                .attributes
                .iter()
                .filter(|(name, _)| allowed.contains(name))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
            None => principal.attributes.clone(),
        };
        Principal { id, attributes }
    }

    /// Authentication as released to this service.
    #[must_use]
    pub fn release_authentication(&self, authentication: &Authentication) -> Authentication {
        Authentication {
            principal: self.release_principal(&authentication.principal),
            ..authentication.clone()
        }
    }
}

/// Service registry.
///
/// This trait abstracts over wherever service definitions live. Only lookup
/// is needed by the coordinator.
pub trait ServiceRegistry: Send + Sync {
    /// Find the definition covering `service`.
    ///
    /// # Errors
    ///
    /// Returns error if the registry backend is unavailable.
    fn find_service(
        &self,
        service: &Service,
    ) -> impl Future<Output = Result<Option<RegisteredService>>> + Send;
}
