//! Mock service registry for testing.

use crate::error::{Result, TicketError};
use crate::providers::{RegisteredService, ServiceRegistry};
use sso_ticket_core::Service;
use std::sync::{Arc, Mutex};

/// Mock service registry.
///
/// Uses in-memory storage; the first registered definition matching a
/// service wins.
#[derive(Debug, Clone, Default)]
pub struct MockServiceRegistry {
    services: Arc<Mutex<Vec<RegisteredService>>>,
}

impl MockServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `services`.
    #[must_use]
    pub fn with_services(services: impl IntoIterator<Item = RegisteredService>) -> Self {
        Self {
            services: Arc::new(Mutex::new(services.into_iter().collect())),
        }
    }

    /// Register a service definition.
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn register(&self, service: RegisteredService) -> Result<()> {
        self.services
            .lock()
            .map_err(|_| TicketError::poisoned())?
            .push(service);
        Ok(())
    }
}

impl ServiceRegistry for MockServiceRegistry {
    async fn find_service(&self, service: &Service) -> Result<Option<RegisteredService>> {
        Ok(self
            .services
            .lock()
            .map_err(|_| TicketError::poisoned())?
            .iter()
            .find(|registered| registered.matches(service))
            .cloned())
    }
}
