//! Result of a successful service ticket validation.

use crate::authentication::{Authentication, Service};
use serde::{Deserialize, Serialize};

/// Validated result handed back to protocol adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Authentications from the validated ticket up to the root of the
    /// proxy chain. The last entry carries the released principal.
    pub chained_authentications: Vec<Authentication>,

    /// Service the ticket was validated for.
    pub service: Service,

    /// Whether the ticket was issued from freshly presented credentials.
    pub from_new_login: bool,
}

impl Assertion {
    /// Authentication of the session owner.
    #[must_use]
    pub fn primary_authentication(&self) -> Option<&Authentication> {
        self.chained_authentications.last()
    }

    /// Returns `true` if the ticket passed through at least one proxy.
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        self.chained_authentications.len() > 1
    }
}
