//! Authentication value types.
//!
//! These are produced by credential validators outside this workspace and
//! carried by tickets unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map released with a principal or an authentication.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// An authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g. username).
    pub id: String,

    /// Principal attributes.
    pub attributes: Attributes,
}

impl Principal {
    /// Create a principal without attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Add an attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }
}

/// Result of a successful credential validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    /// Authenticated principal.
    pub principal: Principal,

    /// When the credentials were validated.
    pub authenticated_at: DateTime<Utc>,

    /// Authentication metadata (method, handler, remember-me, ...).
    pub attributes: Attributes,
}

impl Authentication {
    /// Create an authentication record for `principal`.
    #[must_use]
    pub fn new(principal: Principal, authenticated_at: DateTime<Utc>) -> Self {
        Self {
            principal,
            authenticated_at,
            attributes: Attributes::new(),
        }
    }

    /// Add an authentication attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }
}

/// Target application a service ticket is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    /// Service identifier, usually the application URL.
    pub id: String,
}

impl Service {
    /// Create a service from its identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Identifier with query string, fragment and path parameters
    /// (`;jsessionid=...`) removed.
    #[must_use]
    pub fn normalized_id(&self) -> &str {
        self.id
            .find(['?', '#', ';'])
            .map_or(self.id.as_str(), |end| &self.id[..end])
    }

    /// Returns `true` if both services address the same application.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_ticket_core::Service;
    /// let service = Service::new("https://app.example.com/login?next=/home");
    /// assert!(service.matches(&Service::new("https://app.example.com/login;jsessionid=A1")));
    /// assert!(!service.matches(&Service::new("https://other.example.com/login")));
    /// ```
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.normalized_id() == other.normalized_id()
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_matching_ignores_query_and_session_parameters() {
        let base = Service::new("http://host.com");
        assert!(base.matches(&Service::new("http://host.com?test")));
        assert!(base.matches(&Service::new("http://host.com;JSESSIONID=xxx")));
        assert!(base.matches(&Service::new("http://host.com#fragment")));

        let webapp = Service::new("http://host.com/webapp1");
        assert!(webapp.matches(&Service::new("http://host.com/webapp1?test=true")));
        assert!(!webapp.matches(&Service::new("http://host.com/webapp2")));
    }

    #[test]
    fn test_principal_attributes_accumulate() {
        let principal = Principal::new("casuser")
            .with_attribute("memberOf", "staff")
            .with_attribute("memberOf", "faculty");

        assert_eq!(
            principal.attributes.get("memberOf"),
            Some(&vec!["staff".to_string(), "faculty".to_string()])
        );
    }
}
