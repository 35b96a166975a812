//! # SSO Ticket Registry
//!
//! Storage, expiry and lifecycle management for single sign-on tickets.
//!
//! ## Features
//!
//! - **Pluggable storage**: in-memory and Redis ticket registries
//! - **Cascading removal**: destroying a session removes everything it granted
//! - **Atomic single use**: a service ticket validates exactly once, cluster-wide
//! - **Cluster-safe cleanup**: a lock-guarded background cleaner evicts expired tickets
//! - **Testable**: every collaborator is a trait with an in-memory implementation
//!
//! ## Architecture
//!
//! ```text
//! Protocol adapter → CentralAuthenticationService → TicketRegistry → backend
//!                                                         ▲
//!                      TicketRegistryCleaner ─────────────┘ (under LockingStrategy)
//! ```
//!
//! ## Example: Login and Validation
//!
//! ```rust,ignore
//! use sso_ticket_registry::*;
//!
//! let cas = CentralAuthenticationService::new(
//!     DefaultTicketRegistry::new(),
//!     services,
//!     NoopLogoutManager,
//!     TicketConfig::default(),
//! );
//!
//! // 1. Credentials validated elsewhere; start the session
//! let tgt = cas.create_ticket_granting_ticket(authentication).await?;
//!
//! // 2. Issue a ticket for the application
//! let st = cas.grant_service_ticket(tgt.id(), service.clone(), None).await?;
//!
//! // 3. The application validates it, exactly once
//! let assertion = cas.validate_service_ticket(st.id(), &service).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod cleaner;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod providers;
pub mod stores;

// Mocks for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use cleaner::{CleanerReport, TicketRegistryCleaner};
pub use config::{CleanerConfig, LockConfig, RedisRegistryConfig, TicketConfig};
pub use coordinator::CentralAuthenticationService;
pub use error::{Result, TicketError};
pub use providers::{
    LockingStrategy, LogoutManager, NoopLogoutManager, RegisteredService, RemovedTickets,
    ServiceRegistry, TicketRegistry,
};
pub use stores::{DefaultTicketRegistry, InMemoryLockingStrategy, LockTable};
