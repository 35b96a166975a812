//! Registry providers.
//!
//! This module defines traits for the storage backends and the external
//! collaborators used by the cleaner and the coordinator. These traits
//! enable dependency injection and make the registry logic testable.
//!
//! # Architecture
//!
//! Providers are **interfaces**, not implementations. The coordinator and
//! the cleaner are generic over these traits; [`crate::stores`] and
//! [`crate::mocks`] supply implementations.
//!
//! ```text
//! Protocol adapter                  Scheduler
//!        │                              │
//!        ▼                              ▼
//! ┌──────────────────┐        ┌──────────────────┐
//! │ Coordinator      │        │ Cleaner          │
//! │ - ServiceRegistry│        │ - LockingStrategy│
//! │ - LogoutManager  │        │ - LogoutManager  │
//! └────────┬─────────┘        └────────┬─────────┘
//!          │                           │
//!          └──────────┬────────────────┘
//!                     ▼
//!           ┌──────────────────┐
//!           │ TicketRegistry   │
//!           │ (memory / Redis) │
//!           └──────────────────┘
//! ```

pub mod locking;
pub mod logout;
pub mod registry;
pub mod services;

// Re-export provider traits
pub use locking::LockingStrategy;
pub use logout::{LogoutManager, NoopLogoutManager};
pub use registry::{RemovedTickets, TicketRegistry, validate_child, validate_ticket};
pub use services::{RegisteredService, ServiceRegistry};
