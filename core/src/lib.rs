//! # SSO Ticket Core
//!
//! Core types for the SSO ticket registry.
//!
//! This crate provides:
//! - The ticket data model ([`Ticket`], [`TicketGrantingTicket`], [`ServiceTicket`])
//! - Pluggable [`ExpirationPolicy`] rules
//! - Authentication value types ([`Authentication`], [`Principal`], [`Service`])
//! - The [`environment::Clock`] abstraction used for deterministic time
//!
//! ## Lifecycle
//!
//! ```text
//! TGT:  CREATED → VALID → EXPIRED
//! ST:   CREATED → VALID → CONSUMED → EXPIRED
//! ```
//!
//! ## Example
//!
//! ```
//! use sso_ticket_core::{
//!     Authentication, ExpirationPolicy, Principal, Service, TicketGrantingTicket, TicketId,
//! };
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let authentication = Authentication::new(Principal::new("casuser"), now);
//! let mut tgt = TicketGrantingTicket::new(
//!     TicketId::from("TGT-1-abc"),
//!     authentication,
//!     ExpirationPolicy::NeverExpires,
//!     now,
//! );
//!
//! let mut st = tgt.grant_service_ticket(
//!     TicketId::from("ST-1-abc"),
//!     Service::new("https://app.example.com"),
//!     ExpirationPolicy::NeverExpires,
//!     false,
//!     true,
//!     now,
//! );
//!
//! assert!(st.is_valid_for(&Service::new("https://app.example.com"), now));
//! assert!(!st.is_valid_for(&Service::new("https://app.example.com"), now));
//! ```

pub mod assertion;
pub mod authentication;
pub mod environment;
pub mod expiration;
pub mod id;
pub mod ticket;

pub use assertion::Assertion;
pub use authentication::{Authentication, Principal, Service};
pub use environment::{Clock, SystemClock};
pub use expiration::ExpirationPolicy;
pub use id::TicketIdGenerator;
pub use ticket::{ServiceTicket, Ticket, TicketGrantingTicket, TicketId, TicketKind, TicketState};
