//! Mock collaborator implementations for testing.
//!
//! This module provides simple, in-memory implementations of the external
//! collaborator traits for use in unit and integration tests. The in-memory
//! registry and lock live in [`crate::stores`] since they are usable backends.

pub mod logout;
pub mod services;

pub use logout::MockLogoutManager;
pub use services::MockServiceRegistry;
