//! Huddle Core - Shared types for the session synchronization hub
//!
//! This crate provides the domain types shared between the hub daemon
//! (huddled) and its clients (huddle-client).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod device;
pub mod error;
pub mod ids;
pub mod presence;

// Re-exports for convenience
pub use device::DeviceType;
pub use error::{DomainError, DomainResult};
pub use ids::{ConnectionId, SessionId, UserId};
pub use presence::{PresenceEntry, PresenceSnapshot};
