//! huddle client - reconnecting driver for the session hub
//!
//! A device runs one [`HubClient`] per hub. The driver owns the socket and
//! exposes three channels to the rest of the application:
//!
//! 1. **Commands** (`ClientCommand`): join, leave, relay, request a sync, disconnect
//! 2. **Events** (`ClientEvent`): presence, relayed participant events, sync requests
//! 3. **Status** (`watch`): disconnected, connecting/reconnecting, connected, failed
//!
//! Unexpected closes are retried with [`BackoffPolicy`]; after a reconnect
//! the last joined session is re-joined and the reconnect callback fires.
//! The most recent `participants_sync` is kept in a [`SyncState`].

pub mod backoff;
pub mod client;
pub mod error;
pub mod sync;

pub use backoff::BackoffPolicy;
pub use client::{ClientCommand, ClientConfig, ClientEvent, ConnectionStatus, HubClient};
pub use error::{ClientError, Result};
pub use sync::SyncState;
