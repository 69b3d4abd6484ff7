//! WebSocket close codes used by the hub and the client driver.
//!
//! Only a close the client starts with [`CLIENT_DISCONNECT`] is intentional.
//! Clients treat every close the hub sends (or a missing close frame) as a
//! dropped connection and retry.

/// Client closed the connection on purpose; never retried.
pub const CLIENT_DISCONNECT: u16 = 1000;

/// Reason string sent alongside [`CLIENT_DISCONNECT`].
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnected";

/// Hub is shutting down.
pub const SERVER_SHUTDOWN: u16 = 1001;

/// Connection request lacked a required identity parameter.
pub const IDENTITY_REQUIRED: u16 = 1008;

/// Connection was evicted after missing heartbeats.
pub const HEARTBEAT_TIMEOUT: u16 = 4000;

/// Connection was removed by the hub operator.
pub const EVICTED: u16 = 4001;

/// The hub failed the socket (oversized frame, read or write error).
pub const TRANSPORT_ERROR: u16 = 4002;
