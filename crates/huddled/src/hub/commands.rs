//! Hub actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `HubActor`:
//! - `HubCommand`: Commands sent to the actor
//! - `HubError`: Errors that can occur during hub operations
//! - `HubEvent`: Events published by the hub for observers
//! - `DispatchOutcome`: What the router did with one client message
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::fmt;
use std::sync::Arc;

use huddle_core::{ConnectionId, DeviceType, PresenceSnapshot, SessionId, UserId};
use huddle_protocol::{ClientMessage, RelayKind};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::registry::Severance;

// ============================================================================
// Hub Commands
// ============================================================================

/// Commands sent to the hub actor.
///
/// Request/response commands carry a oneshot sender for the result.
/// `Touch` and `SweepStale` are fire-and-forget.
#[derive(Debug)]
pub enum HubCommand {
    /// Admit a new connection into the registry.
    ///
    /// The actor queues the `connected` message on `outbound` before
    /// responding, so it is always the first frame the client sees.
    Admit {
        /// Opaque identity supplied by the client
        user_id: UserId,
        /// Client-declared device class
        device_type: DeviceType,
        /// Bounded queue of pre-serialized frames for this connection
        outbound: mpsc::Sender<Arc<str>>,
        /// Fired once when the hub severs the transport
        sever: oneshot::Sender<Severance>,
        /// Channel to send the assigned id
        respond_to: oneshot::Sender<ConnectionId>,
    },

    /// Route one decoded client message.
    ///
    /// Commands from one connection are processed in the order they were
    /// sent, which keeps each connection's stream sequential.
    Dispatch {
        /// Sending connection
        connection_id: ConnectionId,
        /// Decoded message
        message: ClientMessage,
        /// Channel to send what the router did
        respond_to: oneshot::Sender<DispatchOutcome>,
    },

    /// Refresh a connection's last-heartbeat timestamp.
    Touch {
        /// Connection to refresh
        connection_id: ConnectionId,
    },

    /// Remove a connection, leaving its session and severing its transport.
    ///
    /// Responds `false` if the connection was already gone.
    Evict {
        /// Connection to remove
        connection_id: ConnectionId,
        /// Why it is being removed
        reason: RemovalReason,
        /// Channel to send whether anything was removed
        respond_to: oneshot::Sender<bool>,
    },

    /// Get the presence snapshot of a session.
    ///
    /// Returns `None` if the session has no members.
    Presence {
        /// Session to describe
        session_id: SessionId,
        /// Channel to send the snapshot
        respond_to: oneshot::Sender<Option<PresenceSnapshot>>,
    },

    /// Get the session a connection is currently joined to.
    SessionOf {
        /// Connection to look up
        connection_id: ConnectionId,
        /// Channel to send the session id
        respond_to: oneshot::Sender<Option<SessionId>>,
    },

    /// Inject a server-originated broadcast into a session.
    Notify {
        /// Target session
        session_id: SessionId,
        /// Relay type to broadcast
        kind: RelayKind,
        /// Opaque payload
        payload: serde_json::Value,
        /// Channel to send the number of recipients
        respond_to: oneshot::Sender<usize>,
    },

    /// Get registry and directory counters.
    Stats {
        /// Channel to send the counters
        respond_to: oneshot::Sender<HubStats>,
    },

    /// Evict every connection whose heartbeat is older than the timeout.
    SweepStale,
}

// ============================================================================
// Dispatch Outcome
// ============================================================================

/// What the router did with a client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Connection joined `session_id`, leaving `left` if it was elsewhere.
    Joined {
        session_id: SessionId,
        left: Option<SessionId>,
    },

    /// Connection left `session_id`.
    Left { session_id: SessionId },

    /// Message was relayed to `recipients` other members.
    Relayed { recipients: usize },

    /// Heartbeat was recorded and acknowledged to the sender.
    HeartbeatAcked,

    /// Message needs a session but the connection is not in one.
    NoSession,

    /// Sender is no longer registered (raced an eviction).
    UnknownConnection,
}

// ============================================================================
// Hub Errors
// ============================================================================

/// Errors that can occur during hub operations.
///
/// Uses `thiserror` for ergonomic error handling and Display implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("hub channel closed")]
    ChannelClosed,

    /// `notify` was called with a type the hub cannot inject.
    #[error("unsupported notify type: {0}")]
    UnsupportedNotify(String),
}

// ============================================================================
// Hub Events
// ============================================================================

/// Events published by the hub to observers.
///
/// Nothing inside the hub depends on a subscriber existing; these are for
/// embedders, logs and tests.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A connection was admitted.
    Admitted {
        connection_id: ConnectionId,
        user_id: UserId,
        device_type: DeviceType,
    },

    /// A session's membership changed and presence was republished.
    ///
    /// The snapshot is boxed to reduce enum size variance.
    PresenceChanged { snapshot: Box<PresenceSnapshot> },

    /// A session lost its last member and was dropped.
    SessionClosed { session_id: SessionId },

    /// A connection was removed from the registry.
    Removed {
        connection_id: ConnectionId,
        reason: RemovalReason,
    },
}

/// Reason why a connection was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Client closed the connection (close frame or end of stream).
    Closed,

    /// No heartbeat within the timeout window.
    Stale,

    /// The transport failed while reading or writing.
    TransportError,

    /// An embedder evicted the connection through the handle.
    Evicted,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Stale => write!(f, "heartbeat timeout"),
            Self::TransportError => write!(f, "transport error"),
            Self::Evicted => write!(f, "evicted"),
        }
    }
}

// ============================================================================
// Hub Stats
// ============================================================================

/// Counters describing the hub at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Live connections in the registry
    pub connections: usize,

    /// Sessions with at least one member
    pub sessions: usize,

    /// Frames dropped because a connection's queue was full or closed
    pub dropped_frames: u64,
}
