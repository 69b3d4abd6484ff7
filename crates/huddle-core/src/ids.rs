//! Type-safe identifiers for connections, sessions and users.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DomainError, DomainResult};

/// Unique identifier for one live connection to the hub.
///
/// Generated by the hub on admission. Backed by a random v4 UUID, so an id
/// is never handed out twice over the lifetime of a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a fresh connection id.
    pub fn generate() -> Self {
        Self(format!("conn-{}", Uuid::new_v4().simple()))
    }

    /// Wraps an existing id string (used when decoding wire messages).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a shared activity ("conduct session").
///
/// Supplied by clients and treated as an opaque string. The hub never
/// validates that a session exists anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a SessionId without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a SessionId, rejecting empty or whitespace-only input.
    ///
    /// Anything else is kept byte for byte: `" s1 "` and `"s1"` are
    /// different sessions.
    pub fn parse(id: &str) -> DomainResult<Self> {
        if id.trim().is_empty() {
            return Err(DomainError::missing("sessionId"));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of the operator owning a connection.
///
/// Opaque to the hub: authentication happens upstream, the hub only uses
/// it to group devices in presence snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a UserId, rejecting empty or whitespace-only input.
    pub fn parse(id: &str) -> DomainResult<Self> {
        if id.trim().is_empty() {
            return Err(DomainError::missing("userId"));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
