//! Session directory - which connections belong to which session.
//!
//! Keeps both directions of the mapping so a connection's session can be
//! found without scanning. A connection is in at most one session, and a
//! session with no members is dropped immediately.

use std::collections::HashMap;

use huddle_core::{ConnectionId, SessionId};

/// A connection left a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub session_id: SessionId,

    /// True when the connection was the last member and the session is gone.
    pub emptied: bool,
}

#[derive(Debug, Default)]
pub struct SessionDirectory {
    /// Members of each session in join order
    sessions: HashMap<SessionId, Vec<ConnectionId>>,
    /// Session each connection is currently in
    membership: HashMap<ConnectionId, SessionId>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to `session_id`, leaving its current session first.
    ///
    /// Re-joining the session it is already in changes nothing and returns
    /// `None`.
    pub fn join(&mut self, connection_id: &ConnectionId, session_id: &SessionId) -> Option<Departure> {
        if self.membership.get(connection_id) == Some(session_id) {
            return None;
        }

        let departure = self.leave(connection_id);

        self.sessions
            .entry(session_id.clone())
            .or_default()
            .push(connection_id.clone());
        self.membership
            .insert(connection_id.clone(), session_id.clone());

        departure
    }

    /// Removes a connection from its session. `None` if it was in none.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<Departure> {
        let session_id = self.membership.remove(connection_id)?;

        let emptied = match self.sessions.get_mut(&session_id) {
            Some(members) => {
                members.retain(|member| member != connection_id);
                members.is_empty()
            }
            None => true,
        };

        if emptied {
            self.sessions.remove(&session_id);
        }

        Some(Departure {
            session_id,
            emptied,
        })
    }

    /// Members of a session in join order. Empty for unknown sessions.
    pub fn members(&self, session_id: &SessionId) -> &[ConnectionId] {
        self.sessions
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn session_of(&self, connection_id: &ConnectionId) -> Option<&SessionId> {
        self.membership.get(connection_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of non-empty sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
