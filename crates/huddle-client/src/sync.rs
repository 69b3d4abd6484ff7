//! Last-wins store for full participant syncs.
//!
//! The hub never merges participant lists. Whichever `participants_sync`
//! arrived most recently is the authoritative list, so a device that
//! rejoins after a drop can rebuild its view from one message.

use huddle_protocol::{RelayKind, ServerMessage};
use serde_json::Value;

/// Most recent `participants_sync` payload seen by this client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    latest: Option<Value>,
    revision: u64,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored list and returns the new revision.
    pub fn record(&mut self, payload: Value) -> u64 {
        self.latest = Some(payload);
        self.revision += 1;
        self.revision
    }

    /// Records `message` if it is a full sync. Returns true if it was.
    pub fn observe(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Relay {
                kind: RelayKind::ParticipantsSync,
                payload,
            } => {
                self.record(payload.clone());
                true
            }
            _ => false,
        }
    }

    pub fn latest(&self) -> Option<&Value> {
        self.latest.as_ref()
    }

    /// Number of syncs recorded so far; zero means none yet.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_none()
    }
}
