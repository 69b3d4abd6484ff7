//! Presence snapshots: the derived membership view of a session.
//!
//! A snapshot is never stored. The hub recomputes it from the live member
//! set every time membership changes, so a broadcast snapshot always matches
//! the membership that triggered it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, DeviceType, SessionId, UserId};

/// One connected device in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub device_type: DeviceType,
    pub connection_id: ConnectionId,
}

impl PresenceEntry {
    pub fn new(user_id: UserId, device_type: DeviceType, connection_id: ConnectionId) -> Self {
        Self {
            user_id,
            device_type,
            connection_id,
        }
    }
}

/// Membership view of a session at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Session this snapshot describes
    pub session_id: SessionId,

    /// Every member connection, in join order
    pub devices: Vec<PresenceEntry>,

    /// Number of distinct users across `devices`
    pub user_count: usize,

    /// True when any single user holds more than one connection.
    ///
    /// Clients use this to decide whether to show multi-device sync UI.
    pub same_user_multi_device: bool,
}

impl PresenceSnapshot {
    /// Computes a snapshot from a session's members.
    ///
    /// Pure function of its input: the order of `members` is preserved in
    /// `devices`, and the counters are derived from scratch on every call.
    pub fn compute(
        session_id: SessionId,
        members: impl IntoIterator<Item = PresenceEntry>,
    ) -> Self {
        let devices: Vec<PresenceEntry> = members.into_iter().collect();

        let mut per_user: HashMap<&UserId, usize> = HashMap::new();
        for entry in &devices {
            *per_user.entry(&entry.user_id).or_insert(0) += 1;
        }

        let user_count = per_user.len();
        let same_user_multi_device = per_user.values().any(|count| *count > 1);

        Self {
            session_id,
            devices,
            user_count,
            same_user_multi_device,
        }
    }

    /// Returns true if the given connection is part of this snapshot.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.devices
            .iter()
            .any(|entry| &entry.connection_id == connection_id)
    }
}
