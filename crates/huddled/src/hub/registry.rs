//! Connection registry - identity and liveness of every live connection.
//!
//! Owned exclusively by the `HubActor`. All operations are idempotent on a
//! missing id so late messages that race an eviction are harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use huddle_core::{ConnectionId, DeviceType, UserId};

/// Close frame the connection handler should send when the hub severs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Severance {
    pub code: u16,
    pub reason: &'static str,
}

/// The hub's side of one connection's transport.
#[derive(Debug)]
pub struct ConnectionLink {
    outbound: mpsc::Sender<Arc<str>>,
    sever: Option<oneshot::Sender<Severance>>,
}

impl ConnectionLink {
    pub fn new(outbound: mpsc::Sender<Arc<str>>, sever: oneshot::Sender<Severance>) -> Self {
        Self {
            outbound,
            sever: Some(sever),
        }
    }

    /// Queues a frame without waiting.
    ///
    /// Returns `false` if the queue is full or the connection is already
    /// gone. Either case is benign: a dead connection is found by the
    /// liveness sweep, not by the broadcaster.
    fn send(&self, frame: Arc<str>) -> bool {
        self.outbound.try_send(frame).is_ok()
    }

    /// Tells the connection handler to close the transport.
    ///
    /// Only the first call has any effect.
    fn sever(&mut self, severance: Severance) {
        if let Some(tx) = self.sever.take() {
            let _ = tx.send(severance);
        }
    }
}

/// Registry entry for one live connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub user_id: UserId,
    pub device_type: DeviceType,
    pub admitted_at: Instant,
    pub last_heartbeat: Instant,
    pub dropped_frames: u64,
    link: ConnectionLink,
}

impl ConnectionEntry {
    /// Time since the last heartbeat (or admission).
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }

    /// Returns true once the heartbeat is older than `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.heartbeat_age(now) > timeout
    }
}

/// Every live connection keyed by its id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a connection and returns its freshly generated id.
    pub fn admit(
        &mut self,
        user_id: UserId,
        device_type: DeviceType,
        link: ConnectionLink,
        now: Instant,
    ) -> ConnectionId {
        let mut id = ConnectionId::generate();
        while self.connections.contains_key(&id) {
            id = ConnectionId::generate();
        }

        self.connections.insert(
            id.clone(),
            ConnectionEntry {
                user_id,
                device_type,
                admitted_at: now,
                last_heartbeat: now,
                dropped_frames: 0,
                link,
            },
        );

        id
    }

    /// Updates last-heartbeat to `now`. Returns `false` for unknown ids.
    pub fn touch(&mut self, id: &ConnectionId, now: Instant) -> bool {
        match self.connections.get_mut(id) {
            Some(entry) => {
                entry.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Removes a connection and severs its transport.
    ///
    /// Returns the removed entry, or `None` if it was already gone.
    pub fn evict(&mut self, id: &ConnectionId, severance: Severance) -> Option<ConnectionEntry> {
        let mut entry = self.connections.remove(id)?;
        entry.link.sever(severance);
        Some(entry)
    }

    /// Queues a frame for one connection.
    ///
    /// Returns `false` when the id is unknown or the frame was dropped.
    pub fn send(&mut self, id: &ConnectionId, frame: Arc<str>) -> bool {
        let Some(entry) = self.connections.get_mut(id) else {
            return false;
        };

        if entry.link.send(frame) {
            true
        } else {
            entry.dropped_frames = entry.dropped_frames.saturating_add(1);
            false
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionEntry> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Ids of every connection whose heartbeat is older than `timeout`.
    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, entry)| entry.is_stale(now, timeout))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Sum of dropped frames across live connections.
    pub fn dropped_frames(&self) -> u64 {
        self.connections
            .values()
            .map(|entry| entry.dropped_frames)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
