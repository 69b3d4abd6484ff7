//! Client interface for interacting with the HubActor.
//!
//! The `HubHandle` is cheap to clone and shared by every connection handler,
//! the liveness monitor, the health endpoint and any embedder.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use huddle_core::{ConnectionId, DeviceType, PresenceSnapshot, SessionId, UserId};
use huddle_protocol::{ClientMessage, RelayKind};

use super::commands::{DispatchOutcome, HubCommand, HubError, HubEvent, HubStats, RemovalReason};
use super::registry::Severance;

/// Everything a connection handler needs after admission.
#[derive(Debug)]
pub struct Admission {
    /// Id assigned by the hub
    pub connection_id: ConnectionId,

    /// Pre-serialized frames to write to the transport, in order
    pub outbound: mpsc::Receiver<Arc<str>>,

    /// Resolves when the hub wants the transport closed
    pub severed: oneshot::Receiver<Severance>,
}

/// Handle for interacting with the hub actor.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    event_sender: broadcast::Sender<HubEvent>,
    outbound_buffer: usize,
}

impl HubHandle {
    /// Create a new hub handle.
    ///
    /// `outbound_buffer` bounds each admitted connection's frame queue.
    pub fn new(
        sender: mpsc::Sender<HubCommand>,
        event_sender: broadcast::Sender<HubEvent>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            sender,
            event_sender,
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// Admit a new connection.
    ///
    /// The `connected` message is already queued on the returned outbound
    /// receiver when this resolves.
    ///
    /// # Errors
    ///
    /// - `HubError::ChannelClosed` if the actor has shut down
    pub async fn admit(&self, user_id: UserId, device_type: DeviceType) -> Result<Admission, HubError> {
        let (outbound_tx, outbound) = mpsc::channel(self.outbound_buffer);
        let (sever, severed) = oneshot::channel();
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Admit {
                user_id,
                device_type,
                outbound: outbound_tx,
                sever,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        let connection_id = rx.await.map_err(|_| HubError::ChannelClosed)?;

        Ok(Admission {
            connection_id,
            outbound,
            severed,
        })
    }

    /// Route one decoded client message.
    ///
    /// # Errors
    ///
    /// - `HubError::ChannelClosed` if the actor has shut down
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> Result<DispatchOutcome, HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Dispatch {
                connection_id,
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Refresh a connection's liveness without sending an acknowledgement.
    pub async fn touch(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.sender
            .send(HubCommand::Touch { connection_id })
            .await
            .map_err(|_| HubError::ChannelClosed)
    }

    /// Remove a connection and sever its transport.
    ///
    /// Returns `Ok(false)` if the connection was already gone.
    pub async fn evict(&self, connection_id: ConnectionId) -> Result<bool, HubError> {
        self.remove(connection_id, RemovalReason::Evicted).await
    }

    /// Remove a connection whose transport ended.
    ///
    /// Idempotent: called by the connection handler on every exit path,
    /// including after the hub already evicted the connection.
    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
        reason: RemovalReason,
    ) -> Result<bool, HubError> {
        self.remove(connection_id, reason).await
    }

    async fn remove(&self, connection_id: ConnectionId, reason: RemovalReason) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Evict {
                connection_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Get the presence snapshot of a session.
    ///
    /// Returns `None` if the session has no members or the actor is gone.
    pub async fn presence(&self, session_id: SessionId) -> Option<PresenceSnapshot> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Presence {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Get the session a connection is currently in.
    pub async fn session_of(&self, connection_id: ConnectionId) -> Option<SessionId> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::SessionOf {
                connection_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Broadcast a server-originated message to every member of a session.
    ///
    /// `kind` must be one of the relayed domain types. Returns the number
    /// of connections the message was queued for.
    ///
    /// # Errors
    ///
    /// - `HubError::UnsupportedNotify` for any other type
    /// - `HubError::ChannelClosed` if the actor has shut down
    pub async fn notify(
        &self,
        session_id: SessionId,
        kind: &str,
        payload: Value,
    ) -> Result<usize, HubError> {
        let kind: RelayKind = kind
            .parse()
            .map_err(|_| HubError::UnsupportedNotify(kind.to_string()))?;

        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Notify {
                session_id,
                kind,
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Get connection and session counters.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Stats { respond_to: tx })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Trigger a stale-connection sweep (fire-and-forget).
    pub async fn sweep_stale(&self) -> Result<(), HubError> {
        self.sender
            .send(HubCommand::SweepStale)
            .await
            .map_err(|_| HubError::ChannelClosed)
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true while the actor is still accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_handle() -> (HubHandle, mpsc::Receiver<HubCommand>) {
        let (tx, rx) = mpsc::channel(10);
        let (event_tx, _) = broadcast::channel(10);
        (HubHandle::new(tx, event_tx, 8), rx)
    }

    #[tokio::test]
    async fn test_handle_clone() {
        let (handle, _rx) = create_handle();
        let cloned = handle.clone();
        assert!(handle.is_connected());
        assert!(cloned.is_connected());
    }

    #[tokio::test]
    async fn test_closed_actor_maps_to_channel_closed() {
        let (handle, rx) = create_handle();
        drop(rx);

        assert!(!handle.is_connected());
        assert_eq!(
            handle.admit(UserId::new("u1"), DeviceType::Mobile).await.unwrap_err(),
            HubError::ChannelClosed
        );
        assert_eq!(handle.stats().await, Err(HubError::ChannelClosed));
        assert!(handle.presence(SessionId::new("s1")).await.is_none());
        assert!(handle.session_of(ConnectionId::new("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_notify_rejects_non_relay_types() {
        let (handle, _rx) = create_handle();
        for kind in ["presence", "request_sync", "connected", "bogus"] {
            assert_eq!(
                handle
                    .notify(SessionId::new("s1"), kind, Value::Null)
                    .await,
                Err(HubError::UnsupportedNotify(kind.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn test_sweep_is_fire_and_forget() {
        let (handle, mut rx) = create_handle();
        handle.sweep_stale().await.unwrap();
        assert!(matches!(rx.recv().await, Some(HubCommand::SweepStale)));
    }

    #[tokio::test]
    async fn test_subscribe() {
        let (handle, _rx) = create_handle();
        let _events = handle.subscribe();
    }
}
