//! Hub actor - owns every connection and session and routes all messages.
//!
//! The HubActor is the single owner of hub state. Connection handlers talk
//! to it through an mpsc channel; it answers over oneshot channels and
//! publishes `HubEvent`s over broadcast. Because every mutation happens in
//! this one task, a presence snapshot always reflects exactly the
//! membership change that triggered it.
//!
//! Outbound frames are pushed with `try_send`, so a slow or dead connection
//! can never stall the actor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use huddle_core::{ConnectionId, DeviceType, PresenceSnapshot, SessionId, UserId};
use huddle_protocol::{close, ClientMessage, RelayKind, ServerMessage};

use super::commands::{DispatchOutcome, HubCommand, HubEvent, HubStats, RemovalReason};
use super::directory::{Departure, SessionDirectory};
use super::presence;
use super::registry::{ConnectionLink, ConnectionRegistry, Severance};

/// The hub actor.
///
/// # Ownership
///
/// - `registry`: identity, device class and liveness of each connection
/// - `directory`: session membership in both directions
///
/// A connection's session is only ever recorded in the directory.
pub struct HubActor {
    receiver: mpsc::Receiver<HubCommand>,
    registry: ConnectionRegistry,
    directory: SessionDirectory,
    event_publisher: broadcast::Sender<HubEvent>,
    heartbeat_timeout: Duration,
}

impl HubActor {
    pub fn new(
        receiver: mpsc::Receiver<HubCommand>,
        event_publisher: broadcast::Sender<HubEvent>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            registry: ConnectionRegistry::new(),
            directory: SessionDirectory::new(),
            event_publisher,
            heartbeat_timeout,
        }
    }

    /// Runs until every `HubHandle` has been dropped.
    pub async fn run(mut self) {
        info!(
            heartbeat_timeout_secs = self.heartbeat_timeout.as_secs(),
            "Hub actor starting"
        );

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.registry.len(),
            sessions = self.directory.len(),
            "Hub actor stopped"
        );
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Admit {
                user_id,
                device_type,
                outbound,
                sever,
                respond_to,
            } => {
                let link = ConnectionLink::new(outbound, sever);
                let id = self.handle_admit(user_id, device_type, link);
                let _ = respond_to.send(id);
            }
            HubCommand::Dispatch {
                connection_id,
                message,
                respond_to,
            } => {
                let outcome = self.handle_dispatch(&connection_id, message);
                let _ = respond_to.send(outcome);
            }
            HubCommand::Touch { connection_id } => {
                self.registry.touch(&connection_id, Instant::now());
            }
            HubCommand::Evict {
                connection_id,
                reason,
                respond_to,
            } => {
                let removed = self.handle_evict(&connection_id, reason);
                let _ = respond_to.send(removed);
            }
            HubCommand::Presence {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.snapshot(&session_id));
            }
            HubCommand::SessionOf {
                connection_id,
                respond_to,
            } => {
                let session = self.directory.session_of(&connection_id).cloned();
                let _ = respond_to.send(session);
            }
            HubCommand::Notify {
                session_id,
                kind,
                payload,
                respond_to,
            } => {
                let recipients = self.handle_notify(&session_id, kind, payload);
                let _ = respond_to.send(recipients);
            }
            HubCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
            HubCommand::SweepStale => {
                self.handle_sweep_stale();
            }
        }
    }

    // ------------------------------------------------------------------------
    // Admission and removal
    // ------------------------------------------------------------------------

    fn handle_admit(
        &mut self,
        user_id: UserId,
        device_type: DeviceType,
        link: ConnectionLink,
    ) -> ConnectionId {
        let id = self
            .registry
            .admit(user_id.clone(), device_type, link, Instant::now());

        // Always the first frame on the connection
        let connected = ServerMessage::connected(id.clone(), user_id.clone(), device_type);
        self.send_to(&id, &connected);

        info!(
            connection_id = %id,
            user_id = %user_id,
            device_type = %device_type,
            total_connections = self.registry.len(),
            "Connection admitted"
        );

        self.publish(HubEvent::Admitted {
            connection_id: id.clone(),
            user_id,
            device_type,
        });

        id
    }

    fn handle_evict(&mut self, connection_id: &ConnectionId, reason: RemovalReason) -> bool {
        if !self.registry.contains(connection_id) {
            return false;
        }

        if let Some(departure) = self.directory.leave(connection_id) {
            self.after_departure(departure);
        }

        let Some(entry) = self.registry.evict(connection_id, severance_for(reason)) else {
            return false;
        };

        info!(
            connection_id = %connection_id,
            user_id = %entry.user_id,
            reason = %reason,
            dropped_frames = entry.dropped_frames,
            remaining = self.registry.len(),
            "Connection removed"
        );

        self.publish(HubEvent::Removed {
            connection_id: connection_id.clone(),
            reason,
        });

        true
    }

    fn handle_sweep_stale(&mut self) {
        let now = Instant::now();
        let stale = self.registry.stale(now, self.heartbeat_timeout);

        for connection_id in stale {
            if let Some(entry) = self.registry.get(&connection_id) {
                warn!(
                    connection_id = %connection_id,
                    user_id = %entry.user_id,
                    silent_secs = entry.heartbeat_age(now).as_secs(),
                    "Evicting connection after missed heartbeats"
                );
            }
            self.handle_evict(&connection_id, RemovalReason::Stale);
        }
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    fn handle_dispatch(&mut self, sender: &ConnectionId, message: ClientMessage) -> DispatchOutcome {
        let Some(device_type) = self.registry.get(sender).map(|entry| entry.device_type) else {
            debug!(connection_id = %sender, kind = message.kind(), "Message from unknown connection");
            return DispatchOutcome::UnknownConnection;
        };

        match message {
            ClientMessage::Join { session_id } => self.handle_join(sender, session_id),
            ClientMessage::Leave => match self.directory.leave(sender) {
                Some(departure) => {
                    let session_id = departure.session_id.clone();
                    debug!(connection_id = %sender, session_id = %session_id, "Left session");
                    self.after_departure(departure);
                    DispatchOutcome::Left { session_id }
                }
                None => DispatchOutcome::NoSession,
            },
            ClientMessage::Relay { kind, payload } => {
                self.relay_from(sender, &ServerMessage::relay(kind, payload))
            }
            ClientMessage::RequestSync => {
                self.relay_from(sender, &ServerMessage::request_sync(device_type, sender.clone()))
            }
            ClientMessage::Heartbeat => {
                self.registry.touch(sender, Instant::now());
                self.send_to(sender, &ServerMessage::heartbeat_ack());
                DispatchOutcome::HeartbeatAcked
            }
        }
    }

    fn handle_join(&mut self, sender: &ConnectionId, session_id: SessionId) -> DispatchOutcome {
        let left = self.directory.join(sender, &session_id).map(|departure| {
            let old = departure.session_id.clone();
            self.after_departure(departure);
            old
        });

        debug!(
            connection_id = %sender,
            session_id = %session_id,
            members = self.directory.members(&session_id).len(),
            "Joined session"
        );

        // Sent on re-join too so a reconnecting client gets fresh presence
        self.publish_presence(&session_id);

        DispatchOutcome::Joined { session_id, left }
    }

    /// Fans a message out to every other member of the sender's session.
    fn relay_from(&mut self, sender: &ConnectionId, message: &ServerMessage) -> DispatchOutcome {
        let Some(session_id) = self.directory.session_of(sender).cloned() else {
            debug!(connection_id = %sender, kind = message.kind(), "Dropping message outside a session");
            return DispatchOutcome::NoSession;
        };

        let recipients = self.fan_out(&session_id, message, Some(sender));
        debug!(
            connection_id = %sender,
            session_id = %session_id,
            kind = message.kind(),
            recipients,
            "Relayed"
        );

        DispatchOutcome::Relayed { recipients }
    }

    fn handle_notify(
        &mut self,
        session_id: &SessionId,
        kind: RelayKind,
        payload: serde_json::Value,
    ) -> usize {
        let recipients = self.fan_out(session_id, &ServerMessage::relay(kind, payload), None);
        debug!(session_id = %session_id, kind = %kind, recipients, "Notified session");
        recipients
    }

    // ------------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------------

    fn snapshot(&self, session_id: &SessionId) -> Option<PresenceSnapshot> {
        presence::snapshot(&self.directory, &self.registry, session_id)
    }

    /// Republishes presence to what is left of a session, or drops it.
    fn after_departure(&mut self, departure: Departure) {
        if departure.emptied {
            debug!(session_id = %departure.session_id, "Session closed");
            self.publish(HubEvent::SessionClosed {
                session_id: departure.session_id,
            });
        } else {
            self.publish_presence(&departure.session_id);
        }
    }

    /// Broadcasts the current snapshot to every member of a session.
    fn publish_presence(&mut self, session_id: &SessionId) {
        let Some(snapshot) = self.snapshot(session_id) else {
            return;
        };

        self.fan_out(session_id, &ServerMessage::presence(snapshot.clone()), None);
        self.publish(HubEvent::PresenceChanged {
            snapshot: Box::new(snapshot),
        });
    }

    // ------------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------------

    /// Queues a message for every member of a session except `exclude`.
    ///
    /// Serializes once. Returns how many queues accepted the frame.
    fn fan_out(
        &mut self,
        session_id: &SessionId,
        message: &ServerMessage,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };

        let targets: Vec<ConnectionId> = self
            .directory
            .members(session_id)
            .iter()
            .filter(|member| Some(*member) != exclude)
            .cloned()
            .collect();

        let mut delivered = 0;
        for target in &targets {
            if self.registry.send(target, Arc::clone(&frame)) {
                delivered += 1;
            } else {
                debug!(connection_id = %target, kind = message.kind(), "Dropped outbound frame");
            }
        }
        delivered
    }

    fn send_to(&mut self, connection_id: &ConnectionId, message: &ServerMessage) -> bool {
        match encode(message) {
            Some(frame) => self.registry.send(connection_id, frame),
            None => false,
        }
    }

    fn publish(&self, event: HubEvent) {
        // No subscribers is fine
        let _ = self.event_publisher.send(event);
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            sessions: self.directory.len(),
            dropped_frames: self.registry.dropped_frames(),
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match message.encode() {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "Failed to encode outbound message");
            None
        }
    }
}

/// Close frame for a connection removed for `reason`.
fn severance_for(reason: RemovalReason) -> Severance {
    match reason {
        RemovalReason::Stale => Severance {
            code: close::HEARTBEAT_TIMEOUT,
            reason: "heartbeat timeout",
        },
        RemovalReason::Evicted => Severance {
            code: close::EVICTED,
            reason: "evicted",
        },
        RemovalReason::TransportError => Severance {
            code: close::TRANSPORT_ERROR,
            reason: "transport error",
        },
        RemovalReason::Closed => Severance {
            code: close::CLIENT_DISCONNECT,
            reason: "connection closed",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::ServerMessage as S;
    use serde_json::json;
    use tokio::sync::oneshot;

    struct TestConn {
        id: ConnectionId,
        outbound: mpsc::Receiver<Arc<str>>,
        severed: oneshot::Receiver<Severance>,
    }

    impl TestConn {
        /// Drains every queued frame, decoded.
        fn drain(&mut self) -> Vec<S> {
            let mut out = Vec::new();
            while let Ok(frame) = self.outbound.try_recv() {
                out.push(S::decode(&frame).unwrap());
            }
            out
        }
    }

    fn create_actor() -> (HubActor, broadcast::Receiver<HubEvent>) {
        let (_tx, rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(64);
        (HubActor::new(rx, event_tx, Duration::from_secs(60)), event_rx)
    }

    fn admit(actor: &mut HubActor, user: &str, device_type: DeviceType) -> TestConn {
        let (outbound_tx, outbound) = mpsc::channel(32);
        let (sever, severed) = oneshot::channel();
        let (respond_to, mut rx) = oneshot::channel();
        actor.handle_command(HubCommand::Admit {
            user_id: UserId::new(user),
            device_type,
            outbound: outbound_tx,
            sever,
            respond_to,
        });
        TestConn {
            id: rx.try_recv().unwrap(),
            outbound,
            severed,
        }
    }

    fn dispatch(actor: &mut HubActor, conn: &TestConn, message: ClientMessage) -> DispatchOutcome {
        let (respond_to, mut rx) = oneshot::channel();
        actor.handle_command(HubCommand::Dispatch {
            connection_id: conn.id.clone(),
            message,
            respond_to,
        });
        rx.try_recv().unwrap()
    }

    fn evict(actor: &mut HubActor, id: &ConnectionId, reason: RemovalReason) -> bool {
        let (respond_to, mut rx) = oneshot::channel();
        actor.handle_command(HubCommand::Evict {
            connection_id: id.clone(),
            reason,
            respond_to,
        });
        rx.try_recv().unwrap()
    }

    fn presence_of(frames: &[S]) -> Vec<&PresenceSnapshot> {
        frames
            .iter()
            .filter_map(|f| match f {
                S::Presence(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_admit_sends_connected_first() {
        let (mut actor, mut events) = create_actor();
        let mut conn = admit(&mut actor, "u1", DeviceType::Mobile);

        let frames = conn.drain();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            S::Connected(payload) => {
                assert_eq!(payload.connection_id, conn.id);
                assert_eq!(payload.user_id, UserId::new("u1"));
                assert_eq!(payload.device_type, DeviceType::Mobile);
            }
            other => panic!("expected connected, got {other:?}"),
        }

        assert!(matches!(events.try_recv(), Ok(HubEvent::Admitted { .. })));
        assert_eq!(actor.stats().connections, 1);
    }

    #[tokio::test]
    async fn test_join_publishes_presence_to_all_members() {
        let (mut actor, _events) = create_actor();
        let mut phone = admit(&mut actor, "u1", DeviceType::Mobile);
        let mut laptop = admit(&mut actor, "u1", DeviceType::Desktop);
        phone.drain();
        laptop.drain();

        let session = SessionId::new("conduct-42");
        assert_eq!(
            dispatch(&mut actor, &phone, ClientMessage::join("conduct-42")),
            DispatchOutcome::Joined {
                session_id: session.clone(),
                left: None
            }
        );
        let first = phone.drain();
        assert_eq!(presence_of(&first).len(), 1);
        assert_eq!(presence_of(&first)[0].devices.len(), 1);

        dispatch(&mut actor, &laptop, ClientMessage::join("conduct-42"));
        for conn in [&mut phone, &mut laptop] {
            let frames = conn.drain();
            let snaps = presence_of(&frames);
            assert_eq!(snaps.len(), 1);
            assert_eq!(snaps[0].devices.len(), 2);
            assert_eq!(snaps[0].user_count, 1);
            assert!(snaps[0].same_user_multi_device);
        }
    }

    #[tokio::test]
    async fn test_switching_sessions_updates_both() {
        let (mut actor, _events) = create_actor();
        let mut a = admit(&mut actor, "u1", DeviceType::Mobile);
        let mut b = admit(&mut actor, "u2", DeviceType::Desktop);
        dispatch(&mut actor, &a, ClientMessage::join("s1"));
        dispatch(&mut actor, &b, ClientMessage::join("s1"));
        a.drain();
        b.drain();

        let outcome = dispatch(&mut actor, &a, ClientMessage::join("s2"));
        assert_eq!(
            outcome,
            DispatchOutcome::Joined {
                session_id: SessionId::new("s2"),
                left: Some(SessionId::new("s1"))
            }
        );

        let b_frames = b.drain();
        let snaps = presence_of(&b_frames);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].session_id, SessionId::new("s1"));
        assert_eq!(snaps[0].devices.len(), 1);

        let a_frames = a.drain();
        assert_eq!(presence_of(&a_frames)[0].session_id, SessionId::new("s2"));
    }

    #[tokio::test]
    async fn test_relay_excludes_sender() {
        let (mut actor, _events) = create_actor();
        let mut a = admit(&mut actor, "u1", DeviceType::Mobile);
        let mut b = admit(&mut actor, "u2", DeviceType::Desktop);
        let mut c = admit(&mut actor, "u3", DeviceType::Desktop);
        for conn in [&a, &b, &c] {
            dispatch(&mut actor, conn, ClientMessage::join("s1"));
        }
        a.drain();
        b.drain();
        c.drain();

        let payload = json!({"id": "p7", "name": "Ada"});
        let outcome = dispatch(
            &mut actor,
            &a,
            ClientMessage::relay(RelayKind::ParticipantAdd, payload.clone()),
        );
        assert_eq!(outcome, DispatchOutcome::Relayed { recipients: 2 });

        assert!(a.drain().is_empty());
        for conn in [&mut b, &mut c] {
            assert_eq!(
                conn.drain(),
                vec![S::relay(RelayKind::ParticipantAdd, payload.clone())]
            );
        }
    }

    #[tokio::test]
    async fn test_request_sync_is_retagged_with_sender_device() {
        let (mut actor, _events) = create_actor();
        let mut phone = admit(&mut actor, "u1", DeviceType::Mobile);
        let mut laptop = admit(&mut actor, "u1", DeviceType::Desktop);
        dispatch(&mut actor, &phone, ClientMessage::join("s1"));
        dispatch(&mut actor, &laptop, ClientMessage::join("s1"));
        phone.drain();
        laptop.drain();

        dispatch(&mut actor, &phone, ClientMessage::RequestSync);

        assert!(phone.drain().is_empty());
        assert_eq!(
            laptop.drain(),
            vec![S::request_sync(DeviceType::Mobile, phone.id.clone())]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_acks_sender_only() {
        let (mut actor, _events) = create_actor();
        let mut a = admit(&mut actor, "u1", DeviceType::Mobile);
        let mut b = admit(&mut actor, "u2", DeviceType::Mobile);
        dispatch(&mut actor, &a, ClientMessage::join("s1"));
        dispatch(&mut actor, &b, ClientMessage::join("s1"));
        a.drain();
        b.drain();

        assert_eq!(
            dispatch(&mut actor, &a, ClientMessage::Heartbeat),
            DispatchOutcome::HeartbeatAcked
        );

        let frames = a.drain();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], S::Heartbeat(_)));
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn test_messages_outside_session() {
        let (mut actor, _events) = create_actor();
        let mut a = admit(&mut actor, "u1", DeviceType::Mobile);
        a.drain();

        assert_eq!(
            dispatch(
                &mut actor,
                &a,
                ClientMessage::relay(RelayKind::ParticipantUpdate, json!({}))
            ),
            DispatchOutcome::NoSession
        );
        assert_eq!(dispatch(&mut actor, &a, ClientMessage::RequestSync), DispatchOutcome::NoSession);
        assert_eq!(dispatch(&mut actor, &a, ClientMessage::Leave), DispatchOutcome::NoSession);
        assert!(a.drain().is_empty());
    }

    #[tokio::test]
    async fn test_evicted_sender_is_unknown() {
        let (mut actor, _events) = create_actor();
        let a = admit(&mut actor, "u1", DeviceType::Mobile);
        assert!(evict(&mut actor, &a.id, RemovalReason::Closed));

        assert_eq!(
            dispatch(&mut actor, &a, ClientMessage::Heartbeat),
            DispatchOutcome::UnknownConnection
        );
        assert!(!evict(&mut actor, &a.id, RemovalReason::Closed));
    }

    #[tokio::test]
    async fn test_last_member_leaving_closes_session() {
        let (mut actor, mut events) = create_actor();
        let a = admit(&mut actor, "u1", DeviceType::Mobile);
        dispatch(&mut actor, &a, ClientMessage::join("s1"));
        while events.try_recv().is_ok() {}

        evict(&mut actor, &a.id, RemovalReason::Closed);

        assert!(matches!(
            events.try_recv(),
            Ok(HubEvent::SessionClosed { session_id }) if session_id == SessionId::new("s1")
        ));
        assert!(matches!(events.try_recv(), Ok(HubEvent::Removed { .. })));
        assert_eq!(actor.stats(), HubStats::default());
        assert!(actor.snapshot(&SessionId::new("s1")).is_none());
    }

    #[tokio::test]
    async fn test_close_republishes_presence_to_remaining() {
        let (mut actor, _events) = create_actor();
        let a = admit(&mut actor, "u1", DeviceType::Mobile);
        let mut b = admit(&mut actor, "u2", DeviceType::Desktop);
        dispatch(&mut actor, &a, ClientMessage::join("s1"));
        dispatch(&mut actor, &b, ClientMessage::join("s1"));
        b.drain();

        evict(&mut actor, &a.id, RemovalReason::Closed);

        let frames = b.drain();
        let snaps = presence_of(&frames);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].devices.len(), 1);
        assert_eq!(snaps[0].devices[0].connection_id, b.id);
    }

    #[tokio::test]
    async fn test_notify_reaches_every_member() {
        let (mut actor, _events) = create_actor();
        let mut a = admit(&mut actor, "u1", DeviceType::Mobile);
        let mut b = admit(&mut actor, "u2", DeviceType::Desktop);
        dispatch(&mut actor, &a, ClientMessage::join("s1"));
        dispatch(&mut actor, &b, ClientMessage::join("s1"));
        a.drain();
        b.drain();

        let recipients = actor.handle_notify(
            &SessionId::new("s1"),
            RelayKind::ParticipantsSync,
            json!({"participants": []}),
        );
        assert_eq!(recipients, 2);
        assert_eq!(a.drain().len(), 1);
        assert_eq!(b.drain().len(), 1);

        assert_eq!(
            actor.handle_notify(&SessionId::new("empty"), RelayKind::ParticipantAdd, json!({})),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_silent_connections() {
        let (mut actor, mut events) = create_actor();
        let quiet = admit(&mut actor, "u1", DeviceType::Mobile);
        let chatty = admit(&mut actor, "u2", DeviceType::Desktop);
        while events.try_recv().is_ok() {}

        tokio::time::advance(Duration::from_secs(40)).await;
        dispatch(&mut actor, &chatty, ClientMessage::Heartbeat);
        tokio::time::advance(Duration::from_secs(30)).await;

        actor.handle_command(HubCommand::SweepStale);

        assert_eq!(actor.stats().connections, 1);
        assert!(actor.registry.contains(&chatty.id));
        assert!(matches!(
            events.try_recv(),
            Ok(HubEvent::Removed { reason: RemovalReason::Stale, .. })
        ));

        let severance = quiet.severed.await.unwrap();
        assert_eq!(severance.code, close::HEARTBEAT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_a_clean_close() {
        let (mut actor, _events) = create_actor();
        let a = admit(&mut actor, "u1", DeviceType::Mobile);

        assert!(evict(&mut actor, &a.id, RemovalReason::TransportError));

        let severance = a.severed.await.unwrap();
        assert_eq!(severance.code, close::TRANSPORT_ERROR);
        assert_ne!(severance.code, close::CLIENT_DISCONNECT);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_fan_out() {
        let (mut actor, _events) = create_actor();
        let (outbound_tx, _stuck) = mpsc::channel(1);
        let (sever, _severed) = oneshot::channel();
        let (respond_to, mut rx) = oneshot::channel();
        actor.handle_command(HubCommand::Admit {
            user_id: UserId::new("slow"),
            device_type: DeviceType::Desktop,
            outbound: outbound_tx,
            sever,
            respond_to,
        });
        let slow = rx.try_recv().unwrap();
        let mut fast = admit(&mut actor, "fast", DeviceType::Desktop);

        // The connected frame already fills the slow queue
        let (respond_to, _rx) = oneshot::channel();
        actor.handle_command(HubCommand::Dispatch {
            connection_id: slow.clone(),
            message: ClientMessage::join("s1"),
            respond_to,
        });
        dispatch(&mut actor, &fast, ClientMessage::join("s1"));
        fast.drain();

        let recipients = actor.handle_notify(&SessionId::new("s1"), RelayKind::ParticipantAdd, json!({}));
        assert_eq!(recipients, 1);
        assert_eq!(fast.drain().len(), 1);
        assert!(actor.stats().dropped_frames >= 1);
    }
}
