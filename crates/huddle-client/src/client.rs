//! Reconnecting hub client.
//!
//! This module provides the `HubClient` which handles:
//! - Connection to the hub over WebSocket
//! - Automatic reconnection with exponential backoff
//! - Re-joining the active session after a reconnect
//! - Forwarding hub messages to the caller as `ClientEvent`s
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use huddle_core::{ConnectionId, DeviceType, PresenceSnapshot, SessionId, UserId};
use huddle_protocol::{close, ClientMessage, ConnectedPayload, RelayKind, ServerMessage};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::error::{ClientError, Result};
use crate::sync::SyncState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Default interval between heartbeats; comfortably inside the hub's
/// default 60s timeout.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Default time allowed for the hub to answer with `connected`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the hub client.
///
/// # Example
///
/// ```rust
/// use huddle_client::{BackoffPolicy, ClientConfig};
/// use huddle_core::DeviceType;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     backoff: BackoffPolicy {
///         max_attempts: 10,
///         ..Default::default()
///     },
///     heartbeat_interval: Duration::from_secs(15),
///     ..ClientConfig::new("ws://127.0.0.1:8787/ws", "u1", DeviceType::Mobile)
/// };
/// assert!(config.connect_url().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the hub, e.g. `ws://host:8787/ws`.
    pub url: String,

    pub user_id: UserId,

    pub device_type: DeviceType,

    /// Retry schedule after an unexpected close.
    pub backoff: BackoffPolicy,

    pub heartbeat_interval: Duration,

    pub handshake_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, user_id: impl Into<UserId>, device_type: DeviceType) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            device_type,
            backoff: BackoffPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Hub URL with the identity query parameters appended.
    pub fn connect_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| ClientError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        url.query_pairs_mut()
            .append_pair("userId", self.user_id.as_str())
            .append_pair("deviceType", self.device_type.as_str());

        Ok(url)
    }
}

// ============================================================================
// Status, events and commands
// ============================================================================

/// Connection state as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,

    /// A connection attempt is in flight or scheduled. `reconnecting` is
    /// false only before the very first attempt has failed or succeeded.
    Connecting { reconnecting: bool },

    Connected,

    /// Retries are exhausted or the hub refused the client.
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Connecting { reconnecting: true })
    }
}

/// Events delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Admission succeeded.
    Connected {
        connection_id: ConnectionId,
        reconnected: bool,
    },

    /// Membership of the current session changed.
    Presence(PresenceSnapshot),

    /// A participant event relayed from another device or injected upstream.
    Participant { kind: RelayKind, payload: Value },

    /// Another device asked for a full sync.
    SyncRequested { device_type: DeviceType },

    /// The connection ended. `intentional` is true only for a caller
    /// requested disconnect, which is never retried.
    Disconnected {
        code: Option<u16>,
        intentional: bool,
    },

    /// The hub refused admission; no retry follows.
    Rejected { message: String },

    /// Backoff exhausted after this many retries.
    GaveUp { attempts: u32 },
}

/// Commands accepted from the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Join a session. Remembered and re-sent after every reconnect.
    Join(SessionId),

    Leave,

    /// Relay a participant event to the rest of the session.
    Send { kind: RelayKind, payload: Value },

    RequestSync,

    /// Close with code 1000 and stop for good.
    Disconnect,
}

/// Called after a successful reconnect, once the session has been re-joined.
pub type ReconnectCallback = Box<dyn FnMut() + Send>;

/// How a connected period ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Caller asked to stop, or the client was cancelled.
    Stopped,

    /// Closed or failed underneath us; eligible for retry.
    Dropped { code: Option<u16> },
}

// ============================================================================
// Hub Client
// ============================================================================

/// Client for a huddle hub.
///
/// # Connection Lifecycle
///
/// 1. Connects to `url?userId=..&deviceType=..` and waits for `connected`
/// 2. Re-sends `join` for the remembered session, if any
/// 3. Relays commands out, forwards hub messages in, and heartbeats
/// 4. On an unexpected close, retries with exponential backoff
/// 5. Gives up after `backoff.max_attempts` consecutive failed retries
///
/// # Example
///
/// ```rust,no_run
/// use huddle_client::{ClientCommand, ClientConfig, HubClient};
/// use huddle_core::DeviceType;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() {
/// let (event_tx, mut events) = mpsc::unbounded_channel();
/// let (commands, command_rx) = mpsc::unbounded_channel();
/// let config = ClientConfig::new("ws://127.0.0.1:8787/ws", "u1", DeviceType::Mobile);
///
/// let resync = commands.clone();
/// let client = HubClient::new(config, event_tx, command_rx, CancellationToken::new())
///     .on_reconnect(move || {
///         let _ = resync.send(ClientCommand::RequestSync);
///     });
/// tokio::spawn(client.run());
///
/// commands.send(ClientCommand::Join("conduct-42".into())).ok();
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # }
/// ```
pub struct HubClient {
    config: ClientConfig,

    event_tx: mpsc::UnboundedSender<ClientEvent>,

    command_rx: mpsc::UnboundedReceiver<ClientCommand>,

    cancel_token: CancellationToken,

    status_tx: watch::Sender<ConnectionStatus>,

    sync_tx: watch::Sender<SyncState>,

    on_reconnect: Option<ReconnectCallback>,

    /// Session to re-join after a reconnect.
    session: Option<SessionId>,
}

impl HubClient {
    #[must_use]
    pub fn new(
        config: ClientConfig,
        event_tx: mpsc::UnboundedSender<ClientEvent>,
        command_rx: mpsc::UnboundedReceiver<ClientCommand>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (sync_tx, _) = watch::channel(SyncState::default());

        Self {
            config,
            event_tx,
            command_rx,
            cancel_token,
            status_tx,
            sync_tx,
            on_reconnect: None,
            session: None,
        }
    }

    /// Installs the reconnect callback.
    #[must_use]
    pub fn on_reconnect(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_reconnect = Some(Box::new(callback));
        self
    }

    /// Watches the connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Watches the last full participant sync.
    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.sync_tx.subscribe()
    }

    /// Runs until the caller disconnects, the token is cancelled, the hub
    /// rejects the client, or retries are exhausted.
    pub async fn run(mut self) {
        info!(
            url = %self.config.url,
            user_id = %self.config.user_id,
            device_type = %self.config.device_type,
            "Hub client starting"
        );

        let mut attempt = 0u32;
        let mut has_connected = false;

        loop {
            if self.cancel_token.is_cancelled() {
                self.stop();
                return;
            }

            self.set_status(ConnectionStatus::Connecting {
                reconnecting: has_connected || attempt > 0,
            });

            let result = tokio::select! {
                result = connect(&self.config) => result,
                _ = self.cancel_token.cancelled() => {
                    self.stop();
                    return;
                }
            };

            match result {
                Ok((ws, connected)) => {
                    let reconnected = has_connected;
                    has_connected = true;
                    attempt = 0;

                    match self.serve(ws, connected, reconnected).await {
                        SessionEnd::Stopped => {
                            self.emit(ClientEvent::Disconnected {
                                code: Some(close::CLIENT_DISCONNECT),
                                intentional: true,
                            });
                            self.stop();
                            return;
                        }
                        SessionEnd::Dropped { code } => {
                            info!(code = ?code, "Hub connection dropped");
                            self.emit(ClientEvent::Disconnected {
                                code,
                                intentional: false,
                            });
                        }
                    }
                }
                Err(ClientError::Rejected { message, code }) => {
                    warn!(error_message = %message, error_code = ?code, "Hub rejected connection");
                    self.set_status(ConnectionStatus::Failed);
                    self.emit(ClientEvent::Rejected { message });
                    return;
                }
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, "Hub client cannot connect");
                    self.set_status(ConnectionStatus::Failed);
                    self.emit(ClientEvent::GaveUp { attempts: attempt });
                    return;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Connection attempt failed");
                }
            }

            if !self.config.backoff.should_retry(attempt) {
                warn!(attempts = attempt, "Giving up on hub after repeated failures");
                self.set_status(ConnectionStatus::Failed);
                self.emit(ClientEvent::GaveUp { attempts: attempt });
                return;
            }

            let delay = self.config.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            self.set_status(ConnectionStatus::Connecting { reconnecting: true });
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying hub connection");

            if !self.wait_before_retry(delay).await {
                self.stop();
                return;
            }
        }
    }

    /// Drives one established connection until it ends.
    async fn serve(
        &mut self,
        ws: WsStream,
        connected: ConnectedPayload,
        reconnected: bool,
    ) -> SessionEnd {
        let (mut sink, mut source) = ws.split();

        info!(
            connection_id = %connected.connection_id,
            reconnected,
            "Connected to hub"
        );
        self.set_status(ConnectionStatus::Connected);
        self.emit(ClientEvent::Connected {
            connection_id: connected.connection_id,
            reconnected,
        });

        if let Some(session_id) = self.session.clone() {
            debug!(session_id = %session_id, "Re-joining session");
            if let Err(e) = send_message(&mut sink, &ClientMessage::join(session_id)).await {
                warn!(error = %e, "Failed to re-join session");
                return SessionEnd::Dropped { code: None };
            }
        }

        if reconnected {
            if let Some(callback) = self.on_reconnect.as_mut() {
                callback();
            }
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    close_intentionally(&mut sink).await;
                    return SessionEnd::Stopped;
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = send_message(&mut sink, &ClientMessage::Heartbeat).await {
                        warn!(error = %e, "Failed to send heartbeat");
                        return SessionEnd::Dropped { code: None };
                    }
                }

                command = self.command_rx.recv() => match command {
                    Some(ClientCommand::Disconnect) | None => {
                        close_intentionally(&mut sink).await;
                        return SessionEnd::Stopped;
                    }
                    Some(command) => {
                        if let Err(e) = self.apply(&mut sink, command).await {
                            warn!(error = %e, "Failed to send to hub");
                            return SessionEnd::Dropped { code: None };
                        }
                    }
                },

                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Close(frame))) => {
                        // Only our own close is intentional, whatever code the hub sends
                        let code = frame.map(|f| u16::from(f.code));
                        return SessionEnd::Dropped { code };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Hub connection error");
                        return SessionEnd::Dropped { code: None };
                    }
                    None => return SessionEnd::Dropped { code: None },
                },
            }
        }
    }

    /// Sends a caller command to the hub.
    async fn apply(&mut self, sink: &mut WsSink, command: ClientCommand) -> Result<()> {
        let message = match command {
            ClientCommand::Join(session_id) => {
                self.session = Some(session_id.clone());
                ClientMessage::join(session_id)
            }
            ClientCommand::Leave => {
                self.session = None;
                ClientMessage::Leave
            }
            ClientCommand::Send { kind, payload } => ClientMessage::relay(kind, payload),
            ClientCommand::RequestSync => ClientMessage::RequestSync,
            ClientCommand::Disconnect => return Ok(()),
        };
        send_message(sink, &message).await
    }

    /// Applies a command while no connection is open. Returns false if the
    /// caller asked to stop.
    fn apply_offline(&mut self, command: Option<ClientCommand>) -> bool {
        match command {
            Some(ClientCommand::Join(session_id)) => {
                debug!(session_id = %session_id, "Will join once connected");
                self.session = Some(session_id);
            }
            Some(ClientCommand::Leave) => self.session = None,
            Some(command @ (ClientCommand::Send { .. } | ClientCommand::RequestSync)) => {
                warn!(command = ?command, "Not connected, dropping message");
            }
            Some(ClientCommand::Disconnect) | None => return false,
        }
        true
    }

    /// Sleeps out a backoff delay while still taking commands. Returns false
    /// if the client should stop instead of retrying.
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        let deadline = sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                _ = self.cancel_token.cancelled() => return false,
                command = self.command_rx.recv() => {
                    if !self.apply_offline(command) {
                        return false;
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable frame from hub");
                return;
            }
        };

        self.sync_tx.send_if_modified(|state| state.observe(&message));

        match message {
            ServerMessage::Presence(snapshot) => {
                debug!(
                    session_id = %snapshot.session_id,
                    devices = snapshot.devices.len(),
                    "Presence update"
                );
                self.emit(ClientEvent::Presence(snapshot));
            }
            ServerMessage::Relay { kind, payload } => {
                self.emit(ClientEvent::Participant { kind, payload });
            }
            ServerMessage::RequestSync(request) => {
                self.emit(ClientEvent::SyncRequested {
                    device_type: request.device_type,
                });
            }
            ServerMessage::Heartbeat(_) => {}
            ServerMessage::Error(error) => {
                warn!(
                    error_message = %error.message,
                    error_code = ?error.code,
                    "Received error from hub"
                );
            }
            ServerMessage::Connected(_) => {
                warn!("Received unexpected connected message");
            }
        }
    }

    fn stop(&self) {
        info!("Hub client stopped");
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    /// Ignores send errors; the caller may have gone away.
    fn emit(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Opens the socket and waits for `connected`.
async fn connect(config: &ClientConfig) -> Result<(WsStream, ConnectedPayload)> {
    let url = config.connect_url()?;
    debug!(url = %url, "Connecting to hub");

    let (mut ws, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| ClientError::Connect(e.to_string()))?;

    let connected = timeout(config.handshake_timeout, await_connected(&mut ws))
        .await
        .map_err(|_| ClientError::HandshakeTimeout(config.handshake_timeout))??;

    Ok((ws, connected))
}

/// Reads frames until `connected`, or fails on `error` or close.
async fn await_connected(ws: &mut WsStream) -> Result<ConnectedPayload> {
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => match ServerMessage::decode(&text)? {
                ServerMessage::Connected(payload) => return Ok(payload),
                ServerMessage::Error(error) => {
                    return Err(ClientError::Rejected {
                        message: error.message,
                        code: error.code,
                    })
                }
                other => debug!(kind = other.kind(), "Ignoring frame before connected"),
            },
            Message::Close(_) => return Err(ClientError::ClosedDuringHandshake),
            _ => {}
        }
    }
    Err(ClientError::ClosedDuringHandshake)
}

async fn send_message(sink: &mut WsSink, message: &ClientMessage) -> Result<()> {
    let text = message.encode()?;
    sink.send(Message::text(text)).await?;
    debug!(message_type = message.kind(), "Sent message to hub");
    Ok(())
}

async fn close_intentionally(sink: &mut WsSink) {
    let frame = CloseFrame {
        code: CloseCode::from(close::CLIENT_DISCONNECT),
        reason: close::CLIENT_DISCONNECT_REASON.into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "Close frame not delivered");
    }
}
