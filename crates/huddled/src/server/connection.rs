//! Connection handler for one WebSocket client.
//!
//! Each accepted socket gets its own `ConnectionHandler` that:
//! - Checks identity and admits the connection into the hub
//! - Decodes inbound frames and hands them to the hub in arrival order
//! - Writes the hub's outbound frames from a separate task
//! - Closes the socket when the hub severs it or the daemon shuts down
//!
//! Every exit path ends in `HubHandle::disconnect`, which is idempotent, so
//! a client close, a transport error and a heartbeat eviction all share the
//! same cleanup.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_core::{ConnectionId, DeviceType, UserId};
use huddle_protocol::{close, ClientMessage, ParseError, ServerMessage};

use crate::hub::{DispatchOutcome, HubError, HubHandle, RemovalReason, Severance};

/// Write timeout for a single frame.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the writer to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Error code sent with the identity rejection.
pub const IDENTITY_REQUIRED_CODE: &str = "IDENTITY_REQUIRED";

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Identity parameters taken from the upgrade request.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub user_id: Option<String>,
    pub device_type: Option<String>,
}

/// Errors that can occur while handling one connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Missing userId")]
    IdentityRequired,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Write timeout")]
    WriteTimeout,
}

impl ConnectionError {
    /// Returns true if the connection cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MessageTooLarge { .. } | Self::Parse(_))
    }
}

/// Why the writer task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// Hub severed the connection (it is already removed)
    Severed,
    /// Daemon is shutting down
    Shutdown,
    /// Socket write failed
    Failed,
}

/// Connection handler for a single client.
pub struct ConnectionHandler {
    hub: HubHandle,
    max_message_size: usize,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(hub: HubHandle, max_message_size: usize, shutdown: CancellationToken) -> Self {
        Self {
            hub,
            max_message_size,
            shutdown,
        }
    }

    /// Runs the connection until it closes, errors, or is severed.
    pub async fn run(self, mut socket: WebSocket, request: ConnectRequest) {
        let user_id = match identify(&request) {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(error = %e, "Rejecting connection without identity");
                reject(&mut socket).await;
                return;
            }
        };
        let device_type = resolve_device_type(request.device_type.as_deref());

        let admission = match self.hub.admit(user_id.clone(), device_type).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(error = %e, "Hub unavailable, closing connection");
                let _ = socket
                    .send(close_message(close::SERVER_SHUTDOWN, "server shutting down"))
                    .await;
                return;
            }
        };
        let connection_id = admission.connection_id;

        debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            device_type = %device_type,
            "Connection established"
        );

        let (sink, mut stream) = socket.split();
        let mut writer = tokio::spawn(write_loop(
            connection_id.clone(),
            sink,
            admission.outbound,
            admission.severed,
            self.shutdown.clone(),
        ));

        let (reason, writer_done) = tokio::select! {
            reason = self.read_loop(&connection_id, &mut stream) => (reason, false),
            exit = &mut writer => {
                let reason = match exit {
                    Ok(WriterExit::Severed) => RemovalReason::Evicted,
                    Ok(WriterExit::Shutdown) => RemovalReason::Closed,
                    Ok(WriterExit::Failed) | Err(_) => RemovalReason::TransportError,
                };
                (reason, true)
            }
        };

        match self.hub.disconnect(connection_id.clone(), reason).await {
            Ok(_) if !writer_done => {
                // Disconnect severed the link; let the writer send its close frame
                if timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                    writer.abort();
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Hub gone during disconnect");
                writer.abort();
            }
        }

        info!(connection_id = %connection_id, reason = %reason, "Connection closed");
    }

    /// Reads frames until the client closes or the transport fails.
    async fn read_loop(&self, connection_id: &ConnectionId, stream: &mut WsStream) -> RemovalReason {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = self.handle_text(connection_id, text.as_str()).await {
                        if e.is_fatal() {
                            warn!(connection_id = %connection_id, error = %e, "Connection error");
                            return RemovalReason::TransportError;
                        }
                        log_protocol_error(connection_id, &e);
                    }
                }
                Ok(Message::Binary(data)) => {
                    debug!(connection_id = %connection_id, len = data.len(), "Ignoring binary frame");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Answered by the WebSocket layer
                }
                Ok(Message::Close(frame)) => {
                    debug!(
                        connection_id = %connection_id,
                        code = frame.as_ref().map(|f| f.code),
                        "Client sent close frame"
                    );
                    return RemovalReason::Closed;
                }
                Err(e) => {
                    debug!(connection_id = %connection_id, error = %e, "Receive error");
                    return RemovalReason::TransportError;
                }
            }
        }

        RemovalReason::Closed
    }

    /// Decodes one text frame and routes it through the hub.
    async fn handle_text(&self, connection_id: &ConnectionId, text: &str) -> Result<(), ConnectionError> {
        if text.len() > self.max_message_size {
            return Err(ConnectionError::MessageTooLarge {
                size: text.len(),
                max: self.max_message_size,
            });
        }

        let message = ClientMessage::decode(text)?;
        let kind = message.kind();

        match self.hub.dispatch(connection_id.clone(), message).await? {
            DispatchOutcome::NoSession => {
                debug!(connection_id = %connection_id, kind, "Ignoring message outside a session");
            }
            DispatchOutcome::UnknownConnection => {
                debug!(connection_id = %connection_id, kind, "Message raced eviction");
            }
            outcome => {
                debug!(connection_id = %connection_id, kind, ?outcome, "Dispatched");
            }
        }

        Ok(())
    }
}

/// Writes queued frames until severed, shut down, or the socket fails.
async fn write_loop(
    connection_id: ConnectionId,
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Arc<str>>,
    mut severed: oneshot::Receiver<Severance>,
    shutdown: CancellationToken,
) -> WriterExit {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                let _ = send_frame(&mut sink, close_message(close::SERVER_SHUTDOWN, "server shutting down")).await;
                return WriterExit::Shutdown;
            }

            severance = &mut severed => {
                if let Ok(severance) = severance {
                    debug!(
                        connection_id = %connection_id,
                        code = severance.code,
                        reason = severance.reason,
                        "Hub severed connection"
                    );
                    let _ = send_frame(&mut sink, close_message(severance.code, severance.reason)).await;
                }
                return WriterExit::Severed;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return WriterExit::Severed;
                };
                if let Err(e) = send_frame(&mut sink, Message::Text(String::from(&*frame).into())).await {
                    debug!(connection_id = %connection_id, error = %e, "Send error, closing connection");
                    return WriterExit::Failed;
                }
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, message: Message) -> Result<(), ConnectionError> {
    match timeout(WRITE_TIMEOUT, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Sends the identity error and closes. Terminal for this connection only.
async fn reject(socket: &mut WebSocket) {
    let error = ServerMessage::error_with_code("userId query parameter is required", IDENTITY_REQUIRED_CODE);
    if let Ok(text) = error.encode() {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket
        .send(close_message(close::IDENTITY_REQUIRED, "userId required"))
        .await;
}

fn identify(request: &ConnectRequest) -> Result<UserId, ConnectionError> {
    request
        .user_id
        .as_deref()
        .and_then(|raw| UserId::parse(raw).ok())
        .ok_or(ConnectionError::IdentityRequired)
}

/// Parses the declared device class, falling back to desktop.
fn resolve_device_type(raw: Option<&str>) -> DeviceType {
    match raw.map(str::parse::<DeviceType>) {
        Some(Ok(device_type)) => device_type,
        Some(Err(e)) => {
            debug!(error = %e, "Unrecognized deviceType, defaulting to desktop");
            DeviceType::default()
        }
        None => DeviceType::default(),
    }
}

fn log_protocol_error(connection_id: &ConnectionId, error: &ConnectionError) {
    match error {
        ConnectionError::Parse(e) if e.is_unrecognized() => {
            debug!(connection_id = %connection_id, error = %e, "Ignoring unrecognized message");
        }
        _ => {
            warn!(connection_id = %connection_id, error = %error, "Dropping invalid message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_requires_non_blank_user() {
        let missing = ConnectRequest::default();
        assert!(matches!(identify(&missing), Err(ConnectionError::IdentityRequired)));

        let blank = ConnectRequest {
            user_id: Some("   ".to_string()),
            device_type: None,
        };
        assert!(identify(&blank).is_err());

        let ok = ConnectRequest {
            user_id: Some("u1".to_string()),
            device_type: None,
        };
        assert_eq!(identify(&ok).unwrap(), UserId::new("u1"));
    }

    #[test]
    fn test_device_type_defaults_to_desktop() {
        assert_eq!(resolve_device_type(Some("mobile")), DeviceType::Mobile);
        assert_eq!(resolve_device_type(Some("MOBILE")), DeviceType::Mobile);
        assert_eq!(resolve_device_type(Some("tablet")), DeviceType::Desktop);
        assert_eq!(resolve_device_type(None), DeviceType::Desktop);
    }

    #[test]
    fn test_error_fatality() {
        assert!(!ConnectionError::MessageTooLarge { size: 2, max: 1 }.is_fatal());
        assert!(!ConnectionError::Parse(ParseError::UnknownType("x".into())).is_fatal());
        assert!(ConnectionError::Hub(HubError::ChannelClosed).is_fatal());
        assert!(ConnectionError::WriteTimeout.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ConnectionError::MessageTooLarge { size: 2048, max: 1024 };
        assert_eq!(err.to_string(), "Message too large: 2048 bytes (max: 1024)");
    }
}
