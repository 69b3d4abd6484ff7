//! Shared helpers for the hub integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use huddle_protocol::{ClientMessage, ServerMessage};
use huddled::config::HubConfig;
use huddled::hub::{spawn_hub_with_liveness, HubHandle};
use huddled::server::HubServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Upper bound for any single expected frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to listen before concluding nothing is coming.
pub const SILENCE: Duration = Duration::from_millis(200);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A hub and server on an ephemeral localhost port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: HubHandle,
    pub cancel_token: CancellationToken,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(HubConfig::default()).await
    }

    pub async fn spawn_with(config: HubConfig) -> Self {
        Self::spawn_on(TcpListener::bind("127.0.0.1:0").await.expect("bind"), config).await
    }

    /// Runs a server on a listener the caller already bound.
    pub async fn spawn_on(listener: TcpListener, config: HubConfig) -> Self {
        let addr = listener.local_addr().expect("local addr");
        let cancel_token = CancellationToken::new();
        let hub = spawn_hub_with_liveness(&config, cancel_token.clone());

        let server = HubServer::new(config, hub.clone(), cancel_token.clone());
        tokio::spawn(async move {
            let _ = server.run_on(listener).await;
        });

        Self {
            addr,
            hub,
            cancel_token,
        }
    }

    pub fn url(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    /// Connects and consumes the `connected` message.
    pub async fn connect(&self, user_id: &str, device_type: &str) -> TestClient {
        let mut client = self
            .connect_raw(&format!("userId={user_id}&deviceType={device_type}"))
            .await;
        match client.recv().await {
            ServerMessage::Connected(payload) => {
                client.connection_id = payload.connection_id.as_str().to_string();
                client
            }
            other => panic!("expected connected, got {other:?}"),
        }
    }

    pub async fn connect_raw(&self, query: &str) -> TestClient {
        let (ws, _) = connect_async(self.url(query)).await.expect("connect");
        TestClient {
            ws,
            connection_id: String::new(),
        }
    }

    /// Plain HTTP GET, returning status line and body.
    pub async fn get(&self, path: &str) -> (String, String) {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", self.addr);
        stream.write_all(request.as_bytes()).await.expect("write");

        let mut response = String::new();
        timeout(RECV_TIMEOUT, stream.read_to_string(&mut response))
            .await
            .expect("response timeout")
            .expect("read");

        let status = response.lines().next().unwrap_or_default().to_string();
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default();
        (status, body)
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// A raw WebSocket client speaking the hub protocol.
pub struct TestClient {
    pub ws: WsStream,
    pub connection_id: String,
}

impl TestClient {
    pub async fn send(&mut self, message: ClientMessage) {
        let text = message.encode().expect("encode");
        self.send_text(&text).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.expect("send");
    }

    pub async fn join(&mut self, session: &str) {
        self.send(ClientMessage::join(session)).await;
    }

    /// Next protocol message, skipping control frames.
    pub async fn recv(&mut self) -> ServerMessage {
        self.try_recv(RECV_TIMEOUT)
            .await
            .expect("no message before timeout")
    }

    pub async fn try_recv(&mut self, wait: Duration) -> Option<ServerMessage> {
        loop {
            let frame = timeout(wait, self.ws.next()).await.ok()??;
            match frame.ok()? {
                Message::Text(text) => {
                    return Some(ServerMessage::decode(text.as_str()).expect("decode"));
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Waits for the next presence broadcast, skipping anything else.
    pub async fn recv_presence(&mut self) -> huddle_core::PresenceSnapshot {
        loop {
            if let ServerMessage::Presence(snapshot) = self.recv().await {
                return snapshot;
            }
        }
    }

    /// Asserts nothing arrives for a short while.
    pub async fn expect_silence(&mut self) {
        if let Some(message) = self.try_recv(SILENCE).await {
            panic!("expected silence, got {message:?}");
        }
    }

    /// Waits for the close frame and returns its code.
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("close timeout")?;
            match frame {
                Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
