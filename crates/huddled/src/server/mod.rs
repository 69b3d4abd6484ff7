//! WebSocket server for the hub daemon.
//!
//! The server:
//! - Accepts upgrades on `GET /ws?userId=..&deviceType=..`
//! - Spawns a `ConnectionHandler` for each socket
//! - Serves `GET /health` from the hub's counters
//! - Shuts down gracefully via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    HubServer    │
//! │  (axum router)  │
//! └───────┬─────────┘
//!         │ upgrade
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│    HubHandle    │
//! │  (per socket)   │◀────│ (outbound queue)│
//! └─────────────────┘     └─────────────────┘
//! ```

mod connection;

pub use connection::{ConnectRequest, ConnectionError, ConnectionHandler, IDENTITY_REQUIRED_CODE};

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::HubConfig;
use crate::hub::HubHandle;

/// Frames above this multiple of `max_message_size` fail the socket
/// instead of being dropped.
const HARD_LIMIT_FACTOR: usize = 4;

/// Errors from binding or serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Server error: {0}")]
    Serve(String),
}

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    user_id: Option<String>,
    device_type: Option<String>,
}

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    max_message_size: usize,
    shutdown: CancellationToken,
}

/// WebSocket server for the hub.
pub struct HubServer {
    config: HubConfig,
    hub: HubHandle,
    cancel_token: CancellationToken,
}

impl HubServer {
    pub fn new(config: HubConfig, hub: HubHandle, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            hub,
            cancel_token,
        }
    }

    /// Builds the axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            max_message_size: self.config.max_message_size,
            shutdown: self.cancel_token.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Binds the configured address and serves until cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.bind;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        self.run_on(listener).await
    }

    /// Serves on an already bound listener until cancelled.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!(addr = %local_addr, "Hub server listening");

        let cancel = self.cancel_token.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                info!("Server shutdown requested");
            })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    debug!(user_id = ?params.user_id, device_type = ?params.device_type, "Upgrade request");

    let request = ConnectRequest {
        user_id: params.user_id,
        device_type: params.device_type,
    };
    let handler = ConnectionHandler::new(state.hub, state.max_message_size, state.shutdown);

    ws.max_message_size(state.max_message_size.saturating_mul(HARD_LIMIT_FACTOR))
        .on_upgrade(move |socket| handler.run(socket, request))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.hub.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "connections": stats.connections,
                "sessions": stats.sessions,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "error": e.to_string(),
            })),
        ),
    }
}
