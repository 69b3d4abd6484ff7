//! huddled - Real-time session synchronization hub
//!
//! Devices connect over WebSockets, join a named session, and the hub keeps
//! every member's view in step:
//! - `hub` - actor owning connections and session membership, and routing messages
//! - `liveness` - periodic sweep that evicts connections that stopped heartbeating
//! - `server` - axum WebSocket endpoint and per-connection handler
//! - `config` - daemon configuration (defaults, TOML file, CLI overrides)
//! - `monitor` - process CPU/memory monitoring
//! - `cli` - `huddled start | stop | status`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       huddled daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │   HubServer     │────▶│         HubActor            │    │
//! │  │ (axum /ws)      │     │ registry + directory owner  │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             ▲                   │
//! │           │ one per socket              │ SweepStale        │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ConnectionHandler│     │     liveness monitor        │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Embedding
//!
//! ```no_run
//! use huddled::config::HubConfig;
//! use huddled::hub::spawn_hub_with_liveness;
//! use huddled::server::HubServer;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::default();
//! let cancel = CancellationToken::new();
//! let hub = spawn_hub_with_liveness(&config, cancel.clone());
//!
//! // An upstream service can inject broadcasts
//! let notifier = hub.clone();
//! tokio::spawn(async move {
//!     let _ = notifier
//!         .notify("conduct-42".into(), "participants_sync", serde_json::json!({"participants": []}))
//!         .await;
//! });
//!
//! HubServer::new(config, hub, cancel).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod hub;
pub mod liveness;
pub mod monitor;
pub mod server;
