//! Session hub using the actor pattern.
//!
//! The hub is the single owner of every connection and session. Connection
//! handlers feed it decoded messages through a `HubHandle`; it answers over
//! oneshot channels and writes outbound frames into per-connection queues.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  HubCommand   ┌──────────────┐  HubEvent   ┌───────────┐
//! │ ConnectionHandler│──────────────▶│   HubActor   │────────────▶│ observers │
//! │ (one per socket) │   (mpsc)      │ registry +   │ (broadcast) └───────────┘
//! └──────────────────┘               │ directory    │
//!          ▲                         └──────┬───────┘
//!          │      Arc<str> frames (bounded mpsc, try_send)
//!          └────────────────────────────────┘
//! ```

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

mod actor;
mod commands;
mod directory;
mod handle;
mod presence;
mod registry;

pub use actor::HubActor;
pub use commands::{DispatchOutcome, HubCommand, HubError, HubEvent, HubStats, RemovalReason};
pub use directory::{Departure, SessionDirectory};
pub use handle::{Admission, HubHandle};
pub use registry::{ConnectionRegistry, Severance};

use crate::config::HubConfig;
use crate::liveness;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 1024;
const EVENT_BUFFER: usize = 256;

/// Spawn the hub actor and return a handle for interaction.
///
/// Does not start the liveness monitor; see [`spawn_hub_with_liveness`].
pub fn spawn_hub(config: &HubConfig) -> HubHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = HubActor::new(cmd_rx, event_tx.clone(), config.heartbeat_timeout);
    tokio::spawn(actor.run());

    HubHandle::new(cmd_tx, event_tx, config.outbound_buffer)
}

/// Spawn the hub actor together with its liveness monitor.
///
/// The monitor stops when `cancel` fires.
pub fn spawn_hub_with_liveness(config: &HubConfig, cancel: CancellationToken) -> HubHandle {
    let hub = spawn_hub(config);
    liveness::spawn_liveness_monitor(hub.clone(), config.sweep_interval, cancel);
    hub
}
