//! Huddle Protocol - Wire protocol for hub communication
//!
//! Every frame on the wire is a JSON envelope `{ "type": ..., "payload": ... }`.
//! This crate provides the envelope, the typed client and server messages
//! decoded from it, and the close codes shared by the hub and its clients.

pub mod close;
pub mod message;
pub mod parse;

pub use message::{
    ClientMessage, ConnectedPayload, Envelope, ErrorPayload, HeartbeatAck, JoinPayload,
    RelayKind, ServerMessage, SyncRequest,
};
pub use parse::ParseError;
