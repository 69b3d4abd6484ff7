//! Decoding errors for wire messages.

use thiserror::Error;

/// Why a frame could not be turned into a typed message.
///
/// The hub logs and drops every variant; none of them close a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Frame was not a JSON envelope
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Envelope `type` is not part of the protocol
    #[error("unrecognized message type: {0}")]
    UnknownType(String),

    /// Message type requires a payload but none was sent
    #[error("{kind} requires a payload")]
    MissingPayload { kind: String },

    /// Payload was present but did not match the expected shape
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

impl ParseError {
    /// Creates a JSON error from any displayable error.
    pub fn json<E: std::fmt::Display>(err: E) -> Self {
        Self::InvalidJson(err.to_string())
    }

    /// Returns true for well-formed frames with an unknown `type`.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}
