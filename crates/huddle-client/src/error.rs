//! Error types for the hub client.
//!
//! Connection-level failures are transient from the caller's point of view:
//! the driver retries them and only reports a terminal state once the
//! backoff policy is exhausted or the hub rejects the client outright.

use huddle_protocol::ParseError;
use thiserror::Error;

/// Hub client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The hub URL could not be turned into a connect request.
    #[error("Invalid hub URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The WebSocket handshake failed (refused, DNS, HTTP error, ...).
    #[error("Failed to connect to hub: {0}")]
    Connect(String),

    /// The hub did not send `connected` in time.
    #[error("Hub did not acknowledge the connection within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// The hub refused admission, e.g. because the identity was missing.
    #[error("Hub rejected the connection: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    /// The socket closed before the handshake finished.
    #[error("Connection closed during handshake")]
    ClosedDuringHandshake,

    /// A frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Reading or writing the socket failed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Returns true if retrying the same connection can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidUrl { .. } | Self::Rejected { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_terminal() {
        let error = ClientError::Rejected {
            message: "userId query parameter is required".to_string(),
            code: Some("IDENTITY_REQUIRED".to_string()),
        };
        assert!(!error.is_retryable());
        assert!(error.to_string().contains("userId"));
    }

    #[test]
    fn test_network_failures_are_retryable() {
        assert!(ClientError::Connect("connection refused".to_string()).is_retryable());
        assert!(ClientError::ClosedDuringHandshake.is_retryable());
        assert!(
            ClientError::HandshakeTimeout(std::time::Duration::from_secs(5)).is_retryable()
        );
        assert!(ClientError::Transport("reset".to_string()).is_retryable());
    }

    #[test]
    fn test_invalid_url_display() {
        let error = ClientError::InvalidUrl {
            url: "not a url".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert!(!error.is_retryable());
        let display = format!("{error}");
        assert!(display.contains("Invalid hub URL"));
        assert!(display.contains("not a url"));
    }

    #[test]
    fn test_parse_error_from_conversion() {
        let parse = huddle_protocol::ServerMessage::decode("{ nope").unwrap_err();
        let error: ClientError = parse.into();
        assert!(matches!(error, ClientError::Protocol(_)));
    }
}
