//! Protocol message types for hub communication.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use huddle_core::{ConnectionId, DeviceType, PresenceSnapshot, SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parse::ParseError;

// ============================================================================
// Envelope
// ============================================================================

/// The raw wire unit: `{ "type": string, "payload"?: any }`.
///
/// Decoding into an envelope only checks the outer shape. The typed
/// [`ClientMessage`] / [`ServerMessage`] are built from it afterwards so an
/// unknown `type` can be told apart from broken JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parses an envelope from a text frame.
    pub fn from_json(text: &str) -> Result<Self, ParseError> {
        serde_json::from_str(text).map_err(ParseError::json)
    }

    /// Serializes the envelope to a text frame.
    pub fn to_json(&self) -> Result<String, ParseError> {
        serde_json::to_string(self).map_err(ParseError::json)
    }

    /// Takes the payload, failing if it is absent or `null`.
    fn require_payload(self) -> Result<Value, ParseError> {
        match self.payload {
            Some(Value::Null) | None => Err(ParseError::MissingPayload { kind: self.kind }),
            Some(payload) => Ok(payload),
        }
    }

    /// Decodes the payload into a typed struct.
    fn typed_payload<T: for<'de> Deserialize<'de>>(self) -> Result<T, ParseError> {
        let kind = self.kind.clone();
        let payload = self.require_payload()?;
        serde_json::from_value(payload).map_err(|e| ParseError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// Wire type names
// ============================================================================

pub(crate) const JOIN: &str = "join";
pub(crate) const LEAVE: &str = "leave";
pub(crate) const REQUEST_SYNC: &str = "request_sync";
pub(crate) const HEARTBEAT: &str = "heartbeat";
pub(crate) const CONNECTED: &str = "connected";
pub(crate) const PRESENCE: &str = "presence";
pub(crate) const ERROR: &str = "error";

/// Domain message types the hub relays without looking inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    ParticipantAdd,
    ParticipantUpdate,
    ParticipantRemove,
    ParticipantsSync,
}

impl RelayKind {
    pub const ALL: [RelayKind; 4] = [
        Self::ParticipantAdd,
        Self::ParticipantUpdate,
        Self::ParticipantRemove,
        Self::ParticipantsSync,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParticipantAdd => "participant_add",
            Self::ParticipantUpdate => "participant_update",
            Self::ParticipantRemove => "participant_remove",
            Self::ParticipantsSync => "participants_sync",
        }
    }
}

impl FromStr for RelayKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseError::UnknownType(s.to_string()))
    }
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Payload of a `join` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub session_id: String,
}

/// Payload of the `connected` message sent after admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub device_type: DeviceType,
}

/// Payload of a `request_sync` broadcast.
///
/// Carries the requester's device class so recipients know who asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub device_type: DeviceType,
    pub connection_id: ConnectionId,
}

/// Payload of a `heartbeat` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// Hub time (RFC 3339) when the heartbeat was processed
    pub timestamp: String,
}

impl HeartbeatAck {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Payload of an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Relay payloads are passed through untouched; an absent one stays absent.
fn relay_payload(payload: &Value) -> Option<Value> {
    match payload {
        Value::Null => None,
        other => Some(other.clone()),
    }
}

// ============================================================================
// Client → Hub
// ============================================================================

/// Messages sent from a client to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join a session, leaving any previous one
    Join { session_id: SessionId },

    /// Leave the current session
    Leave,

    /// Domain event relayed verbatim to the rest of the session
    Relay { kind: RelayKind, payload: Value },

    /// Ask the other devices in the session to send a full sync
    RequestSync,

    /// Liveness signal
    Heartbeat,
}

impl ClientMessage {
    /// Creates a join message.
    pub fn join(session_id: impl Into<SessionId>) -> Self {
        Self::Join {
            session_id: session_id.into(),
        }
    }

    /// Creates a relay message.
    pub fn relay(kind: RelayKind, payload: Value) -> Self {
        Self::Relay { kind, payload }
    }

    /// Returns the wire type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => JOIN,
            Self::Leave => LEAVE,
            Self::Relay { kind, .. } => kind.as_str(),
            Self::RequestSync => REQUEST_SYNC,
            Self::Heartbeat => HEARTBEAT,
        }
    }

    /// Builds a typed message from a decoded envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ParseError> {
        match envelope.kind.as_str() {
            JOIN => {
                let join: JoinPayload = envelope.typed_payload()?;
                let session_id =
                    SessionId::parse(&join.session_id).map_err(|e| ParseError::InvalidPayload {
                        kind: JOIN.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Self::Join { session_id })
            }
            LEAVE => Ok(Self::Leave),
            REQUEST_SYNC => Ok(Self::RequestSync),
            HEARTBEAT => Ok(Self::Heartbeat),
            other => {
                let kind: RelayKind = other.parse()?;
                Ok(Self::Relay {
                    kind,
                    payload: envelope.payload.unwrap_or(Value::Null),
                })
            }
        }
    }

    /// Converts to the wire envelope.
    pub fn to_envelope(&self) -> Envelope {
        match self {
            Self::Join { session_id } => Envelope::new(
                JOIN,
                Some(serde_json::json!({ "sessionId": session_id.as_str() })),
            ),
            Self::Relay { kind, payload } => Envelope::new(kind.as_str(), relay_payload(payload)),
            other => Envelope::new(other.kind(), None),
        }
    }

    /// Decodes a text frame.
    pub fn decode(text: &str) -> Result<Self, ParseError> {
        Self::from_envelope(Envelope::from_json(text)?)
    }

    /// Encodes to a text frame.
    pub fn encode(&self) -> Result<String, ParseError> {
        self.to_envelope().to_json()
    }
}

// ============================================================================
// Hub → Client
// ============================================================================

/// Messages sent from the hub to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Admission succeeded
    Connected(ConnectedPayload),

    /// Membership snapshot of the recipient's session
    Presence(PresenceSnapshot),

    /// Domain event relayed from another member (or injected upstream)
    Relay { kind: RelayKind, payload: Value },

    /// Another device asked for a full sync
    RequestSync(SyncRequest),

    /// Heartbeat acknowledgement, sent only to the heartbeating client
    Heartbeat(HeartbeatAck),

    /// Error response
    Error(ErrorPayload),
}

impl ServerMessage {
    /// Creates a connected response.
    pub fn connected(connection_id: ConnectionId, user_id: UserId, device_type: DeviceType) -> Self {
        Self::Connected(ConnectedPayload {
            connection_id,
            user_id,
            device_type,
        })
    }

    /// Creates a presence broadcast.
    pub fn presence(snapshot: PresenceSnapshot) -> Self {
        Self::Presence(snapshot)
    }

    /// Creates a relay broadcast.
    pub fn relay(kind: RelayKind, payload: Value) -> Self {
        Self::Relay { kind, payload }
    }

    /// Creates a re-tagged sync request.
    pub fn request_sync(device_type: DeviceType, connection_id: ConnectionId) -> Self {
        Self::RequestSync(SyncRequest {
            device_type,
            connection_id,
        })
    }

    /// Creates a heartbeat acknowledgement stamped with the current time.
    pub fn heartbeat_ack() -> Self {
        Self::Heartbeat(HeartbeatAck::now())
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error(ErrorPayload {
            message: message.to_string(),
            code: None,
        })
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error(ErrorPayload {
            message: message.to_string(),
            code: Some(code.to_string()),
        })
    }

    /// Returns the wire type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => CONNECTED,
            Self::Presence(_) => PRESENCE,
            Self::Relay { kind, .. } => kind.as_str(),
            Self::RequestSync(_) => REQUEST_SYNC,
            Self::Heartbeat(_) => HEARTBEAT,
            Self::Error(_) => ERROR,
        }
    }

    /// Converts to the wire envelope.
    pub fn to_envelope(&self) -> Result<Envelope, ParseError> {
        let payload = match self {
            Self::Connected(p) => serde_json::to_value(p),
            Self::Presence(p) => serde_json::to_value(p),
            Self::Relay { kind, payload } => {
                return Ok(Envelope::new(kind.as_str(), relay_payload(payload)));
            }
            Self::RequestSync(p) => serde_json::to_value(p),
            Self::Heartbeat(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
        }
        .map_err(ParseError::json)?;

        Ok(Envelope::new(self.kind(), Some(payload)))
    }

    /// Builds a typed message from a decoded envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ParseError> {
        match envelope.kind.as_str() {
            CONNECTED => Ok(Self::Connected(envelope.typed_payload()?)),
            PRESENCE => Ok(Self::Presence(envelope.typed_payload()?)),
            REQUEST_SYNC => Ok(Self::RequestSync(envelope.typed_payload()?)),
            HEARTBEAT => Ok(Self::Heartbeat(envelope.typed_payload()?)),
            ERROR => Ok(Self::Error(envelope.typed_payload()?)),
            other => {
                let kind: RelayKind = other.parse()?;
                Ok(Self::Relay {
                    kind,
                    payload: envelope.payload.unwrap_or(Value::Null),
                })
            }
        }
    }

    /// Decodes a text frame.
    pub fn decode(text: &str) -> Result<Self, ParseError> {
        Self::from_envelope(Envelope::from_json(text)?)
    }

    /// Encodes to a text frame.
    pub fn encode(&self) -> Result<String, ParseError> {
        self.to_envelope()?.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::PresenceEntry;
    use serde_json::json;

    #[test]
    fn test_join_decoding() {
        let msg = ClientMessage::decode(r#"{"type":"join","payload":{"sessionId":"s1"}}"#).unwrap();
        assert_eq!(msg, ClientMessage::join("s1"));
    }

    #[test]
    fn test_join_without_session_id_is_rejected() {
        let err = ClientMessage::decode(r#"{"type":"join","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidPayload { .. }));

        let err = ClientMessage::decode(r#"{"type":"join"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingPayload { .. }));

        let err = ClientMessage::decode(r#"{"type":"join","payload":{"sessionId":"  "}}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidPayload { .. }));
    }

    #[test]
    fn test_relay_payload_is_opaque() {
        let text = r#"{"type":"participant_add","payload":{"id":"p1","score":{"nested":[1,2]}}}"#;
        let msg = ClientMessage::decode(text).unwrap();
        match msg {
            ClientMessage::Relay { kind, payload } => {
                assert_eq!(kind, RelayKind::ParticipantAdd);
                assert_eq!(payload, json!({"id":"p1","score":{"nested":[1,2]}}));
            }
            other => panic!("Expected Relay, got {other:?}"),
        }
    }

    #[test]
    fn test_relay_without_payload_passes_through() {
        let msg = ClientMessage::decode(r#"{"type":"participant_remove"}"#).unwrap();
        assert_eq!(msg, ClientMessage::relay(RelayKind::ParticipantRemove, Value::Null));

        let msg = ClientMessage::decode(r#"{"type":"participant_add","payload":null}"#).unwrap();
        assert_eq!(msg, ClientMessage::relay(RelayKind::ParticipantAdd, Value::Null));

        // Forwarded as it came in, with no payload key
        let out = ServerMessage::relay(RelayKind::ParticipantRemove, Value::Null)
            .encode()
            .unwrap();
        assert_eq!(out, r#"{"type":"participant_remove"}"#);
        assert_eq!(
            ServerMessage::decode(&out).unwrap(),
            ServerMessage::relay(RelayKind::ParticipantRemove, Value::Null)
        );
    }

    #[test]
    fn test_unit_messages_ignore_payload() {
        let msg = ClientMessage::decode(r#"{"type":"heartbeat","payload":{"t":1}}"#).unwrap();
        assert_eq!(msg, ClientMessage::Heartbeat);

        let msg = ClientMessage::decode(r#"{"type":"leave"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Leave);
    }

    #[test]
    fn test_unknown_type() {
        let err = ClientMessage::decode(r#"{"type":"self_destruct"}"#).unwrap_err();
        assert_eq!(err, ParseError::UnknownType("self_destruct".to_string()));
        assert!(err.is_unrecognized());
    }

    #[test]
    fn test_relay_kind_names() {
        for kind in RelayKind::ALL {
            assert_eq!(kind.as_str().parse::<RelayKind>().unwrap(), kind);
        }
        assert_eq!(RelayKind::ParticipantsSync.to_string(), "participants_sync");
    }

    #[test]
    fn test_server_request_sync_is_retagged() {
        let msg = ServerMessage::request_sync(DeviceType::Mobile, ConnectionId::new("c1"));
        let json: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "request_sync");
        assert_eq!(json["payload"]["deviceType"], "mobile");
        assert_eq!(json["payload"]["connectionId"], "c1");
    }

    #[test]
    fn test_connected_wire_format() {
        let msg = ServerMessage::connected(
            ConnectionId::new("c1"),
            UserId::new("u1"),
            DeviceType::Desktop,
        );
        let json: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "connected",
                "payload": {"connectionId": "c1", "userId": "u1", "deviceType": "desktop"}
            })
        );
    }

    #[test]
    fn test_server_presence_decodes_on_client() {
        let snapshot = PresenceSnapshot::compute(
            SessionId::new("s1"),
            vec![PresenceEntry::new(
                UserId::new("u1"),
                DeviceType::Mobile,
                ConnectionId::new("c1"),
            )],
        );
        let text = ServerMessage::presence(snapshot.clone()).encode().unwrap();
        assert_eq!(ServerMessage::decode(&text).unwrap(), ServerMessage::Presence(snapshot));
    }

    #[test]
    fn test_error_omits_missing_code() {
        let text = ServerMessage::error("userId is required").encode().unwrap();
        assert!(text.contains("\"type\":\"error\""));
        assert!(!text.contains("code"));

        let text = ServerMessage::error_with_code("nope", "identity_required")
            .encode()
            .unwrap();
        assert!(text.contains("\"code\":\"identity_required\""));
    }

    #[test]
    fn test_client_join_encoding() {
        let text = ClientMessage::join("conduct-42").encode().unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json, json!({"type":"join","payload":{"sessionId":"conduct-42"}}));

        let text = ClientMessage::Heartbeat.encode().unwrap();
        assert_eq!(text, r#"{"type":"heartbeat"}"#);
    }
}
