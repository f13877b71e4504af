//! Protocol messages.
//!
//! Every frame is a JSON object `{id, type, payload}`. Inbound frames decode
//! into [`ClientMessage`], a closed set of the recognized operation types with
//! an `Unknown` fallback. Outbound frames are built as [`ServerMessage`] and
//! always go through [`encode`].

use crate::OperationId;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Values of the `type` field.
pub mod kind {
    pub const CONNECTION_INIT: &str = "connection_init";
    pub const CONNECTION_ACK: &str = "connection_ack";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const CONNECTION_TERMINATE: &str = "connection_terminate";
    pub const KEEP_ALIVE: &str = "ka";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const DATA: &str = "data";
    pub const ERROR: &str = "error";
    pub const COMPLETE: &str = "complete";
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Handshake carrying optional connection parameters.
    ConnectionInit { payload: Option<Value> },
    /// Begin an operation. The payload is validated by the handler, not here.
    Start {
        id: Option<OperationId>,
        payload: Option<Value>,
    },
    /// End an operation early.
    Stop { id: Option<OperationId> },
    /// Close the whole connection.
    ConnectionTerminate,
    /// Any `type` this protocol does not know, including a missing one.
    Unknown {
        id: Option<OperationId>,
        kind: Option<String>,
    },
}

impl ClientMessage {
    /// The id replies to this message should carry.
    pub fn id(&self) -> Option<&OperationId> {
        match self {
            Self::Start { id, .. } | Self::Stop { id } | Self::Unknown { id, .. } => id.as_ref(),
            Self::ConnectionInit { .. } | Self::ConnectionTerminate => None,
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConnectionAck,
    ConnectionError { message: String },
    KeepAlive,
    Data { id: OperationId, payload: Value },
    Error {
        id: Option<OperationId>,
        payload: String,
    },
    Complete { id: OperationId },
}

impl ServerMessage {
    pub fn data(id: OperationId, payload: Value) -> Self {
        Self::Data { id, payload }
    }

    pub fn error(id: Option<OperationId>, payload: impl Into<String>) -> Self {
        Self::Error {
            id,
            payload: payload.into(),
        }
    }

    pub fn complete(id: OperationId) -> Self {
        Self::Complete { id }
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAck => kind::CONNECTION_ACK,
            Self::ConnectionError { .. } => kind::CONNECTION_ERROR,
            Self::KeepAlive => kind::KEEP_ALIVE,
            Self::Data { .. } => kind::DATA,
            Self::Error { .. } => kind::ERROR,
            Self::Complete { .. } => kind::COMPLETE,
        }
    }
}

#[derive(Serialize)]
struct ConnectionErrorPayload<'a> {
    message: &'a str,
}

// Field order is part of the wire format: id, type, payload.
impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Self::ConnectionAck | Self::KeepAlive => {
                map.serialize_entry("type", self.kind())?;
            }
            Self::ConnectionError { message } => {
                map.serialize_entry("type", self.kind())?;
                map.serialize_entry("payload", &ConnectionErrorPayload { message })?;
            }
            Self::Data { id, payload } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("type", self.kind())?;
                map.serialize_entry("payload", payload)?;
            }
            Self::Error { id, payload } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("type", self.kind())?;
                map.serialize_entry("payload", payload)?;
            }
            Self::Complete { id } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("type", self.kind())?;
            }
        }
        map.end()
    }
}

/// The payload of a `start` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Query text or a pre-parsed document.
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl OperationRequest {
    /// Interpret a `start` payload.
    ///
    /// Returns `Ok(None)` when there is nothing to run: the payload is absent,
    /// not an object, or has no `query`.
    pub fn from_payload(payload: Option<Value>) -> Result<Option<Self>, serde_json::Error> {
        let Some(payload @ Value::Object(_)) = payload else {
            return Ok(None);
        };
        let request: Self = serde_json::from_value(payload)?;
        Ok(request.query.is_some().then_some(request))
    }

    /// The query as text, when it was sent as a string.
    pub fn query_str(&self) -> Option<&str> {
        self.query.as_ref().and_then(Value::as_str)
    }
}

/// Error decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Message must be a JSON string")]
    NotJson,
}

/// Decode one inbound frame.
///
/// Anything that is not a JSON object is rejected before `type` is looked at.
/// An object with a missing or unrecognized `type` decodes to
/// [`ClientMessage::Unknown`] so the caller can still reply with its id.
pub fn decode(raw: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| DecodeError::NotJson)?;
    let Value::Object(mut fields) = value else {
        return Err(DecodeError::NotJson);
    };

    let id = fields.get("id").and_then(OperationId::from_json);
    let payload = fields.remove("payload").filter(|p| !p.is_null());
    let Some(Value::String(type_name)) = fields.remove("type") else {
        return Ok(ClientMessage::Unknown { id, kind: None });
    };

    Ok(match type_name.as_str() {
        kind::CONNECTION_INIT => ClientMessage::ConnectionInit { payload },
        kind::START => ClientMessage::Start { id, payload },
        kind::STOP => ClientMessage::Stop { id },
        kind::CONNECTION_TERMINATE => ClientMessage::ConnectionTerminate,
        _ => ClientMessage::Unknown {
            id,
            kind: Some(type_name),
        },
    })
}

/// Encode one outbound frame.
pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_non_json() {
        assert_eq!(decode("invalid json string"), Err(DecodeError::NotJson));
        assert_eq!(
            DecodeError::NotJson.to_string(),
            "Message must be a JSON string"
        );
    }

    #[test]
    fn rejects_json_that_is_not_an_object() {
        assert_eq!(decode("42"), Err(DecodeError::NotJson));
        assert_eq!(decode("[1, \"start\"]"), Err(DecodeError::NotJson));
        assert_eq!(decode("\"start\""), Err(DecodeError::NotJson));
    }

    #[test]
    fn decodes_start_with_payload() {
        let msg = decode(r#"{"id":1,"type":"start","payload":{"query":"subscription { a }"}}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Start {
                id: Some(OperationId::from(1u64)),
                payload: Some(json!({"query": "subscription { a }"})),
            }
        );
    }

    #[test]
    fn unknown_type_keeps_id() {
        let msg = decode(r#"{"id":"x","type":"invalid-type","payload":{}}"#).unwrap();
        assert_eq!(msg.id(), Some(&OperationId::from("x")));
        assert!(matches!(msg, ClientMessage::Unknown { kind: Some(k), .. } if k == "invalid-type"));

        let msg = decode(r#"{"id":2}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Unknown {
                id: Some(OperationId::from(2u64)),
                kind: None
            }
        );
    }

    #[test]
    fn terminate_and_init() {
        assert_eq!(
            decode(r#"{"id":1,"type":"connection_terminate"}"#).unwrap(),
            ClientMessage::ConnectionTerminate
        );
        assert_eq!(
            decode(r#"{"type":"connection_init","payload":{"token":"t"}}"#).unwrap(),
            ClientMessage::ConnectionInit {
                payload: Some(json!({"token": "t"}))
            }
        );
    }

    #[test]
    fn encodes_in_wire_field_order() {
        let err = ServerMessage::error(Some(1u64.into()), "Invalid payload type");
        assert_eq!(
            encode(&err).unwrap(),
            r#"{"id":1,"type":"error","payload":"Invalid payload type"}"#
        );

        let err = ServerMessage::error(None, "Message must be a JSON string");
        assert_eq!(
            encode(&err).unwrap(),
            r#"{"id":null,"type":"error","payload":"Message must be a JSON string"}"#
        );

        let data = ServerMessage::data("a".into(), json!({"data": {"n": 1}}));
        assert_eq!(
            encode(&data).unwrap(),
            r#"{"id":"a","type":"data","payload":{"data":{"n":1}}}"#
        );

        assert_eq!(
            encode(&ServerMessage::complete(3u64.into())).unwrap(),
            r#"{"id":3,"type":"complete"}"#
        );
        assert_eq!(
            encode(&ServerMessage::ConnectionAck).unwrap(),
            r#"{"type":"connection_ack"}"#
        );
        assert_eq!(encode(&ServerMessage::KeepAlive).unwrap(), r#"{"type":"ka"}"#);
        assert_eq!(
            encode(&ServerMessage::ConnectionError {
                message: "Forbidden".into()
            })
            .unwrap(),
            r#"{"type":"connection_error","payload":{"message":"Forbidden"}}"#
        );
    }

    #[test]
    fn start_payload_without_query_is_nothing_to_run() {
        assert_eq!(OperationRequest::from_payload(None).unwrap(), None);
        assert_eq!(OperationRequest::from_payload(Some(json!({}))).unwrap(), None);
        assert_eq!(
            OperationRequest::from_payload(Some(json!({"query": null}))).unwrap(),
            None
        );
        assert_eq!(
            OperationRequest::from_payload(Some(json!("subscription { a }"))).unwrap(),
            None
        );
    }

    #[test]
    fn start_payload_fields() {
        let request = OperationRequest::from_payload(Some(json!({
            "query": "subscription { onMessage }",
            "variables": {"room": "lobby"},
            "operationName": "OnMessage"
        })))
        .unwrap()
        .unwrap();
        assert_eq!(request.query_str(), Some("subscription { onMessage }"));
        assert_eq!(request.operation_name.as_deref(), Some("OnMessage"));
        assert_eq!(request.variables, Some(json!({"room": "lobby"})));

        assert!(OperationRequest::from_payload(Some(json!({"query": "q", "operationName": 5}))).is_err());
    }
}
