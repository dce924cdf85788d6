//! Logical frames exchanged on a relay session.
//!
//! Frames are JSON text. The server sends [`OutboundFrame`]s and receives
//! [`InboundRequest`]s:
//!
//! ```text
//! -> {"request_type": "enqueue_request", "message_id": "..", "target_user_id": 7, "data": {..}}
//! <- {"msg_type": "response", "data": {"ok": true, "application_status_code": 0, ..}}
//! <- {"msg_type": "data", "data": {"data_type": "request", "request_uuid": "..", ..}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{MessageKind, PrincipalId, RelayMessage, TypesError};

/// A frame sent from the server to a connected principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", content = "data", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A relayed message.
    Data(DataFrame),
    /// Acknowledgement or error for an inbound request.
    Response(ResponseFrame),
}

impl OutboundFrame {
    /// Encode as JSON text.
    pub fn to_json(&self) -> Result<String, TypesError> {
        serde_json::to_string(self).map_err(TypesError::Frame)
    }

    /// Decode from JSON text.
    pub fn from_json(text: &str) -> Result<Self, TypesError> {
        serde_json::from_str(text).map_err(TypesError::Frame)
    }
}

/// Payload of a data frame. The recipient id is implied by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Request or response.
    pub data_type: MessageKind,
    /// Correlation id of the relayed message.
    pub request_uuid: String,
    /// Principal that published the message.
    pub sender_user_id: PrincipalId,
    /// Unix timestamp (seconds) when the message was created.
    pub created_at: i64,
    /// Opaque payload, unchanged.
    pub data: serde_json::Value,
}

impl From<RelayMessage> for DataFrame {
    fn from(msg: RelayMessage) -> Self {
        Self {
            data_type: msg.kind,
            request_uuid: msg.correlation_id,
            sender_user_id: msg.sender_id,
            created_at: msg.created_at,
            data: msg.data,
        }
    }
}

/// Structured outcome of a request, shared by HTTP responses and session acks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Application-level status code.
    pub application_status_code: u16,
    /// Human-readable message.
    pub message: String,
    /// Optional result payload.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ResponseFrame {
    /// A successful outcome.
    pub fn success(code: u16, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            ok: true,
            application_status_code: code,
            message: message.into(),
            data,
        }
    }

    /// A failed outcome with no payload.
    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            application_status_code: code,
            message: message.into(),
            data: None,
        }
    }
}

/// What an inbound request asks the relay to enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Enqueue a new request for the target.
    EnqueueRequest,
    /// Enqueue a response to an earlier request.
    EnqueueResponse,
}

impl RequestType {
    /// The relay message kind this request produces.
    pub fn kind(self) -> MessageKind {
        match self {
            RequestType::EnqueueRequest => MessageKind::Request,
            RequestType::EnqueueResponse => MessageKind::Response,
        }
    }
}

/// A relay write request received on a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRequest {
    /// Request or response.
    pub request_type: RequestType,
    /// Correlation id chosen by the sender.
    pub message_id: String,
    /// Recipient principal.
    pub target_user_id: PrincipalId,
    /// Opaque payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundRequest {
    /// Parse and validate an inbound frame.
    pub fn parse(text: &str) -> Result<Self, TypesError> {
        let request: Self = serde_json::from_str(text).map_err(TypesError::Frame)?;
        if request.message_id.trim().is_empty() {
            return Err(TypesError::InvalidData("message_id must not be empty".into()));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_frame_wire_shape() {
        let msg = RelayMessage {
            kind: MessageKind::Request,
            correlation_id: "x1".into(),
            sender_id: PrincipalId::new(3),
            recipient_id: PrincipalId::new(4),
            created_at: 1_705_000_000,
            data: json!({"k": "v"}),
        };
        let frame = OutboundFrame::Data(msg.into());

        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "msg_type": "data",
                "data": {
                    "data_type": "request",
                    "request_uuid": "x1",
                    "sender_user_id": 3,
                    "created_at": 1_705_000_000,
                    "data": {"k": "v"}
                }
            })
        );
    }

    #[test]
    fn response_frame_wire_shape() {
        let frame = OutboundFrame::Response(ResponseFrame::failure(400, "malformed"));

        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["msg_type"], "response");
        assert_eq!(value["data"]["ok"], false);
        assert_eq!(value["data"]["application_status_code"], 400);
        assert!(value["data"]["data"].is_null());
    }

    #[test]
    fn success_frame_carries_payload() {
        let frame = ResponseFrame::success(0, "enqueued", Some(json!({"message_id": "m-9"})));
        assert!(frame.ok);
        assert_eq!(frame.data, Some(json!({"message_id": "m-9"})));
    }

    #[test]
    fn inbound_request_parses() {
        let text = r#"{"request_type":"enqueue_response","message_id":"m-1","target_user_id":12,"data":{"n":1}}"#;
        let request = InboundRequest::parse(text).unwrap();

        assert_eq!(request.request_type, RequestType::EnqueueResponse);
        assert_eq!(request.request_type.kind(), MessageKind::Response);
        assert_eq!(request.target_user_id, PrincipalId::new(12));
        assert_eq!(request.data, json!({"n": 1}));
    }

    #[test]
    fn inbound_request_data_defaults_to_null() {
        let text = r#"{"request_type":"enqueue_request","message_id":"m-2","target_user_id":1}"#;
        let request = InboundRequest::parse(text).unwrap();
        assert!(request.data.is_null());
    }

    #[test]
    fn inbound_request_rejects_bad_input() {
        assert!(InboundRequest::parse("not json").is_err());
        assert!(InboundRequest::parse(r#"{"request_type":"enqueue_later","message_id":"m","target_user_id":1}"#).is_err());
        assert!(InboundRequest::parse(r#"{"request_type":"enqueue_request","target_user_id":1}"#).is_err());
        assert!(matches!(
            InboundRequest::parse(r#"{"request_type":"enqueue_request","message_id":" ","target_user_id":1}"#),
            Err(TypesError::InvalidData(_))
        ));
    }
}
