//! The envelope framing every message on the command channel.
//!
//! Each WebSocket text frame carries exactly one JSON envelope:
//!
//! ```json
//! {"type": "request", "id": "<token>", "uri": "ssap://...", "payload": {...}}
//! ```
//!
//! `id` is a caller-chosen token the device echoes back on replies; the
//! session layer uses it to correlate responses with outstanding requests.
//! `uri` and `payload` are omitted entirely when absent - the device rejects
//! explicit nulls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One protocol message unit exchanged over the connection.
///
/// Immutable once constructed. `kind` is an open set: the constants below
/// cover the kinds the session layer interprets, anything else passes
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind, serialized as `type` on the wire.
    #[serde(rename = "type")]
    pub kind: String,
    /// Unique-per-outstanding-request token, echoed back by the device.
    pub id: String,
    /// Service selector (e.g. `ssap://audio/getVolume`), absent on
    /// registration and reply envelopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Arbitrary nested payload, shape owned by the individual command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Kind of the outgoing pairing request.
    pub const REGISTER: &str = "register";
    /// Kind of the reply that grants a client key.
    pub const REGISTERED: &str = "registered";
    /// Kind of a generic command request.
    pub const REQUEST: &str = "request";
    /// Kind of a generic command response.
    pub const RESPONSE: &str = "response";
    /// Kind of a device-reported error reply.
    pub const ERROR: &str = "error";

    /// Builds an envelope with all fields supplied by the caller.
    pub fn new(
        kind: impl Into<String>,
        id: impl Into<String>,
        uri: Option<String>,
        payload: Option<Value>,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            uri,
            payload,
        }
    }

    /// True if this envelope is of the given kind.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_omitted() {
        let envelope = Envelope::new("register", "id-1", None, None);
        let json = serde_json::to_string(&envelope).unwrap();

        assert!(json.contains(r#""type":"register""#));
        assert!(json.contains(r#""id":"id-1""#));
        assert!(!json.contains("uri"));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn full_envelope_round_trips() {
        let envelope = Envelope::new(
            "request",
            "id-2",
            Some("ssap://audio/getVolume".to_string()),
            Some(serde_json::json!({"subscribe": false})),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn decodes_device_reply() {
        let json = r#"{"type":"response","id":"abc","payload":{"returnValue":true}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();

        assert!(envelope.is_kind(Envelope::RESPONSE));
        assert_eq!(envelope.id, "abc");
        assert!(envelope.uri.is_none());
        assert_eq!(envelope.payload.unwrap()["returnValue"], true);
    }
}
