// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Wire encoding of envelopes.
//!
//! Each binding owns a [`MessageConverter`] translating between its wire
//! representation and the three envelope kinds. [`JsonConverter`] is the plain
//! JSON text form with a top-level `messageType` selector, used by the
//! WebSocket binding and as payload encoding by the others.

use crate::envelope::{
    Envelope, NotificationMessage, RequestMessage, ResponseMessage, MSG_TYPE_NOTIFICATION,
    MSG_TYPE_REQUEST, MSG_TYPE_RESPONSE,
};
use crate::error::MessagingError;
use serde_json::Value;

/// Encoder/decoder between a binding's wire form and envelopes.
pub trait MessageConverter: Send + Sync {
    /// Wire representation of one message.
    type Wire;

    fn encode_request(&self, req: &RequestMessage) -> Result<Self::Wire, MessagingError>;
    fn decode_request(&self, wire: &Self::Wire) -> Result<RequestMessage, MessagingError>;

    fn encode_response(&self, resp: &ResponseMessage) -> Result<Self::Wire, MessagingError>;
    fn decode_response(&self, wire: &Self::Wire) -> Result<ResponseMessage, MessagingError>;

    fn encode_notification(
        &self,
        notif: &NotificationMessage,
    ) -> Result<Self::Wire, MessagingError>;
    fn decode_notification(
        &self,
        wire: &Self::Wire,
    ) -> Result<NotificationMessage, MessagingError>;

    /// Decode a message whose kind is not known up front.
    ///
    /// Messages whose kind cannot be determined are rejected.
    fn decode(&self, wire: &Self::Wire) -> Result<Envelope, MessagingError>;

    fn encode(&self, envelope: &Envelope) -> Result<Self::Wire, MessagingError> {
        match envelope {
            Envelope::Request(req) => self.encode_request(req),
            Envelope::Response(resp) => self.encode_response(resp),
            Envelope::Notification(notif) => self.encode_notification(notif),
        }
    }
}

/// JSON text with a `messageType` field selecting the envelope kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl JsonConverter {
    /// Decode JSON bytes, selecting the envelope by `messageType`.
    pub fn decode_bytes(&self, raw: &[u8]) -> Result<Envelope, MessagingError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| MessagingError::InvalidMessage(format!("invalid JSON: {}", e)))?;
        decode_value(value)
    }
}

/// Decode a JSON value selecting the envelope kind by `messageType`.
pub fn decode_value(value: Value) -> Result<Envelope, MessagingError> {
    let kind = value
        .get("messageType")
        .and_then(Value::as_str)
        .ok_or_else(|| MessagingError::InvalidMessage("missing messageType".into()))?
        .to_string();
    let envelope = match kind.as_str() {
        MSG_TYPE_REQUEST => Envelope::Request(serde_json::from_value(value)?),
        MSG_TYPE_RESPONSE => Envelope::Response(serde_json::from_value(value)?),
        MSG_TYPE_NOTIFICATION => Envelope::Notification(serde_json::from_value(value)?),
        other => {
            return Err(MessagingError::InvalidMessage(format!(
                "unknown messageType '{}'",
                other
            )))
        }
    };
    Ok(envelope)
}

fn expect_kind(envelope: Envelope, kind: &str) -> Result<Envelope, MessagingError> {
    if envelope.message_type() == kind {
        Ok(envelope)
    } else {
        Err(MessagingError::InvalidMessage(format!(
            "expected {} but got {}",
            kind,
            envelope.message_type()
        )))
    }
}

impl MessageConverter for JsonConverter {
    type Wire = String;

    fn encode_request(&self, req: &RequestMessage) -> Result<String, MessagingError> {
        Ok(serde_json::to_string(req)?)
    }

    fn decode_request(&self, wire: &String) -> Result<RequestMessage, MessagingError> {
        match expect_kind(self.decode(wire)?, MSG_TYPE_REQUEST)? {
            Envelope::Request(req) => Ok(req),
            _ => Err(MessagingError::InvalidMessage("not a request".into())),
        }
    }

    fn encode_response(&self, resp: &ResponseMessage) -> Result<String, MessagingError> {
        Ok(serde_json::to_string(resp)?)
    }

    fn decode_response(&self, wire: &String) -> Result<ResponseMessage, MessagingError> {
        match expect_kind(self.decode(wire)?, MSG_TYPE_RESPONSE)? {
            Envelope::Response(resp) => Ok(resp),
            _ => Err(MessagingError::InvalidMessage("not a response".into())),
        }
    }

    fn encode_notification(&self, notif: &NotificationMessage) -> Result<String, MessagingError> {
        Ok(serde_json::to_string(notif)?)
    }

    fn decode_notification(&self, wire: &String) -> Result<NotificationMessage, MessagingError> {
        match expect_kind(self.decode(wire)?, MSG_TYPE_NOTIFICATION)? {
            Envelope::Notification(notif) => Ok(notif),
            _ => Err(MessagingError::InvalidMessage("not a notification".into())),
        }
    }

    fn decode(&self, wire: &String) -> Result<Envelope, MessagingError> {
        self.decode_bytes(wire.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::op;
    use serde_json::json;

    #[test]
    fn test_decode_selects_kind() {
        let conv = JsonConverter;
        let notif = NotificationMessage::new(op::SUBSCRIBE_EVENT, "dtw:a:t", "temp", json!(42));
        let text = conv.encode_notification(&notif).unwrap();
        match conv.decode(&text).unwrap() {
            Envelope::Notification(n) => assert_eq!(n, notif),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_message_type_rejected() {
        let conv = JsonConverter;
        let err = conv
            .decode(&r#"{"operation":"invokeaction","thingID":"t"}"#.to_string())
            .unwrap_err();
        assert!(matches!(err, MessagingError::InvalidMessage(_)));
        assert_eq!(err.to_error_value().status, 400);
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let conv = JsonConverter;
        let err = conv
            .decode(&r#"{"messageType":"event","operation":"x"}"#.to_string())
            .unwrap_err();
        assert!(matches!(err, MessagingError::InvalidMessage(_)));
    }

    #[test]
    fn test_typed_decode_rejects_other_kind() {
        let conv = JsonConverter;
        let req = RequestMessage::new(op::PING, "", "", json!(null));
        let text = conv.encode_request(&req).unwrap();
        assert!(conv.decode_response(&text).is_err());
        assert_eq!(conv.decode_request(&text).unwrap(), req);
    }
}
