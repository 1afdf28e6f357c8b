// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! WebSocket binding.
//!
//! One duplex stream per session; every text frame is one JSON envelope
//! whose `messageType` selects the decoder.

pub mod client;
pub mod server;

pub use client::WssClientConnection;
pub use server::{router, WssConnection};

use hiveot_messaging::{ErrorValue, MessagingError, RequestMessage, ResponseMessage};
use serde_json::Value;

/// Build a 400 response for a request frame that failed to decode, if the
/// frame at least identifies itself as a request with a correlation ID.
pub(crate) fn reject_malformed(raw: &[u8], err: &MessagingError) -> Option<ResponseMessage> {
    let value: Value = serde_json::from_slice(raw).ok()?;
    if value.get("messageType").and_then(Value::as_str) != Some("request") {
        return None;
    }
    let cid = value.get("correlationID").and_then(Value::as_str)?;
    let operation = value
        .get("operation")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let req = RequestMessage::new(operation, "", "", Value::Null).with_correlation_id(cid);
    Some(req.create_error_response(ErrorValue::bad_request(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_malformed_request() {
        let raw = br#"{"messageType":"request","operation":7,"correlationID":"c9"}"#;
        let err = MessagingError::InvalidMessage("bad operation".into());
        let resp = reject_malformed(raw, &err).unwrap();
        assert_eq!(resp.correlation_id, "c9");
        assert_eq!(resp.error.map(|e| e.status), Some(400));

        assert!(reject_malformed(b"not json", &err).is_none());
        assert!(reject_malformed(br#"{"messageType":"notification"}"#, &err).is_none());
    }
}
