// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Error types.
//!
//! [`MessagingError`] is the Rust-side error; [`ErrorValue`] is the
//! structured error object carried in a response's `error` field.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const ERROR_TYPE_BASE: &str = "https://hiveot.net/errors/";

/// Structured wire error: `{status, type, title, detail}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub status: u16,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl ErrorValue {
    /// Create an error value; `kind` is the last URI segment of the type.
    pub fn new(status: u16, kind: &str, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind: format!("{}{}", ERROR_TYPE_BASE, kind),
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(400, "bad-request", "bad request", detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(401, "unauthorized", "unauthorized", detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(403, "forbidden", "forbidden", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(404, "not-found", "not found", detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(409, "conflict", "conflict", detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(500, "internal", "internal error", detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(503, "unavailable", "agent offline", detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(504, "timeout", "timeout", detail)
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{} {}", self.status, self.title)
        } else {
            write!(f, "{} {}: {}", self.status, self.title, self.detail)
        }
    }
}

/// Messaging errors.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("not connected")]
    NotConnected,

    #[error("connection lost")]
    ConnectionLost,

    #[error("timeout. No response")]
    Timeout,

    #[error("correlation ID '{0}' is already open")]
    DuplicateCorrelation(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    /// Error returned by the remote side in a response.
    #[error("{0}")]
    Remote(ErrorValue),
}

impl MessagingError {
    /// Map onto the wire error object.
    pub fn to_error_value(&self) -> ErrorValue {
        match self {
            MessagingError::NotConnected | MessagingError::ConnectionLost => {
                ErrorValue::unavailable(self.to_string())
            }
            MessagingError::Timeout => ErrorValue::timeout(self.to_string()),
            MessagingError::DuplicateCorrelation(_) => ErrorValue::conflict(self.to_string()),
            MessagingError::InvalidMessage(_) | MessagingError::Json(_) => {
                ErrorValue::bad_request(self.to_string())
            }
            MessagingError::Unauthorized(_) => ErrorValue::unauthorized(self.to_string()),
            MessagingError::Transport(_) => ErrorValue::internal(self.to_string()),
            MessagingError::Remote(err) => err.clone(),
        }
    }
}

impl From<&MessagingError> for ErrorValue {
    fn from(err: &MessagingError) -> Self {
        err.to_error_value()
    }
}

/// Result alias for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_value_shape() {
        let err = ErrorValue::unavailable("agent 'a1' offline");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["status"], 503);
        assert_eq!(v["type"], "https://hiveot.net/errors/unavailable");
        assert_eq!(v["title"], "agent offline");
        assert_eq!(v["detail"], "agent 'a1' offline");
        assert_eq!(err.to_string(), "503 agent offline: agent 'a1' offline");
    }

    #[test]
    fn test_messaging_error_mapping() {
        assert_eq!(MessagingError::Timeout.to_error_value().status, 504);
        assert_eq!(MessagingError::ConnectionLost.to_error_value().status, 503);
        assert_eq!(
            MessagingError::InvalidMessage("x".into()).to_error_value().status,
            400
        );
        let remote = ErrorValue::forbidden("no");
        assert_eq!(MessagingError::Remote(remote.clone()).to_error_value(), remote);
    }
}
