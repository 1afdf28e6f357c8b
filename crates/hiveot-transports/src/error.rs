// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Transport error types.

use crate::mqtt::packet::PacketError;
use hiveot_messaging::{ErrorValue, MessagingError};
use thiserror::Error;

/// Errors raised by protocol bindings.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind error: {0}")]
    Bind(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] PacketError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

impl From<TransportError> for MessagingError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Messaging(inner) => inner,
            TransportError::Unauthorized(msg) => MessagingError::Unauthorized(msg),
            other => MessagingError::Transport(other.to_string()),
        }
    }
}

impl From<&TransportError> for ErrorValue {
    fn from(e: &TransportError) -> Self {
        match e {
            TransportError::Messaging(inner) => inner.to_error_value(),
            TransportError::Unauthorized(msg) => ErrorValue::unauthorized(msg.clone()),
            TransportError::Protocol(msg) => ErrorValue::bad_request(msg.clone()),
            other => ErrorValue::internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
