// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HTTP-basic binding with an SSE return channel.
//!
//! Requests are plain HTTP calls on `/things/{op}/{thingID}[/{name}]` or full
//! envelopes posted on `/hiveot/request`. Clients that need responses and
//! notifications delivered asynchronously open an SSE stream and send its
//! connection ID in the `X-CID` header of later calls.

pub mod client;
pub mod server;
pub mod sse;

pub use client::HttpClientConnection;
pub use server::{router, HttpServer};
pub use sse::SseConnection;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hiveot_messaging::ErrorValue;

/// Header carrying the correlation ID of a request.
pub const CORRELATION_ID_HEADER: &str = "X-CorrelationID";
/// Header carrying the connection ID of the caller's SSE stream.
pub const CONNECTION_ID_HEADER: &str = "X-CID";

pub const LOGIN_PATH: &str = "/authn/login";
pub const REFRESH_PATH: &str = "/authn/refresh";
pub const LOGOUT_PATH: &str = "/authn/logout";
pub const PING_PATH: &str = "/ping";
pub const REQUEST_PATH: &str = "/hiveot/request";
pub const RESPONSE_PATH: &str = "/hiveot/response";
pub const NOTIFICATION_PATH: &str = "/hiveot/notification";

/// SSE event sent once when a stream opens. Its data is the connection ID.
pub const SSE_PING_EVENT: &str = "sseping";

/// Token of an `Authorization: Bearer` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Error reply with the wire error object as body.
#[derive(Debug)]
pub struct HttpError(pub ErrorValue);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

impl From<ErrorValue> for HttpError {
    fn from(err: ErrorValue) -> Self {
        Self(err)
    }
}
