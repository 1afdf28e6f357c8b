// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Store error type.

use hiveot_messaging::ErrorValue;
use thiserror::Error;

/// Errors of the digital-twin store and directory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown thing, affordance or value
    #[error("not found: {0}")]
    NotFound(String),

    /// Thing is owned by another agent
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed TD or request input
    #[error("invalid: {0}")]
    Invalid(String),

    /// Role may not use this directory operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Bucket backend failure
    #[error("bucket error: {0:#}")]
    Bucket(#[from] anyhow::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Wire error of this failure.
    pub fn to_error_value(&self) -> ErrorValue {
        match self {
            StoreError::NotFound(msg) => ErrorValue::not_found(msg.clone()),
            StoreError::Conflict(msg) => ErrorValue::conflict(msg.clone()),
            StoreError::Invalid(msg) => ErrorValue::bad_request(msg.clone()),
            StoreError::Forbidden(msg) => ErrorValue::forbidden(msg.clone()),
            StoreError::Json(e) => ErrorValue::bad_request(e.to_string()),
            StoreError::Bucket(e) => ErrorValue::internal(format!("{:#}", e)),
        }
    }
}

impl From<&StoreError> for ErrorValue {
    fn from(err: &StoreError) -> Self {
        err.to_error_value()
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
