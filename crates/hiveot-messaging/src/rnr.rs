// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Request-and-response correlation channels.
//!
//! A registry mapping correlation IDs to single-slot response channels. A
//! caller opens a slot before sending a request and waits on it; the response
//! path hands incoming responses to [`RnrChannels::handle_response`], which
//! completes the slot if one is open.

use crate::envelope::ResponseMessage;
use crate::error::MessagingError;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default bound on delivering a response into an open slot.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Receiving side of a correlation slot.
pub type RnrReceiver = mpsc::Receiver<ResponseMessage>;

/// Correlation ID to response-slot registry.
pub struct RnrChannels {
    channels: Mutex<HashMap<String, mpsc::Sender<ResponseMessage>>>,
    write_timeout: Duration,
}

impl Default for RnrChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl RnrChannels {
    pub fn new() -> Self {
        Self::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }

    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            write_timeout,
        }
    }

    /// Open a slot for the correlation ID.
    ///
    /// Fails if a slot with the same ID is already open.
    pub fn open(&self, correlation_id: &str) -> Result<RnrReceiver, MessagingError> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels.contains_key(correlation_id) {
            return Err(MessagingError::DuplicateCorrelation(
                correlation_id.to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(1);
        channels.insert(correlation_id.to_string(), tx);
        Ok(rx)
    }

    /// Deliver a response to its waiting slot.
    ///
    /// Returns true if a slot was open for the response's correlation ID. The
    /// slot is consumed; a second response with the same ID finds no slot.
    pub async fn handle_response(&self, resp: ResponseMessage) -> bool {
        let sender = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels.remove(&resp.correlation_id)
        };
        let Some(sender) = sender else {
            return false;
        };
        let cid = resp.correlation_id.clone();
        if let Err(e) = sender.send_timeout(resp, self.write_timeout).await {
            warn!("RnR: response for '{}' dropped: {}", cid, e);
        } else {
            debug!("RnR: response for '{}' delivered", cid);
        }
        true
    }

    /// Close a slot, releasing any waiter with no response.
    pub fn close(&self, correlation_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.remove(correlation_id);
    }

    /// Close every open slot.
    pub fn close_all(&self) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if !channels.is_empty() {
            debug!("RnR: closing {} open channels", channels.len());
        }
        channels.clear();
    }

    /// True if a slot is open for the correlation ID.
    pub fn is_open(&self, correlation_id: &str) -> bool {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.contains_key(correlation_id)
    }

    /// Number of open slots.
    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for the slot to fire.
    ///
    /// Returns None on timeout or when the slot was closed.
    pub async fn wait_for_response(
        rx: &mut RnrReceiver,
        timeout: Duration,
    ) -> Option<ResponseMessage> {
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(resp) => resp,
            Err(_) => None,
        }
    }
}
