// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! MQTT 5 binding: an embedded broker for the hub and a client.
//!
//! The broker does not route between clients. Each client session is a hub
//! connection; the envelope kind is carried by the publish (see
//! [`converter`]) and subscriptions are managed with the subscription
//! operations like on every other binding.

pub mod broker;
pub mod client;
pub mod converter;
pub mod packet;
pub mod topics;

pub use broker::{MqttBroker, MqttConnection};
pub use client::MqttClientConnection;
pub use converter::MqttConverter;

use hiveot_messaging::MessagingError;
use packet::{write_packet, Packet, PacketError, Publish};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// WebSocket sub-protocol of MQTT over WebSocket.
pub const WS_SUBPROTOCOL: &str = "mqtt";

/// Time allowed between accepting a socket and receiving CONNECT.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Keep-alive requested by the client, in seconds.
pub const DEFAULT_KEEP_ALIVE: u16 = 30;

/// Outbound packet queue of a session, drained by a writer task.
pub(crate) struct PacketSender {
    tx: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    next_packet_id: AtomicU16,
}

impl PacketSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Packet>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            next_packet_id: AtomicU16::new(1),
        }
    }

    pub(crate) fn packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub(crate) fn send(&self, packet: Packet) -> Result<(), MessagingError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(packet).map_err(|_| MessagingError::ConnectionLost),
            None => Err(MessagingError::NotConnected),
        }
    }

    /// Queue a publish, assigning a packet ID for QoS 1.
    pub(crate) fn publish(&self, mut publish: Publish) -> Result<(), MessagingError> {
        if publish.qos > 0 {
            publish.packet_id = Some(self.packet_id());
        }
        self.send(Packet::Publish(publish))
    }

    /// Stop accepting packets. Queued packets are still written.
    pub(crate) fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Write queued packets until the queue closes, then shut the writer down.
pub(crate) fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    connection_id: String,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            match write_packet(&mut writer, &packet).await {
                Ok(()) => {}
                Err(e @ PacketError::FieldTooLong(_)) => {
                    warn!("[{}] MQTT packet dropped: {}", connection_id, e);
                }
                Err(e) => {
                    debug!("[{}] MQTT write failed: {}", connection_id, e);
                    break;
                }
            }
        }
        let _ = writer.shutdown().await;
    })
}
