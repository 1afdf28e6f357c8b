// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! In-memory connection.
//!
//! An embedded connection is one end of a linked pair living in the same
//! process. Sending on one end dispatches on the other. The server end stamps
//! the sender ID and keeps subscription state like any network binding, so
//! tests exercise the same code paths without sockets.

use crate::connection::{
    protocol, Connection, ConnectionInfo, DispatchOptions, Dispatcher, HandlerSlots, LinkState,
    ReplyFn,
};
use crate::envelope::{Envelope, NotificationMessage, RequestMessage, ResponseMessage};
use crate::error::MessagingError;
use crate::subscriptions::Subscriptions;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::debug;
use uuid::Uuid;

/// One end of an in-memory connection pair.
pub struct EmbeddedConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    dispatcher: Dispatcher,
    peer: RwLock<Weak<EmbeddedConnection>>,
    subscriptions: Option<Arc<Subscriptions>>,
}

impl EmbeddedConnection {
    /// Create a linked pair and return `(client end, server end)`.
    ///
    /// Both ends share the connection info; the server end stamps the client
    /// ID on every inbound message.
    pub fn pair(client_id: &str, session_id: &str) -> (Arc<Self>, Arc<Self>) {
        let mut info = ConnectionInfo::new(
            format!("EMB-{}", &Uuid::new_v4().simple().to_string()[..8]),
            client_id,
            protocol::EMBEDDED,
        );
        info.session_id = session_id.to_string();
        info.remote_addr = "embedded".to_string();

        let client = Self::new_end(info.clone(), DispatchOptions::default());
        let server = Self::new_end(
            info,
            DispatchOptions {
                stamp_sender: Some(client_id.to_string()),
                subscriptions: Some(Arc::new(Subscriptions::new())),
            },
        );
        *client.peer.write().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(&server);
        *server.peer.write().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(&client);
        (client, server)
    }

    fn new_end(info: ConnectionInfo, options: DispatchOptions) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let handlers = Arc::new(HandlerSlots::default());
            let me = me.clone();
            let reply: ReplyFn = Arc::new(move |resp| match me.upgrade() {
                Some(conn) => conn.send_response(resp),
                None => Err(MessagingError::NotConnected),
            });
            let subscriptions = options.subscriptions.clone();
            let dispatcher = Dispatcher::spawn(info.clone(), handlers.clone(), reply, options);
            Self {
                info,
                handlers,
                state: LinkState::new(true),
                dispatcher,
                peer: RwLock::new(Weak::new()),
                subscriptions,
            }
        })
    }

    fn peer(&self) -> Option<Arc<EmbeddedConnection>> {
        self.peer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    fn deliver(&self, envelope: Envelope) -> Result<(), MessagingError> {
        if !self.state.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        let peer = self.peer().ok_or(MessagingError::ConnectionLost)?;
        if !peer.state.is_connected() {
            return Err(MessagingError::ConnectionLost);
        }
        peer.dispatcher.dispatch(envelope)
    }

    fn close(&self, err: Option<MessagingError>) {
        if self.state.mark_disconnected() {
            debug!(
                "[{}] embedded connection of '{}' closed",
                self.info.connection_id, self.info.client_id
            );
            self.handlers.notify_connect(false, err.as_ref(), &self.info);
        }
    }
}

impl Connection for EmbeddedConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn send_request(&self, req: RequestMessage) -> Result<(), MessagingError> {
        self.deliver(Envelope::Request(req))
    }

    fn send_response(&self, resp: ResponseMessage) -> Result<(), MessagingError> {
        self.deliver(Envelope::Response(resp))
    }

    fn send_notification(&self, notif: NotificationMessage) -> Result<(), MessagingError> {
        self.deliver(Envelope::Notification(notif))
    }

    fn disconnect(&self) {
        self.close(None);
        if let Some(peer) = self.peer() {
            peer.close(Some(MessagingError::ConnectionLost));
        }
    }

    fn handlers(&self) -> &HandlerSlots {
        &self.handlers
    }

    fn subscriptions(&self) -> Option<&Subscriptions> {
        self.subscriptions.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{connect_handler, notification_handler, request_handler};
    use crate::envelope::op;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_reaches_server_with_sender() {
        let (client, server) = EmbeddedConnection::pair("c1", "s1");
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        server.set_request_handler(request_handler(move |req, info| {
            let seen = seen2.clone();
            async move {
                *seen.lock().unwrap() = Some((req.sender_id.clone(), info.client_id));
                None
            }
        }));

        let mut req = RequestMessage::new(op::INVOKE_ACTION, "t", "a", json!(1));
        req.sender_id = "forged".into();
        client.send_request(req).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            Some(("c1".to_string(), "c1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_disconnect_notifies_both_ends_once() {
        let (client, server) = EmbeddedConnection::pair("c1", "s1");
        let lost = Arc::new(AtomicUsize::new(0));
        let lost2 = lost.clone();
        client.set_connect_handler(connect_handler(move |connected, err, _info| {
            assert!(!connected);
            assert!(err.is_some());
            lost2.fetch_add(1, Ordering::SeqCst);
        }));

        server.disconnect();
        server.disconnect();
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
        assert!(!server.is_connected());

        let notif = NotificationMessage::new(op::SUBSCRIBE_EVENT, "t", "e", json!(1));
        assert!(client.send_notification(notif.clone()).is_err());
        assert!(server.send_notification(notif).is_err());
    }

    #[tokio::test]
    async fn test_notification_delivery() {
        let (client, server) = EmbeddedConnection::pair("c1", "s1");
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        client.set_notification_handler(notification_handler(move |_n, _| {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let notif = NotificationMessage::new(op::SUBSCRIBE_EVENT, "t", "e", json!(1));
        server.send_notification(notif).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(server.subscriptions().is_some());
        assert!(client.subscriptions().is_none());
    }
}
