// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! MQTT 5 client connection to the hub broker.

use super::converter::MqttConverter;
use super::packet::{
    read_packet, reason, write_packet, Connect, Packet, Publish, Subscribe,
};
use super::{spawn_writer, PacketSender, CONNECT_TIMEOUT, DEFAULT_KEEP_ALIVE, WS_SUBPROTOCOL};
use crate::error::{Result, TransportError};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use hiveot_messaging::{
    new_id, protocol, Connection, ConnectionInfo, DispatchOptions, Dispatcher, HandlerSlots,
    LinkState, MessageConverter, MessagingError, NotificationMessage, ReplyFn, RequestMessage,
    ResponseMessage,
};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Client side of an MQTT session with the hub.
pub struct MqttClientConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    sender: PacketSender,
    converter: MqttConverter,
    dispatcher: Dispatcher,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MqttClientConnection {
    /// Connect over plain TCP, e.g. `127.0.0.1:8883`.
    pub async fn connect_tcp(addr: &str, client_id: &str, token: &str) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        Self::start(stream, client_id, token, addr).await
    }

    /// Connect over WebSocket, e.g. `ws://127.0.0.1:8884/mqtt`.
    pub async fn connect_ws(url: &str, client_id: &str, token: &str) -> Result<Arc<Self>> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WS_SUBPROTOCOL),
        );
        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        let (local, remote) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let (mut ws_tx, mut ws_rx) = ws.split();
            let (mut io_rx, mut io_tx) = tokio::io::split(remote);
            let inbound = async {
                while let Some(Ok(msg)) = ws_rx.next().await {
                    match msg {
                        Message::Binary(data) => {
                            if io_tx.write_all(&data).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                let _ = io_tx.shutdown().await;
            };
            let outbound = async {
                let mut chunk = vec![0u8; 16 * 1024];
                loop {
                    match io_rx.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if ws_tx
                                .send(Message::Binary(chunk[..n].to_vec()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                let _ = ws_tx.close().await;
            };
            tokio::select! {
                _ = inbound => {}
                _ = outbound => {}
            }
        });
        Self::start(local, client_id, token, url).await
    }

    async fn start<S>(stream: S, client_id: &str, token: &str, remote: &str) -> Result<Arc<Self>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection_id = format!("MQTT-{}", &new_id()[..8]);
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buf = BytesMut::new();

        let mut connect = Connect::new(&connection_id, DEFAULT_KEEP_ALIVE);
        connect.username = Some(client_id.to_string());
        connect.password = Some(Bytes::from(token.to_string()));
        write_packet(&mut writer, &Packet::Connect(connect)).await?;

        let ack = tokio::time::timeout(CONNECT_TIMEOUT, read_packet(&mut reader, &mut buf))
            .await
            .map_err(|_| TransportError::Protocol("no CONNACK received".into()))??;
        match ack {
            Some(Packet::ConnAck(ack)) if ack.reason_code == reason::SUCCESS => {}
            Some(Packet::ConnAck(ack)) => {
                return Err(TransportError::Unauthorized(format!(
                    "connect refused with reason 0x{:02X}",
                    ack.reason_code
                )))
            }
            _ => return Err(TransportError::Protocol("expected CONNACK".into())),
        }

        let mut info = ConnectionInfo::new(connection_id.clone(), client_id, protocol::MQTT);
        info.remote_addr = remote.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        // detached; it ends after flushing once the queue is closed
        spawn_writer(writer, rx, connection_id.clone());

        let conn = Arc::new_cyclic(|me: &Weak<Self>| {
            let handlers = Arc::new(HandlerSlots::default());
            let me = me.clone();
            let reply: ReplyFn = Arc::new(move |resp| match me.upgrade() {
                Some(conn) => conn.send_response(resp),
                None => Err(MessagingError::NotConnected),
            });
            let dispatcher = Dispatcher::spawn(
                info.clone(),
                handlers.clone(),
                reply,
                DispatchOptions::default(),
            );
            Self {
                converter: MqttConverter::for_client(&info.connection_id, &info.client_id),
                info,
                handlers,
                state: LinkState::new(true),
                sender: PacketSender::new(tx),
                dispatcher,
                tasks: Mutex::new(Vec::new()),
            }
        });

        conn.sender.send(Packet::Subscribe(Subscribe {
            packet_id: conn.sender.packet_id(),
            filters: vec![(conn.converter.inbox().to_string(), 1)],
        }))?;

        let weak = Arc::downgrade(&conn);
        let reader_task = tokio::spawn(async move {
            loop {
                let packet = match read_packet(&mut reader, &mut buf).await {
                    Ok(Some(packet)) => packet,
                    Ok(None) => break,
                    Err(e) => {
                        debug!("MQTT read failed: {}", e);
                        break;
                    }
                };
                let Some(conn) = weak.upgrade() else { break };
                if !conn.handle_packet(packet) {
                    break;
                }
            }
            if let Some(conn) = weak.upgrade() {
                conn.close(Some(MessagingError::ConnectionLost));
            }
        });

        let weak = Arc::downgrade(&conn);
        let ping_task = tokio::spawn(async move {
            let period = Duration::from_secs(u64::from(DEFAULT_KEEP_ALIVE) / 2);
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(conn) = weak.upgrade() else { break };
                if conn.sender.send(Packet::PingReq).is_err() {
                    break;
                }
            }
        });

        conn.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([reader_task, ping_task]);
        info!("[{}] MQTT connected to {} as '{}'", connection_id, remote, client_id);
        Ok(conn)
    }

    fn handle_packet(&self, packet: Packet) -> bool {
        match packet {
            Packet::Publish(publish) => {
                self.handle_publish(publish);
                true
            }
            Packet::PingResp | Packet::PubAck { .. } | Packet::SubAck(_) | Packet::UnsubAck(_) => {
                true
            }
            Packet::Disconnect { reason_code } => {
                debug!(
                    "[{}] hub disconnected with reason 0x{:02X}",
                    self.info.connection_id, reason_code
                );
                false
            }
            other => {
                warn!("[{}] unexpected packet {:?}", self.info.connection_id, other);
                true
            }
        }
    }

    fn handle_publish(&self, publish: Publish) {
        if let Some(packet_id) = publish.packet_id {
            let _ = self.sender.send(Packet::PubAck {
                packet_id,
                reason_code: reason::SUCCESS,
            });
        }
        match self.converter.decode(&publish) {
            Ok(envelope) => {
                let _ = self.dispatcher.dispatch(envelope);
            }
            Err(e) => warn!(
                "[{}] dropped publish on '{}': {}",
                self.info.connection_id, publish.topic, e
            ),
        }
    }

    fn close(&self, err: Option<MessagingError>) {
        if self.state.mark_disconnected() {
            self.sender.close();
            self.tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .for_each(|task| task.abort());
            info!("[{}] MQTT connection closed", self.info.connection_id);
            self.handlers.notify_connect(false, err.as_ref(), &self.info);
        }
    }
}

impl Connection for MqttClientConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn send_request(&self, req: RequestMessage) -> std::result::Result<(), MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        self.sender.publish(self.converter.encode_request(&req)?)
    }

    fn send_response(&self, resp: ResponseMessage) -> std::result::Result<(), MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        self.sender.publish(self.converter.encode_response(&resp)?)
    }

    fn send_notification(
        &self,
        notif: NotificationMessage,
    ) -> std::result::Result<(), MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::NotConnected);
        }
        self.sender
            .publish(self.converter.encode_notification(&notif)?)
    }

    fn disconnect(&self) {
        if self.is_connected() {
            let _ = self.sender.send(Packet::Disconnect {
                reason_code: reason::SUCCESS,
            });
        }
        self.close(None);
    }

    fn handlers(&self) -> &HandlerSlots {
        &self.handlers
    }
}
