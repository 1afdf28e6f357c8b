// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Embedded MQTT 5 broker.
//!
//! Listens on plain TCP and on WebSocket (`/mqtt`, sub-protocol `mqtt`).
//! WebSocket sessions are bridged onto an in-memory byte stream so both
//! transports share one session loop.

use super::converter::MqttConverter;
use super::packet::{
    read_packet, reason, write_packet, Ack, ConnAck, Connect, Packet, Properties, Publish,
    PROTOCOL_LEVEL_V5,
};
use super::{spawn_writer, PacketSender, CONNECT_TIMEOUT, WS_SUBPROTOCOL};
use crate::error::{Result, TransportError};
use crate::server::{wait_for_shutdown, TransportContext};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use hiveot_messaging::{
    new_id, protocol, Connection, ConnectionInfo, DispatchOptions, Dispatcher, HandlerSlots,
    LinkState, MessageConverter, MessagingError, NotificationMessage, ReplyFn, RequestMessage,
    ResponseMessage, Subscriptions,
};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hub side of one MQTT client session.
pub struct MqttConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    sender: PacketSender,
    converter: MqttConverter,
    dispatcher: Dispatcher,
    subscriptions: Arc<Subscriptions>,
    closed: Notify,
}

impl MqttConnection {
    fn new(info: ConnectionInfo, tx: mpsc::UnboundedSender<Packet>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let handlers = Arc::new(HandlerSlots::default());
            let subscriptions = Arc::new(Subscriptions::new());
            let me = me.clone();
            let reply: ReplyFn = Arc::new(move |resp| match me.upgrade() {
                Some(conn) => conn.send_response(resp),
                None => Err(MessagingError::NotConnected),
            });
            let dispatcher = Dispatcher::spawn(
                info.clone(),
                handlers.clone(),
                reply,
                DispatchOptions {
                    stamp_sender: Some(info.client_id.clone()),
                    subscriptions: Some(subscriptions.clone()),
                },
            );
            Self {
                converter: MqttConverter::for_hub(&info.connection_id, &info.client_id),
                info,
                handlers,
                state: LinkState::new(true),
                sender: PacketSender::new(tx),
                dispatcher,
                subscriptions,
                closed: Notify::new(),
            }
        })
    }

    /// Handle one inbound packet. Returns false when the session must end.
    fn handle_packet(&self, packet: Packet) -> bool {
        match packet {
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::Subscribe(sub) => {
                let reason_codes = sub
                    .filters
                    .iter()
                    .map(|(_, options)| (options & 0x03).min(reason::GRANTED_QOS_1))
                    .collect();
                debug!(
                    "[{}] SUBSCRIBE {:?}",
                    self.info.connection_id,
                    sub.filters.iter().map(|(f, _)| f).collect::<Vec<_>>()
                );
                let _ = self.sender.send(Packet::SubAck(Ack {
                    packet_id: sub.packet_id,
                    reason_codes,
                }));
                true
            }
            Packet::Unsubscribe(unsub) => {
                let _ = self.sender.send(Packet::UnsubAck(Ack {
                    packet_id: unsub.packet_id,
                    reason_codes: vec![reason::SUCCESS; unsub.filters.len()],
                }));
                true
            }
            Packet::PingReq => {
                let _ = self.sender.send(Packet::PingResp);
                true
            }
            Packet::PubAck { .. } => true,
            Packet::Disconnect { .. } => false,
            other => {
                warn!(
                    "[{}] unexpected packet {:?}, closing",
                    self.info.connection_id, other
                );
                false
            }
        }
    }

    fn handle_publish(&self, publish: Publish) -> bool {
        if publish.qos > 1 {
            warn!("[{}] QoS 2 is not supported", self.info.connection_id);
            return false;
        }
        if let Some(packet_id) = publish.packet_id {
            let _ = self.sender.send(Packet::PubAck {
                packet_id,
                reason_code: reason::SUCCESS,
            });
        }
        match self.converter.decode(&publish) {
            Ok(envelope) => {
                if let Err(e) = self.dispatcher.dispatch(envelope) {
                    warn!("[{}] dispatch failed: {}", self.info.connection_id, e);
                }
            }
            Err(e) => warn!(
                "[{}] dropped publish on '{}': {}",
                self.info.connection_id, publish.topic, e
            ),
        }
        true
    }

    fn close(&self, err: Option<MessagingError>) {
        if self.state.mark_disconnected() {
            self.sender.close();
            self.closed.notify_one();
            info!(
                "[{}] MQTT session of '{}' closed",
                self.info.connection_id, self.info.client_id
            );
            self.handlers
                .notify_connect(false, err.as_ref(), &self.info);
        }
    }
}

impl Connection for MqttConnection {
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

    fn subscriptions(&self) -> Option<&Subscriptions> {
        Some(&self.subscriptions)
    }
}

/// Check the CONNECT packet, returning `(clientID, sessionID)` or the
/// CONNACK reason code.
fn authenticate(
    ctx: &TransportContext,
    connect: &Connect,
    remote_addr: &str,
) -> std::result::Result<(String, String), u8> {
    if connect.protocol_level != PROTOCOL_LEVEL_V5 {
        return Err(reason::UNSUPPORTED_PROTOCOL_VERSION);
    }
    let token = connect
        .password
        .as_ref()
        .and_then(|p| std::str::from_utf8(p).ok())
        .ok_or(reason::BAD_USERNAME_OR_PASSWORD)?;
    let (client_id, session_id) = ctx
        .authenticate(token, remote_addr)
        .map_err(|_| reason::BAD_USERNAME_OR_PASSWORD)?;
    match &connect.username {
        Some(username) if username != &client_id => Err(reason::NOT_AUTHORIZED),
        _ => Ok((client_id, session_id)),
    }
}

async fn read_with_keep_alive<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    keep_alive: Option<Duration>,
) -> Result<Option<Packet>> {
    match keep_alive {
        Some(limit) => tokio::time::timeout(limit, read_packet(reader, buf))
            .await
            .map_err(|_| TransportError::Protocol("keep-alive timeout".into()))?
            .map_err(TransportError::from),
        None => read_packet(reader, buf).await.map_err(TransportError::from),
    }
}

/// Run one client session on a byte stream until it ends.
async fn run_session<S>(ctx: Arc<TransportContext>, stream: S, remote_addr: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = BytesMut::new();

    let connect = match tokio::time::timeout(CONNECT_TIMEOUT, read_packet(&mut reader, &mut buf))
        .await
    {
        Ok(Ok(Some(Packet::Connect(connect)))) => connect,
        Ok(Ok(Some(other))) => {
            warn!("{} sent {:?} before CONNECT", remote_addr, other);
            return;
        }
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            warn!("{} sent an invalid CONNECT: {}", remote_addr, e);
            return;
        }
        Err(_) => {
            debug!("{} did not send CONNECT in time", remote_addr);
            return;
        }
    };

    let (client_id, session_id) = match authenticate(&ctx, &connect, &remote_addr) {
        Ok(ids) => ids,
        Err(code) => {
            warn!(
                "MQTT connect of '{}' from {} refused with reason 0x{:02X}",
                connect.username.as_deref().unwrap_or(""),
                remote_addr,
                code
            );
            let refuse = Packet::ConnAck(ConnAck {
                session_present: false,
                reason_code: code,
                properties: Properties::default(),
            });
            let _ = write_packet(&mut writer, &refuse).await;
            return;
        }
    };

    let mut ack_props = Properties {
        maximum_qos: Some(1),
        retain_available: Some(0),
        topic_alias_maximum: Some(0),
        ..Default::default()
    };
    let connection_id = if connect.client_id.is_empty() {
        let id = format!("MQTT-{}", &new_id()[..8]);
        ack_props.assigned_client_id = Some(id.clone());
        id
    } else {
        connect.client_id.clone()
    };
    let ack = Packet::ConnAck(ConnAck {
        session_present: false,
        reason_code: reason::SUCCESS,
        properties: ack_props,
    });
    if let Err(e) = write_packet(&mut writer, &ack).await {
        warn!("[{}] failed to send CONNACK: {}", connection_id, e);
        return;
    }

    let mut info = ConnectionInfo::new(connection_id.clone(), client_id, protocol::MQTT);
    info.session_id = session_id;
    info.remote_addr = remote_addr;
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = spawn_writer(writer, rx, connection_id.clone());
    let conn = MqttConnection::new(info, tx);
    ctx.register_connection(conn.clone());

    let keep_alive = match connect.keep_alive {
        0 => None,
        secs => Some(Duration::from_millis(u64::from(secs) * 1500)),
    };
    let err = loop {
        let next = tokio::select! {
            _ = conn.closed.notified() => break None,
            next = read_with_keep_alive(&mut reader, &mut buf, keep_alive) => next,
        };
        match next {
            Ok(Some(packet)) => {
                if !conn.handle_packet(packet) {
                    break None;
                }
                ctx.sessions.touch(&conn.info.session_id);
            }
            Ok(None) => break Some(MessagingError::ConnectionLost),
            Err(e) => {
                warn!("[{}] MQTT session error: {}", connection_id, e);
                break Some(MessagingError::ConnectionLost);
            }
        }
    };
    conn.close(err);
    let _ = writer_task.await;
}

async fn mqtt_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(ctx): State<Arc<TransportContext>>,
) -> impl IntoResponse {
    ws.protocols([WS_SUBPROTOCOL])
        .on_upgrade(move |socket| bridge_websocket(socket, ctx, addr))
}

/// Pump binary WebSocket frames to and from a session running on a duplex
/// byte stream.
async fn bridge_websocket(socket: WebSocket, ctx: Arc<TransportContext>, addr: SocketAddr) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    tokio::spawn(run_session(ctx, remote, addr.to_string()));

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut io_rx, mut io_tx) = tokio::io::split(local);
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
                    if ws_tx.send(Message::Binary(chunk[..n].to_vec())).await.is_err() {
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
    debug!("MQTT WebSocket session from {} ended", addr);
}

/// Listeners of the MQTT binding.
pub struct MqttBroker {
    ctx: Arc<TransportContext>,
    tcp: Option<TcpListener>,
    ws: Option<TcpListener>,
}

impl MqttBroker {
    pub async fn bind(
        tcp_addr: Option<&str>,
        ws_addr: Option<&str>,
        ctx: Arc<TransportContext>,
    ) -> Result<Self> {
        let tcp = match tcp_addr {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .map_err(|e| TransportError::Bind(format!("{}: {}", addr, e)))?,
            ),
            None => None,
        };
        let ws = match ws_addr {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .map_err(|e| TransportError::Bind(format!("{}: {}", addr, e)))?,
            ),
            None => None,
        };
        Ok(Self { ctx, tcp, ws })
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Spawn the accept loops. They end when shutdown is signalled.
    pub fn serve(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(listener) = self.tcp {
            if let Ok(addr) = listener.local_addr() {
                info!("MQTT broker listening on tcp://{}", addr);
            }
            let ctx = self.ctx.clone();
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = wait_for_shutdown(shutdown.clone()) => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer_addr)) => {
                                debug!("MQTT connection from {}", peer_addr);
                                let _ = stream.set_nodelay(true);
                                tokio::spawn(run_session(ctx.clone(), stream, peer_addr.to_string()));
                            }
                            Err(e) => error!("MQTT accept error: {}", e),
                        }
                    }
                }
                debug!("MQTT TCP listener stopped");
            }));
        }
        if let Some(listener) = self.ws {
            if let Ok(addr) = listener.local_addr() {
                info!("MQTT broker listening on ws://{}/mqtt", addr);
            }
            let app = Router::new()
                .route("/mqtt", get(mqtt_ws_handler))
                .with_state(self.ctx.clone());
            tasks.push(tokio::spawn(async move {
                let served = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(wait_for_shutdown(shutdown))
                .await;
                if let Err(e) = served {
                    error!("MQTT WebSocket server error: {}", e);
                }
            }));
        }
        tasks
    }
}
