// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HTTP server of the HTTP-basic, SSE and WebSocket bindings.

use super::sse::{event_stream, SseConnection, SseStreams};
use super::{
    bearer_token, HttpError, CONNECTION_ID_HEADER, CORRELATION_ID_HEADER, LOGIN_PATH,
    LOGOUT_PATH, NOTIFICATION_PATH, PING_PATH, REFRESH_PATH, REQUEST_PATH, RESPONSE_PATH,
};
use crate::error::{Result, TransportError};
use crate::forms::SSE_PATH;
use crate::server::{wait_for_shutdown, TransportContext};
use crate::wss;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use hiveot_messaging::{
    directory, new_id, op, protocol, Connection, ConnectionInfo, DispatchOptions, Dispatcher,
    Envelope, ErrorValue, HandlerSlots, LinkState, MessagingError, NotificationMessage,
    ReplyFn, RequestMessage, ResponseMessage,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Operations accepted on `/things/{op}/...`.
const THING_OPERATIONS: &[&str] = &[
    op::INVOKE_ACTION,
    op::QUERY_ACTION,
    op::QUERY_ALL_ACTIONS,
    op::READ_PROPERTY,
    op::READ_ALL_PROPERTIES,
    op::WRITE_PROPERTY,
    op::READ_EVENT,
    op::READ_ALL_EVENTS,
];

#[derive(Clone)]
struct HttpState {
    ctx: Arc<TransportContext>,
    streams: SseStreams,
}

impl HttpState {
    fn authenticate(
        &self,
        headers: &HeaderMap,
        addr: &SocketAddr,
    ) -> std::result::Result<(String, String), HttpError> {
        let token = bearer_token(headers)
            .ok_or_else(|| HttpError(ErrorValue::unauthorized("missing bearer token")))?;
        self.ctx
            .authenticate(token, &addr.to_string())
            .map_err(|e| HttpError(ErrorValue::from(&e)))
    }

    /// SSE connection of the caller named by the `X-CID` header.
    fn sse_connection(&self, client_id: &str, headers: &HeaderMap) -> Option<Arc<SseConnection>> {
        let cid = header_str(headers, CONNECTION_ID_HEADER)?;
        let key = format!("{}:{}", client_id, cid);
        self.streams.get(&key).map(|c| c.value().clone())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Routes of the HTTP-basic binding, including the SSE stream and the
/// WebSocket endpoint sharing the listener.
pub fn router(ctx: Arc<TransportContext>) -> Router {
    let state = HttpState {
        ctx: ctx.clone(),
        streams: Arc::new(DashMap::new()),
    };
    let http = Router::new()
        .route(LOGIN_PATH, post(login))
        .route(REFRESH_PATH, post(refresh))
        .route(LOGOUT_PATH, post(logout))
        .route(PING_PATH, get(ping))
        .route(SSE_PATH, get(sse_handler))
        .route("/sse", get(sse_handler))
        .route(REQUEST_PATH, post(post_request))
        .route(RESPONSE_PATH, post(post_response))
        .route(NOTIFICATION_PATH, post(post_notification))
        .route("/things", get(read_all_tds))
        .route("/things/:thing_id", get(read_td))
        .route("/things/:op/:thing_id", any(thing_operation))
        .route("/things/:op/:thing_id/:name", any(thing_affordance_operation))
        .with_state(state);
    http.merge(wss::router(ctx))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Bound HTTP listener.
pub struct HttpServer {
    ctx: Arc<TransportContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HttpServer {
    pub async fn bind(addr: &str, ctx: Arc<TransportContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind(format!("{}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            ctx,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until shutdown is signalled.
    pub fn serve(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let app = router(self.ctx);
        let listener = self.listener;
        tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(wait_for_shutdown(shutdown))
            .await;
            if let Err(e) = served {
                error!("HTTP server error: {}", e);
            }
            debug!("HTTP server stopped");
        })
    }
}

// --- authentication ---

#[derive(Debug, Deserialize)]
struct LoginArgs {
    login: String,
    password: String,
}

/// POST /authn/login
async fn login(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(args): Json<LoginArgs>,
) -> std::result::Result<Json<String>, HttpError> {
    let token = state
        .ctx
        .authenticator()
        .login(&args.login, &args.password)
        .map_err(|e| HttpError(e.to_error_value()))?;
    info!("'{}' logged in from {}", args.login, addr);
    Ok(Json(token))
}

/// POST /authn/refresh
async fn refresh(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> std::result::Result<Json<String>, HttpError> {
    let (client_id, _) = state.authenticate(&headers, &addr)?;
    let old_token = bearer_token(&headers).unwrap_or_default();
    let token = state
        .ctx
        .authenticator()
        .refresh_token(&client_id, old_token)
        .map_err(|e| HttpError(e.to_error_value()))?;
    debug!("token of '{}' refreshed", client_id);
    Ok(Json(token))
}

/// POST /authn/logout
async fn logout(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> std::result::Result<StatusCode, HttpError> {
    let (client_id, _) = state.authenticate(&headers, &addr)?;
    state.ctx.logout(&client_id);
    Ok(StatusCode::OK)
}

/// GET /ping
async fn ping() -> Json<&'static str> {
    Json("pong")
}

// --- SSE return channel ---

/// GET /hiveot/sse
async fn sse_handler(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let (client_id, session_id) = match state.authenticate(&headers, &addr) {
        Ok(ids) => ids,
        Err(e) => return e.into_response(),
    };
    let connection_id = header_str(&headers, CONNECTION_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| format!("SSE-{}", &new_id()[..8]));
    let mut info = ConnectionInfo::new(connection_id, client_id, protocol::SSE);
    info.session_id = session_id;
    info.remote_addr = addr.to_string();
    let key = info.key();

    let (tx, rx) = mpsc::unbounded_channel();
    let conn = SseConnection::new(info, tx);
    state.ctx.register_connection(conn.clone());
    state.streams.insert(key, conn.clone());
    info!(
        "[{}] SSE stream opened by '{}' from {}",
        conn.info().connection_id,
        conn.info().client_id,
        addr
    );
    Sse::new(event_stream(conn, rx, state.streams.clone()))
        .keep_alive(KeepAlive::default())
        .into_response()
}

// --- envelope posting ---

/// POST /hiveot/request: a full request envelope; the reply is the full
/// response envelope.
async fn post_request(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (client_id, session_id) = match state.authenticate(&headers, &addr) {
        Ok(ids) => ids,
        Err(e) => return e.into_response(),
    };
    let req: RequestMessage = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return HttpError(ErrorValue::bad_request(e.to_string())).into_response(),
    };
    let resp = dispatch_request(&state, &client_id, &session_id, &addr, &headers, req).await;
    Json(resp).into_response()
}

/// POST /hiveot/response: an agent answering a request it received on its
/// SSE stream.
async fn post_response(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let resp: ResponseMessage = match serde_json::from_slice(&body) {
        Ok(resp) => resp,
        Err(e) => return HttpError(ErrorValue::bad_request(e.to_string())).into_response(),
    };
    inject(&state, &addr, &headers, Envelope::Response(resp))
}

/// POST /hiveot/notification
async fn post_notification(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let notif: NotificationMessage = match serde_json::from_slice(&body) {
        Ok(notif) => notif,
        Err(e) => return HttpError(ErrorValue::bad_request(e.to_string())).into_response(),
    };
    inject(&state, &addr, &headers, Envelope::Notification(notif))
}

fn inject(state: &HttpState, addr: &SocketAddr, headers: &HeaderMap, envelope: Envelope) -> Response {
    let (client_id, _) = match state.authenticate(headers, addr) {
        Ok(ids) => ids,
        Err(e) => return e.into_response(),
    };
    let Some(conn) = state.sse_connection(&client_id, headers) else {
        return HttpError(ErrorValue::bad_request(format!(
            "'{}' header does not name an open SSE connection",
            CONNECTION_ID_HEADER
        )))
        .into_response();
    };
    match conn.inject(envelope) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => HttpError(e.to_error_value()).into_response(),
    }
}

// --- WoT operations ---

#[derive(Debug, Deserialize)]
struct PageArgs {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

/// GET /things?limit=N&offset=M
async fn read_all_tds(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(page): Query<PageArgs>,
) -> Response {
    let input = json!({
        "limit": page.limit.unwrap_or(directory::READ_DIR_LIMIT),
        "offset": page.offset.unwrap_or(0),
    });
    let req = RequestMessage::new(
        op::INVOKE_ACTION,
        directory::DTHING_ID,
        directory::ACTION_READ_ALL_TDS,
        input,
    );
    operation_reply(&state, &addr, &headers, req).await
}

/// GET /things/{thingID}
async fn read_td(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(thing_id): Path<String>,
) -> Response {
    let req = RequestMessage::new(
        op::INVOKE_ACTION,
        directory::DTHING_ID,
        directory::ACTION_READ_TD,
        json!(thing_id),
    );
    operation_reply(&state, &addr, &headers, req).await
}

/// ANY /things/{op}/{thingID}
async fn thing_operation(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((operation, thing_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    thing_request(&state, &addr, &headers, &operation, &thing_id, "", &body).await
}

/// ANY /things/{op}/{thingID}/{name}
async fn thing_affordance_operation(
    State(state): State<HttpState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((operation, thing_id, name)): Path<(String, String, String)>,
    body: Bytes,
) -> Response {
    thing_request(&state, &addr, &headers, &operation, &thing_id, &name, &body).await
}

async fn thing_request(
    state: &HttpState,
    addr: &SocketAddr,
    headers: &HeaderMap,
    operation: &str,
    thing_id: &str,
    name: &str,
    body: &[u8],
) -> Response {
    let operation = operation.to_lowercase();
    if !THING_OPERATIONS.contains(&operation.as_str()) {
        return HttpError(ErrorValue::bad_request(format!(
            "unknown operation '{}'",
            operation
        )))
        .into_response();
    }
    let input = match parse_input(body) {
        Ok(input) => input,
        Err(e) => return e.into_response(),
    };
    let mut req = RequestMessage::new(operation, thing_id, name, input);
    if let Some(cid) = header_str(headers, CORRELATION_ID_HEADER) {
        req.correlation_id = cid.to_string();
    }
    operation_reply(state, addr, headers, req).await
}

/// Request body as JSON; an empty body is null.
fn parse_input(body: &[u8]) -> std::result::Result<Value, HttpError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| HttpError(ErrorValue::bad_request(format!("invalid JSON body: {}", e))))
}

/// Run a request and reply with its value as body.
async fn operation_reply(
    state: &HttpState,
    addr: &SocketAddr,
    headers: &HeaderMap,
    req: RequestMessage,
) -> Response {
    let (client_id, session_id) = match state.authenticate(headers, addr) {
        Ok(ids) => ids,
        Err(e) => return e.into_response(),
    };
    let resp = dispatch_request(state, &client_id, &session_id, addr, headers, req).await;
    let mut reply = match resp.error {
        Some(err) => HttpError(err).into_response(),
        None if resp.value.is_null() => StatusCode::NO_CONTENT.into_response(),
        None => Json(resp.value).into_response(),
    };
    if let Ok(cid) = HeaderValue::from_str(&resp.correlation_id) {
        reply.headers_mut().insert(CORRELATION_ID_HEADER, cid);
    }
    reply
}

/// Hand a request to the hub and wait for its response.
///
/// With an SSE connection named in `X-CID` the request runs on that
/// connection so later notifications reach its stream. Otherwise it runs on
/// a connection that lives for this call only.
async fn dispatch_request(
    state: &HttpState,
    client_id: &str,
    session_id: &str,
    addr: &SocketAddr,
    headers: &HeaderMap,
    mut req: RequestMessage,
) -> ResponseMessage {
    if req.correlation_id.is_empty() {
        req.correlation_id = new_id();
    }
    let timeout = state.ctx.rpc_timeout();
    let cid = req.correlation_id.clone();

    if let Some(conn) = state.sse_connection(client_id, headers) {
        let rx = match conn.open_waiter(&cid) {
            Ok(rx) => rx,
            Err(e) => return req.create_error_response(e.to_error_value()),
        };
        if let Err(e) = conn.inject(Envelope::Request(req.clone())) {
            conn.cancel_waiter(&cid);
            return req.create_error_response(e.to_error_value());
        }
        return match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => req.create_error_response(MessagingError::ConnectionLost.to_error_value()),
            Err(_) => {
                conn.cancel_waiter(&cid);
                warn!("[{}] request '{}' timed out", conn.info().connection_id, cid);
                req.create_error_response(ErrorValue::timeout(format!(
                    "no response for '{}'",
                    cid
                )))
            }
        };
    }

    let mut info = ConnectionInfo::new(
        format!("HTTP-{}", &new_id()[..8]),
        client_id,
        protocol::HTTP,
    );
    info.session_id = session_id.to_string();
    info.remote_addr = addr.to_string();
    let (tx, rx) = oneshot::channel();
    let conn = HttpReplyConnection::new(info, tx);
    state.ctx.register_connection(conn.clone());

    let resp = match conn.dispatcher.dispatch(Envelope::Request(req.clone())) {
        Err(e) => req.create_error_response(e.to_error_value()),
        Ok(()) => match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                req.create_error_response(MessagingError::ConnectionLost.to_error_value())
            }
            Err(_) => {
                warn!("[{}] request '{}' timed out", conn.info.connection_id, cid);
                req.create_error_response(ErrorValue::timeout(format!(
                    "no response for '{}'",
                    cid
                )))
            }
        },
    };
    conn.disconnect();
    resp
}

/// Connection of a single HTTP call that has no SSE stream.
///
/// It carries one response back to the waiting call. Notifications have
/// nowhere to go and are dropped.
struct HttpReplyConnection {
    info: ConnectionInfo,
    handlers: Arc<HandlerSlots>,
    state: LinkState,
    reply: Mutex<Option<oneshot::Sender<ResponseMessage>>>,
    dispatcher: Dispatcher,
}

impl HttpReplyConnection {
    fn new(info: ConnectionInfo, reply_tx: oneshot::Sender<ResponseMessage>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
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
                DispatchOptions {
                    stamp_sender: Some(info.client_id.clone()),
                    subscriptions: None,
                },
            );
            Self {
                info,
                handlers,
                state: LinkState::new(true),
                reply: Mutex::new(Some(reply_tx)),
                dispatcher,
            }
        })
    }
}

impl Connection for HttpReplyConnection {
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn send_request(&self, _req: RequestMessage) -> std::result::Result<(), MessagingError> {
        Err(MessagingError::NotConnected)
    }

    fn send_response(&self, resp: ResponseMessage) -> std::result::Result<(), MessagingError> {
        let tx = self
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => tx.send(resp).map_err(|_| MessagingError::ConnectionLost),
            None => Err(MessagingError::NotConnected),
        }
    }

    fn send_notification(
        &self,
        notif: NotificationMessage,
    ) -> std::result::Result<(), MessagingError> {
        debug!(
            "[{}] no return channel, notification '{}' dropped",
            self.info.connection_id, notif.name
        );
        Ok(())
    }

    fn disconnect(&self) {
        if self.state.mark_disconnected() {
            self.reply
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            self.handlers.notify_connect(false, None, &self.info);
        }
    }

    fn handlers(&self) -> &HandlerSlots {
        &self.handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionManager;
    use crate::server::ServerHandlers;
    use hiveot_messaging::{
        notification_handler, request_handler, response_handler, roles, Authenticator,
        MemoryAuthenticator,
    };

    fn test_ctx() -> (Arc<TransportContext>, String) {
        let authn = Arc::new(MemoryAuthenticator::new());
        authn.add_client("user1", "pass1", roles::OPERATOR);
        let token = authn.login("user1", "pass1").unwrap();
        let ctx = TransportContext::new(authn, Arc::new(SessionManager::default()));
        ctx.set_handlers(ServerHandlers {
            request: request_handler(|req, info| async move {
                Some(req.create_response(json!({"by": info.client_id, "in": req.input}), None))
            }),
            response: response_handler(|_, _| async {}),
            notification: notification_handler(|_, _| async {}),
            connect: None,
        });
        (ctx, token)
    }

    async fn start(ctx: Arc<TransportContext>) -> (String, watch::Sender<bool>) {
        let server = HttpServer::bind("127.0.0.1:0", ctx).await.unwrap();
        let base = format!("http://{}", server.local_addr());
        let (tx, rx) = watch::channel(false);
        server.serve(rx);
        (base, tx)
    }

    #[tokio::test]
    async fn test_login_and_ping() {
        let (ctx, _) = test_ctx();
        let (base, _stop) = start(ctx).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}{}", base, LOGIN_PATH))
            .json(&json!({"login": "user1", "password": "pass1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let token: String = resp.json().await.unwrap();
        assert!(!token.is_empty());

        let resp = client
            .post(format!("{}{}", base, LOGIN_PATH))
            .json(&json!({"login": "user1", "password": "wrong"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let pong: String = client
            .get(format!("{}{}", base, PING_PATH))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(pong, "pong");
    }

    #[tokio::test]
    async fn test_thing_operation_requires_token() {
        let (ctx, token) = test_ctx();
        let (base, _stop) = start(ctx.clone()).await;
        let client = reqwest::Client::new();
        let url = format!("{}/things/invokeaction/dtw:a1:t1/act", base);

        let resp = client.post(&url).body("\"hi\"").send().await.unwrap();
        assert_eq!(resp.status(), 401);

        let resp = client
            .post(&url)
            .bearer_auth(&token)
            .header(CORRELATION_ID_HEADER, "c-42")
            .body("\"hi\"")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()
                .get(CORRELATION_ID_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("c-42")
        );
        let value: Value = resp.json().await.unwrap();
        assert_eq!(value, json!({"by": "user1", "in": "hi"}));

        // the per-call connection is gone again
        assert_eq!(ctx.registry.count(), (0, 0));
    }

    #[tokio::test]
    async fn test_bad_operation_and_body() {
        let (ctx, token) = test_ctx();
        let (base, _stop) = start(ctx).await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{}/things/dance/dtw:a1:t1", base))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(format!("{}/things/invokeaction/dtw:a1:t1/act", base))
            .bearer_auth(&token)
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: ErrorValue = resp.json().await.unwrap();
        assert_eq!(err.status, 400);
    }

    #[tokio::test]
    async fn test_post_request_envelope() {
        let (ctx, token) = test_ctx();
        let (base, _stop) = start(ctx).await;
        let req = RequestMessage::new(op::PING, "", "", Value::Null).with_correlation_id("p1");
        let resp: ResponseMessage = reqwest::Client::new()
            .post(format!("{}{}", base, REQUEST_PATH))
            .bearer_auth(&token)
            .json(&req)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp.correlation_id, "p1");
        assert_eq!(resp.value, json!("pong"));
    }

    #[tokio::test]
    async fn test_response_post_needs_sse_connection() {
        let (ctx, token) = test_ctx();
        let (base, _stop) = start(ctx).await;
        let req = RequestMessage::new(op::INVOKE_ACTION, "t1", "a", Value::Null)
            .with_correlation_id("r1");
        let resp = reqwest::Client::new()
            .post(format!("{}{}", base, RESPONSE_PATH))
            .bearer_auth(&token)
            .json(&req.create_response(json!(1), None))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
