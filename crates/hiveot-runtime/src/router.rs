// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Hub message router
//!
//! Connects consumers to agents through their digital twins:
//!
//! - Consumer requests for `dtw:{agentID}:{thingID}` are authorized, then
//!   either served from the digital-twin store (reads) or forwarded to the
//!   agent under a router-internal correlation ID.
//! - Agent responses are mapped back to the consumer request and returned
//!   on the consumer's connection.
//! - Agent notifications update the store and fan out to every connection
//!   subscribed to the digital twin.
//! - Requests for the directory Thing go to the [`Directory`].
//!
//! The router owns no I/O. The bindings hand it envelopes through the
//! handlers returned by [`Router::handlers`].

use crate::authz::Authorizer;
use crate::forward::{ForwardEntry, ForwardingTable};
use hiveot_digitwin::{DigitwinStore, Directory, StoreError};
use hiveot_messaging::{
    connect_handler, directory, is_digitwin_id, make_digitwin_id, new_id,
    notification_handler, now_timestamp, op, parse_timestamp, request_handler, response_handler,
    split_digitwin_id, ActionProgress, ActionStatus, AffordanceType, Authenticator,
    ConnectionInfo, ErrorValue, MessagingError, NotificationMessage, RequestMessage,
    ResponseMessage, ThingDescription,
};
use hiveot_transports::{ConnectionRegistry, ServerHandlers};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Input length shown in request logs.
const LOG_INPUT_LEN: usize = 60;

/// Routes envelopes between consumers, agents and the digital-twin store.
pub struct Router {
    store: Arc<DigitwinStore>,
    directory: Directory,
    registry: Arc<ConnectionRegistry>,
    authn: Arc<dyn Authenticator>,
    authz: Authorizer,
    forwards: ForwardingTable,
    rpc_timeout: Duration,
    strict: bool,
}

impl Router {
    pub fn new(
        directory: Directory,
        registry: Arc<ConnectionRegistry>,
        authn: Arc<dyn Authenticator>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            store: directory.store().clone(),
            directory,
            registry,
            authn,
            authz: Authorizer::default(),
            forwards: ForwardingTable::new(),
            rpc_timeout,
            strict: true,
        }
    }

    /// Enable or disable dataschema checks of action inputs, property
    /// writes and agent notifications.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_authorizer(mut self, authz: Authorizer) -> Self {
        self.authz = authz;
        self
    }

    pub fn store(&self) -> &Arc<DigitwinStore> {
        &self.store
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Requests forwarded to agents and not yet answered.
    pub fn pending_forwards(&self) -> usize {
        self.forwards.len()
    }

    /// Handlers to install on every server-side connection.
    ///
    /// The handlers hold a weak reference; once the router is dropped,
    /// requests are answered with 503.
    pub fn handlers(self: &Arc<Self>) -> ServerHandlers {
        let weak = Arc::downgrade(self);

        let w = weak.clone();
        let request = request_handler(move |req: RequestMessage, info: ConnectionInfo| {
            let router = w.upgrade();
            async move {
                match router {
                    Some(r) => r.handle_request(req, &info),
                    None => Some(req.create_error_response(ErrorValue::unavailable(
                        "hub is shutting down",
                    ))),
                }
            }
        });

        let w = weak.clone();
        let response = response_handler(move |resp: ResponseMessage, info: ConnectionInfo| {
            let router = w.upgrade();
            async move {
                if let Some(r) = router {
                    r.handle_response(resp, &info);
                }
            }
        });

        let w = weak.clone();
        let notification =
            notification_handler(move |notif: NotificationMessage, info: ConnectionInfo| {
                let router = w.upgrade();
                async move {
                    if let Some(r) = router {
                        r.handle_notification(notif, &info);
                    }
                }
            });

        let w: Weak<Router> = weak;
        let connect = connect_handler(move |connected, err, info| {
            if let Some(r) = w.upgrade() {
                r.handle_connect(connected, err, info);
            }
        });

        ServerHandlers {
            request,
            response,
            notification,
            connect: Some(connect),
        }
    }

    fn role_of(&self, client_id: &str) -> Option<String> {
        self.authn.client_role(client_id)
    }

    // --- consumer requests ---

    /// Handle a request from a consumer or an agent.
    ///
    /// Returns the response right away, or None when the request was
    /// forwarded and the agent's response will be returned later.
    pub fn handle_request(
        &self,
        req: RequestMessage,
        info: &ConnectionInfo,
    ) -> Option<ResponseMessage> {
        info!(
            "-> REQ [{}] {} {}/{} from '{}' cid={} input={}",
            info.connection_id,
            req.operation,
            req.thing_id,
            req.name,
            req.sender_id,
            req.correlation_id,
            req.input_summary(LOG_INPUT_LEN)
        );
        if req.sender_id.is_empty() {
            return Some(req.create_error_response(ErrorValue::unauthorized("missing sender")));
        }
        let role = self.role_of(&req.sender_id);

        if op::is_subscribe(&req.operation) {
            let td = self.td_for(&req.thing_id);
            return Some(
                match self.authz.authorize_subscription(role.as_deref(), &req, td.as_deref()) {
                    Ok(()) => req.create_response(Value::Null, None),
                    Err(e) => req.create_error_response(e),
                },
            );
        }
        if op::is_unsubscribe(&req.operation) {
            return Some(req.create_response(Value::Null, None));
        }
        if req.thing_id == directory::DTHING_ID {
            return Some(self.handle_directory_request(&req, role.as_deref()));
        }
        let Some((agent_id, native_id)) = split_digitwin_id(&req.thing_id) else {
            return Some(req.create_error_response(ErrorValue::bad_request(format!(
                "'{}' is not a digital twin ID",
                req.thing_id
            ))));
        };
        let (agent_id, native_id) = (agent_id.to_string(), native_id.to_string());

        match req.operation.as_str() {
            op::READ_PROPERTY
            | op::READ_ALL_PROPERTIES
            | op::READ_EVENT
            | op::READ_ALL_EVENTS
            | op::QUERY_ACTION
            | op::QUERY_ALL_ACTIONS => Some(self.read_digitwin(&req, role.as_deref())),
            op::INVOKE_ACTION | op::WRITE_PROPERTY => {
                self.forward_request(req, info, role.as_deref(), &agent_id, &native_id)
            }
            other => Some(req.create_error_response(ErrorValue::bad_request(format!(
                "unknown operation '{}'",
                other
            )))),
        }
    }

    /// TD that governs access to a Thing: the directory's own TD or the
    /// digital-twin TD, if the Thing is known.
    fn td_for(&self, thing_id: &str) -> Option<Cow<'_, ThingDescription>> {
        if thing_id == directory::DTHING_ID {
            return Some(Cow::Borrowed(self.directory.td()));
        }
        if thing_id.is_empty() {
            return None;
        }
        self.store.read_dtd(thing_id).ok().map(Cow::Owned)
    }

    fn handle_directory_request(&self, req: &RequestMessage, role: Option<&str>) -> ResponseMessage {
        if let Err(e) = self.authz.authorize(role, req, Some(self.directory.td())) {
            return req.create_error_response(e);
        }
        let reply = self.directory.handle_request(req, role);
        if let Some(event) = reply.event {
            self.fan_out(&event);
        }
        reply.response
    }

    /// Serve a read operation from the digital-twin store.
    fn read_digitwin(&self, req: &RequestMessage, role: Option<&str>) -> ResponseMessage {
        let td = match self.store.read_dtd(&req.thing_id) {
            Ok(td) => td,
            Err(e) => return req.create_error_response(e.to_error_value()),
        };
        if let Err(e) = self.authz.authorize(role, req, Some(&td)) {
            return req.create_error_response(e);
        }
        let thing_id = req.thing_id.as_str();
        let name = req.name.as_str();
        let value = match req.operation.as_str() {
            op::READ_PROPERTY => self.store.read_property(thing_id, name).and_then(to_json),
            op::READ_ALL_PROPERTIES => self.store.read_all_properties(thing_id).and_then(to_json),
            op::READ_EVENT => self.store.read_event(thing_id, name).and_then(to_json),
            op::READ_ALL_EVENTS => self.store.read_all_events(thing_id).and_then(to_json),
            op::QUERY_ACTION => self.store.query_action(thing_id, name).and_then(to_json),
            _ => self.store.query_all_actions(thing_id).and_then(to_json),
        };
        match value {
            Ok(value) => req.create_response(value, None),
            Err(e) => req.create_error_response(e.to_error_value()),
        }
    }

    /// Check a request against the TD of the digital twin, if it has one.
    fn check_affordance(&self, req: &RequestMessage, td: &ThingDescription) -> Result<(), ErrorValue> {
        let schema = if req.operation == op::INVOKE_ACTION {
            let action = td.actions.get(&req.name).ok_or_else(|| {
                ErrorValue::not_found(format!("'{}' has no action '{}'", req.thing_id, req.name))
            })?;
            action.input.as_ref()
        } else {
            let prop = td.properties.get(&req.name).ok_or_else(|| {
                ErrorValue::not_found(format!("'{}' has no property '{}'", req.thing_id, req.name))
            })?;
            if prop.schema.read_only {
                return Err(ErrorValue::bad_request(format!(
                    "property '{}' is read-only",
                    req.name
                )));
            }
            Some(&prop.schema)
        };
        if self.strict {
            if let Some(schema) = schema {
                schema.validate(&req.input).map_err(|e| {
                    ErrorValue::bad_request(format!("invalid input for '{}': {}", req.name, e))
                })?;
            }
        }
        Ok(())
    }

    /// Forward an action or property write to the agent of the digital twin.
    fn forward_request(
        &self,
        req: RequestMessage,
        info: &ConnectionInfo,
        role: Option<&str>,
        agent_id: &str,
        native_id: &str,
    ) -> Option<ResponseMessage> {
        let td = self.store.read_dtd(&req.thing_id).ok();
        if let Err(e) = self.authz.authorize(role, &req, td.as_ref()) {
            return Some(req.create_error_response(e));
        }
        if let Some(td) = &td {
            if let Err(e) = self.check_affordance(&req, td) {
                return Some(req.create_error_response(e));
            }
        }
        let Some(agent) = self.registry.get_connection_by_client_id(agent_id) else {
            debug!("agent '{}' of '{}' is not connected", agent_id, req.thing_id);
            return Some(req.create_error_response(ErrorValue::unavailable(format!(
                "agent '{}' is not connected",
                agent_id
            ))));
        };

        let rcid = new_id();
        let mut forwarded = req.clone();
        forwarded.thing_id = native_id.to_string();
        forwarded.correlation_id = rcid.clone();

        self.forwards.insert(ForwardEntry {
            rcid: rcid.clone(),
            request: req.clone(),
            consumer_key: info.key(),
            agent_id: agent_id.to_string(),
            agent_key: agent.info().key(),
            deadline: Instant::now() + self.rpc_timeout,
        });

        if req.operation == op::INVOKE_ACTION {
            let status = action_status(&req, agent_id, ActionProgress::Pending);
            self.record_action(status.clone());
            self.notify_consumer(&info.key(), progress_notification(&req, &status));
        }

        if let Err(e) = agent.send_request(forwarded) {
            warn!(
                "[{}] failed to forward '{}' to agent '{}': {}",
                info.connection_id, req.operation, agent_id, e
            );
            if let Some(entry) = self.forwards.take(&rcid, agent_id) {
                if req.operation == op::INVOKE_ACTION {
                    let err = ErrorValue::unavailable(e.to_string());
                    self.record_action(failed_status(&entry, err));
                }
            }
            return Some(req.create_error_response(ErrorValue::unavailable(format!(
                "agent '{}' is unreachable",
                agent_id
            ))));
        }
        None
    }

    // --- agent responses ---

    /// Return an agent's response to the consumer that sent the request.
    pub fn handle_response(&self, mut resp: ResponseMessage, info: &ConnectionInfo) {
        let agent_id = info.client_id.as_str();
        let Some(entry) = self.forwards.take(&resp.correlation_id, agent_id) else {
            if self.forwards.get(&resp.correlation_id).is_some() {
                warn!(
                    "[{}] '{}' sent a response for a request of another agent, dropped",
                    info.connection_id, agent_id
                );
            } else {
                debug!(
                    "[{}] response '{}' from '{}' is unknown or expired, dropped",
                    info.connection_id, resp.correlation_id, agent_id
                );
            }
            return;
        };

        if entry.request.operation == op::INVOKE_ACTION {
            let progress = if resp.error.is_some() {
                ActionProgress::Failed
            } else {
                ActionProgress::Completed
            };
            let mut status = action_status(&entry.request, agent_id, progress);
            status.output = resp.value.clone();
            status.error = resp.error.clone();
            self.record_action(status);
        }

        resp.correlation_id = entry.request.correlation_id.clone();
        resp.thing_id = entry.request.thing_id.clone();
        resp.operation = entry.request.operation.clone();
        resp.name = entry.request.name.clone();
        info!(
            "<- RESP [{}] {} {}/{} to '{}' cid={} error={}",
            info.connection_id,
            resp.operation,
            resp.thing_id,
            resp.name,
            entry.request.sender_id,
            resp.correlation_id,
            resp.error.as_ref().map_or_else(|| "-".to_string(), |e| e.to_string())
        );
        self.respond_to_consumer(&entry.consumer_key, resp);
    }

    // --- agent notifications ---

    /// Apply an agent notification to the store and pass it on.
    pub fn handle_notification(&self, mut notif: NotificationMessage, info: &ConnectionInfo) {
        let agent_id = info.client_id.as_str();
        if is_digitwin_id(&notif.thing_id) {
            warn!(
                "[{}] '{}' published '{}' for digital twin '{}', dropped",
                info.connection_id, agent_id, notif.name, notif.thing_id
            );
            return;
        }
        notif.thing_id = make_digitwin_id(agent_id, &notif.thing_id);
        if parse_timestamp(&notif.timestamp).is_none() {
            debug!(
                "[{}] '{}/{}' has timestamp '{}', stamped with hub time",
                info.connection_id, notif.thing_id, notif.name, notif.timestamp
            );
            notif.timestamp = now_timestamp();
        }

        match notif.operation.as_str() {
            op::SUBSCRIBE_EVENT => {
                if self.check_notification(&notif) {
                    let stored = self
                        .store
                        .update_event_value(notif.to_thing_value(AffordanceType::Event));
                    if self.keep_value(&notif, stored) {
                        self.fan_out(&notif);
                    }
                }
            }
            op::OBSERVE_PROPERTY => {
                if self.check_notification(&notif) {
                    let stored = self
                        .store
                        .update_property_value(notif.to_thing_value(AffordanceType::Property));
                    if self.keep_value(&notif, stored) {
                        self.fan_out(&notif);
                    }
                }
            }
            op::OBSERVE_ALL_PROPERTIES => self.handle_property_map(&notif),
            op::INVOKE_ACTION => self.handle_action_progress(notif, agent_id),
            other => warn!(
                "[{}] unsupported notification '{}' from '{}', dropped",
                info.connection_id, other, agent_id
            ),
        }
    }

    /// Dataschema check of an event or property value.
    fn check_notification(&self, notif: &NotificationMessage) -> bool {
        if !self.strict {
            return true;
        }
        let Ok(td) = self.store.read_dtd(&notif.thing_id) else {
            return true;
        };
        let schema = if notif.operation == op::SUBSCRIBE_EVENT {
            td.events.get(&notif.name).and_then(|e| e.data.clone())
        } else {
            td.properties.get(&notif.name).map(|p| p.schema.clone())
        };
        match schema.map(|s| s.validate(&notif.data)) {
            Some(Err(e)) => {
                warn!(
                    "'{}' of '{}' does not match its schema: {}",
                    notif.name, notif.thing_id, e
                );
                false
            }
            _ => true,
        }
    }

    /// Whether a value that went through the store should be passed on.
    ///
    /// Stale values are dropped. Values of things without a digital twin
    /// are passed on uncached.
    fn keep_value(&self, notif: &NotificationMessage, stored: hiveot_digitwin::Result<bool>) -> bool {
        match stored {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    "stale value of '{}/{}' at {} dropped",
                    notif.thing_id, notif.name, notif.timestamp
                );
                false
            }
            Err(StoreError::NotFound(_)) => true,
            Err(e) => {
                warn!("failed to cache '{}/{}': {}", notif.thing_id, notif.name, e);
                true
            }
        }
    }

    /// Cache a multi-property notification and pass on one notification
    /// per property that was stored.
    fn handle_property_map(&self, notif: &NotificationMessage) {
        let Value::Object(values) = &notif.data else {
            warn!(
                "property map of '{}' from '{}' is not an object, dropped",
                notif.thing_id, notif.sender_id
            );
            return;
        };
        let single = |name: &str, data: &Value| {
            let mut single =
                NotificationMessage::new(op::OBSERVE_PROPERTY, &notif.thing_id, name, data.clone());
            single.timestamp = notif.timestamp.clone();
            single.sender_id = notif.sender_id.clone();
            single
        };
        let checked: Map<String, Value> = values
            .iter()
            .filter(|(name, data)| self.check_notification(&single(name, data)))
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect();

        let stored = match self
            .store
            .update_property_values(&notif.thing_id, &checked, &notif.timestamp)
        {
            Ok(stored) => stored,
            Err(StoreError::NotFound(_)) => checked.keys().cloned().collect(),
            Err(e) => {
                warn!("failed to cache properties of '{}': {}", notif.thing_id, e);
                checked.keys().cloned().collect()
            }
        };
        if stored.len() < checked.len() {
            debug!(
                "{} stale values of '{}' at {} dropped",
                checked.len() - stored.len(),
                notif.thing_id,
                notif.timestamp
            );
        }
        for name in stored {
            if let Some(data) = checked.get(&name) {
                self.fan_out(&single(&name, data));
            }
        }
    }

    /// Relay action progress to the consumer that invoked the action.
    fn handle_action_progress(&self, mut notif: NotificationMessage, agent_id: &str) {
        let Some(entry) = self.forwards.get(&notif.correlation_id) else {
            debug!(
                "progress for unknown request '{}' from '{}' dropped",
                notif.correlation_id, agent_id
            );
            return;
        };
        if entry.agent_id != agent_id {
            warn!(
                "'{}' sent progress for a request of '{}', dropped",
                agent_id, entry.agent_id
            );
            return;
        }
        let mut status = match serde_json::from_value::<ActionStatus>(notif.data.clone()) {
            Ok(status) => status,
            Err(_) => {
                let mut status = action_status(&entry.request, agent_id, ActionProgress::Running);
                status.output = notif.data.clone();
                status
            }
        };
        status.action_id = entry.request.correlation_id.clone();
        status.agent_id = agent_id.to_string();
        status.thing_id = entry.request.thing_id.clone();
        status.name = entry.request.name.clone();
        status.sender_id = entry.request.sender_id.clone();
        if status.status.is_terminal() {
            status.status = ActionProgress::Running;
        }
        self.record_action(status.clone());

        notif.correlation_id = entry.request.correlation_id.clone();
        notif.thing_id = entry.request.thing_id.clone();
        notif.name = entry.request.name.clone();
        notif.data = serde_json::to_value(&status).unwrap_or(notif.data);
        self.notify_consumer(&entry.consumer_key, notif);
    }

    /// Send a notification to every connection subscribed to it whose
    /// client may read it.
    ///
    /// Returns the number of connections it was sent to.
    pub fn fan_out(&self, notif: &NotificationMessage) -> usize {
        let td = self.td_for(&notif.thing_id);
        let mut count = 0;
        self.registry.for_each_connection(|c| {
            if !c.subscriptions().is_some_and(|s| s.accepts(notif)) {
                return;
            }
            let client_id = c.info().client_id.as_str();
            let role = self.role_of(client_id);
            if !self
                .authz
                .may_receive(role.as_deref(), client_id, notif, td.as_deref())
            {
                debug!(
                    "[{}] '{}' may not receive '{}/{}'",
                    c.info().connection_id, client_id, notif.thing_id, notif.name
                );
                return;
            }
            match c.send_notification(notif.clone()) {
                Ok(()) => count += 1,
                Err(e) => debug!(
                    "[{}] notification '{}' not delivered: {}",
                    c.info().connection_id, notif.name, e
                ),
            }
        });
        debug!(
            "'{}' {}/{} sent to {} subscribers",
            notif.operation, notif.thing_id, notif.name, count
        );
        count
    }

    // --- connection lifecycle and expiry ---

    fn handle_connect(&self, connected: bool, err: Option<&MessagingError>, info: &ConnectionInfo) {
        if connected {
            return;
        }
        let key = info.key();
        let failed = self.forwards.remove_by_agent_key(&key);
        if !failed.is_empty() {
            info!(
                "[{}] agent '{}' disconnected with {} requests in flight",
                info.connection_id,
                info.client_id,
                failed.len()
            );
        }
        for entry in failed {
            let reason = err.map_or_else(|| "agent disconnected".to_string(), |e| e.to_string());
            self.fail_entry(entry, ErrorValue::unavailable(reason));
        }
        let orphaned = self.forwards.remove_by_consumer_key(&key);
        if !orphaned.is_empty() {
            debug!(
                "[{}] dropped {} requests of disconnected consumer '{}'",
                info.connection_id,
                orphaned.len(),
                info.client_id
            );
        }
    }

    /// Fail forwarded requests past their deadline with a timeout.
    ///
    /// Returns the number of expired requests.
    pub fn gc(&self) -> usize {
        let expired = self.forwards.remove_expired(Instant::now());
        let count = expired.len();
        for entry in expired {
            warn!(
                "request '{}' {}/{} of '{}' timed out",
                entry.request.operation,
                entry.request.thing_id,
                entry.request.name,
                entry.request.sender_id
            );
            self.fail_entry(entry, ErrorValue::timeout("no response from agent"));
        }
        count
    }

    /// Fail every forwarded request. Used on shutdown.
    pub fn release_all(&self) {
        for entry in self.forwards.remove_all() {
            self.fail_entry(entry, ErrorValue::unavailable("hub is shutting down"));
        }
    }

    fn fail_entry(&self, entry: ForwardEntry, err: ErrorValue) {
        if entry.request.operation == op::INVOKE_ACTION {
            self.record_action(failed_status(&entry, err.clone()));
        }
        let resp = entry.request.create_error_response(err);
        self.respond_to_consumer(&entry.consumer_key, resp);
    }

    fn record_action(&self, status: ActionStatus) {
        if let Err(e) = self.store.record_action(status) {
            match e {
                StoreError::NotFound(_) => {}
                e => warn!("failed to record action status: {}", e),
            }
        }
    }

    fn respond_to_consumer(&self, consumer_key: &str, resp: ResponseMessage) {
        match self.registry.get_connection(consumer_key) {
            Some(c) => {
                if let Err(e) = c.send_response(resp) {
                    debug!("response to '{}' not delivered: {}", consumer_key, e);
                }
            }
            None => debug!(
                "consumer '{}' is gone, response '{}' dropped",
                consumer_key, resp.correlation_id
            ),
        }
    }

    fn notify_consumer(&self, consumer_key: &str, notif: NotificationMessage) {
        if let Some(c) = self.registry.get_connection(consumer_key) {
            if let Err(e) = c.send_notification(notif) {
                debug!("progress to '{}' not delivered: {}", consumer_key, e);
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: T) -> hiveot_digitwin::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Action status of a consumer request.
fn action_status(req: &RequestMessage, agent_id: &str, progress: ActionProgress) -> ActionStatus {
    ActionStatus {
        action_id: req.correlation_id.clone(),
        agent_id: agent_id.to_string(),
        error: None,
        input: req.input.clone(),
        name: req.name.clone(),
        output: Value::Null,
        sender_id: req.sender_id.clone(),
        status: progress,
        thing_id: req.thing_id.clone(),
        time_requested: if req.created.is_empty() {
            now_timestamp()
        } else {
            req.created.clone()
        },
        time_updated: now_timestamp(),
    }
}

fn failed_status(entry: &ForwardEntry, err: ErrorValue) -> ActionStatus {
    let mut status = action_status(&entry.request, &entry.agent_id, ActionProgress::Failed);
    status.error = Some(err);
    status
}

fn progress_notification(req: &RequestMessage, status: &ActionStatus) -> NotificationMessage {
    req.create_notification(serde_json::to_value(status).unwrap_or(Value::Null))
}
