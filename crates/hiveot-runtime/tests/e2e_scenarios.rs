// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! End-to-end scenarios over embedded connections.

use hiveot_messaging::{
    directory, notification_handler, op, request_handler, roles, ActionProgress, ActionStatus,
    Agent, Consumer, DataSchema, MemoryAuthenticator, MessagingError, NotificationMessage,
    RequestMessage, ThingDescription,
};
use hiveot_runtime::{HubConfig, HubRuntime};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DTHING1: &str = "dtw:A1:thing1";

fn test_config() -> HubConfig {
    let mut config = HubConfig::for_testing();
    config.http.enabled = false;
    config.mqtt.enabled = false;
    config
}

fn test_clients() -> Arc<MemoryAuthenticator> {
    let authn = Arc::new(MemoryAuthenticator::new());
    authn.add_client("A1", "pw", roles::AGENT);
    authn.add_client("A2", "pw", roles::AGENT);
    authn.add_client("C1", "pw", roles::OPERATOR);
    authn.add_client("C2", "pw", roles::OPERATOR);
    authn.add_client("C3", "pw", roles::OPERATOR);
    authn.add_client("viewer1", "pw", roles::VIEWER);
    authn.add_client("admin1", "pw", roles::ADMIN);
    authn
}

async fn start_hub_with(config: HubConfig) -> HubRuntime {
    HubRuntime::start(config, test_clients()).await.unwrap()
}

async fn start_hub() -> HubRuntime {
    start_hub_with(test_config()).await
}

fn thing1_td() -> ThingDescription {
    ThingDescription::new("thing1", "Thing 1")
        .add_action(
            "action1",
            "Echo",
            Some(DataSchema::of_type("string")),
            Some(DataSchema::of_type("string")),
        )
        .add_property("property1", "Property 1", "number")
        .add_property("property2", "Property 2", "string")
        .add_event("temperature", "Temperature", "number")
}

/// Agent A1 with thing1 published; action1 echoes its input.
async fn echo_agent(hub: &HubRuntime) -> (Agent, Arc<Mutex<Vec<RequestMessage>>>) {
    let agent = Agent::new(hub.connect_embedded("A1"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    agent.set_request_handler(request_handler(move |req, _info| {
        let seen = seen2.clone();
        async move {
            seen.lock().unwrap().push(req.clone());
            Some(req.create_response(req.input.clone(), None))
        }
    }));
    agent.update_thing(&thing1_td()).await.unwrap();
    (agent, seen)
}

fn consumer(hub: &HubRuntime, client_id: &str) -> (Consumer, Arc<Mutex<Vec<NotificationMessage>>>) {
    let consumer = Consumer::new(hub.connect_embedded(client_id));
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    consumer.set_notification_handler(notification_handler(move |notif, _info| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(notif);
        }
    }));
    (consumer, received)
}

fn events(received: &Arc<Mutex<Vec<NotificationMessage>>>) -> Vec<NotificationMessage> {
    received
        .lock()
        .unwrap()
        .iter()
        .filter(|n| n.operation == op::SUBSCRIBE_EVENT)
        .cloned()
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn remote_status(err: MessagingError) -> u16 {
    match err {
        MessagingError::Remote(e) => e.status,
        other => panic!("expected an error response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_action_round_trip() {
    let hub = start_hub().await;
    let (_agent, seen) = echo_agent(&hub).await;
    let (c1, _) = consumer(&hub, "C1");

    let req = RequestMessage::new(op::INVOKE_ACTION, DTHING1, "action1", json!("hello"))
        .with_correlation_id("cid-1");
    let resp = c1.send_request(req, true).await.unwrap().unwrap();

    assert_eq!(resp.operation, op::INVOKE_ACTION);
    assert_eq!(resp.thing_id, DTHING1);
    assert_eq!(resp.name, "action1");
    assert_eq!(resp.correlation_id, "cid-1");
    assert_eq!(resp.value, json!("hello"));
    assert!(resp.error.is_none());

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].operation, op::INVOKE_ACTION);
    assert_eq!(seen[0].thing_id, "thing1");
    assert_eq!(seen[0].name, "action1");
    assert_eq!(seen[0].input, json!("hello"));
    assert_eq!(seen[0].sender_id, "C1");
    assert_ne!(seen[0].correlation_id, "cid-1");
    hub.stop().await;
}

#[tokio::test]
async fn test_out_of_order_values() {
    let hub = start_hub().await;
    let (agent, _) = echo_agent(&hub).await;
    let (c1, r1) = consumer(&hub, "C1");

    c1.observe_property(DTHING1, "").await.unwrap();

    let cc = agent.consumer().connection().clone();
    let mut newer = NotificationMessage::new(op::OBSERVE_PROPERTY, "thing1", "property1", json!(20));
    newer.timestamp = "2026-01-01T00:00:01.000Z".into();
    let mut older = NotificationMessage::new(op::OBSERVE_PROPERTY, "thing1", "property1", json!(19));
    older.timestamp = "2026-01-01T00:00:00.999Z".into();
    let mut map = NotificationMessage::new(
        op::OBSERVE_ALL_PROPERTIES,
        "thing1",
        "",
        json!({"property1": 18, "property2": "on"}),
    );
    map.timestamp = "2026-01-01T00:00:00.500Z".into();
    cc.send_notification(newer).unwrap();
    cc.send_notification(older).unwrap();
    cc.send_notification(map).unwrap();
    settle().await;

    let value = c1.read_property(DTHING1, "property1").await.unwrap();
    assert_eq!(value.data, json!(20));
    assert_eq!(value.thing_id, DTHING1);
    let value = c1.read_property(DTHING1, "property2").await.unwrap();
    assert_eq!(value.data, json!("on"));

    let observed: Vec<(String, Value)> = r1
        .lock()
        .unwrap()
        .iter()
        .filter(|n| n.operation == op::OBSERVE_PROPERTY)
        .map(|n| (n.name.clone(), n.data.clone()))
        .collect();
    assert_eq!(
        observed,
        vec![
            ("property1".to_string(), json!(20)),
            ("property2".to_string(), json!("on")),
        ]
    );
    hub.stop().await;
}

#[tokio::test]
async fn test_values_without_timestamp_get_hub_time() {
    let hub = start_hub().await;
    let (agent, _) = echo_agent(&hub).await;
    let (c1, _) = consumer(&hub, "C1");

    let cc = agent.consumer().connection().clone();
    let mut first = NotificationMessage::new(op::OBSERVE_PROPERTY, "thing1", "property1", json!(20));
    first.timestamp = "2026-01-01T00:00:01.000Z".into();
    let mut unstamped =
        NotificationMessage::new(op::OBSERVE_PROPERTY, "thing1", "property1", json!(21));
    unstamped.timestamp = String::new();
    let mut stale = NotificationMessage::new(op::OBSERVE_PROPERTY, "thing1", "property1", json!(19));
    stale.timestamp = "2026-01-01T00:00:00.999Z".into();
    cc.send_notification(first).unwrap();
    cc.send_notification(unstamped).unwrap();
    cc.send_notification(stale).unwrap();
    settle().await;

    let value = c1.read_property(DTHING1, "property1").await.unwrap();
    assert_eq!(value.data, json!(21));
    assert!(hiveot_messaging::parse_timestamp(&value.timestamp).is_some());
    hub.stop().await;
}

#[tokio::test]
async fn test_absent_agent_is_unavailable() {
    let hub = start_hub().await;
    let (c1, _) = consumer(&hub, "C1");

    let req = RequestMessage::new(op::INVOKE_ACTION, DTHING1, "action1", json!("hello"))
        .with_correlation_id("cid-3");
    let resp = tokio::time::timeout(Duration::from_secs(1), c1.send_request(req, true))
        .await
        .expect("no response within a second")
        .unwrap()
        .unwrap();
    assert_eq!(resp.correlation_id, "cid-3");
    let err = resp.error.unwrap();
    assert_eq!(err.status, 503);
    assert_eq!(err.title, "agent offline");
    hub.stop().await;
}

#[tokio::test]
async fn test_subscription_fan_out_and_unsubscribe() {
    let hub = start_hub().await;
    let (agent, _) = echo_agent(&hub).await;
    let (c1, r1) = consumer(&hub, "C1");
    let (c2, r2) = consumer(&hub, "C2");
    let (c3, r3) = consumer(&hub, "C3");
    for c in [&c1, &c2, &c3] {
        c.subscribe(DTHING1, "").await.unwrap();
    }
    // resubscribing must not duplicate delivery
    c1.subscribe(DTHING1, "").await.unwrap();

    agent.pub_event("thing1", "temperature", json!(42)).unwrap();
    settle().await;
    for received in [&r1, &r2, &r3] {
        let events = events(received);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].thing_id, DTHING1);
        assert_eq!(events[0].name, "temperature");
        assert_eq!(events[0].data, json!(42));
    }

    c2.unsubscribe(DTHING1, "").await.unwrap();
    agent.pub_event("thing1", "temperature", json!(43)).unwrap();
    settle().await;
    assert_eq!(events(&r1).len(), 2);
    assert_eq!(events(&r2).len(), 1);
    assert_eq!(events(&r3).len(), 2);
    assert_eq!(events(&r3)[1].data, json!(43));

    let latest = c1.read_event(DTHING1, "temperature").await.unwrap();
    assert_eq!(latest.data, json!(43));
    hub.stop().await;
}

#[tokio::test]
async fn test_disconnect_releases_waiters() {
    let hub = start_hub().await;
    let agent = Agent::new(hub.connect_embedded("A1"));
    agent.set_request_handler(request_handler(|req, _info| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Some(req.create_response(Value::Null, None))
    }));
    agent.update_thing(&thing1_td()).await.unwrap();

    let (c1, _) = consumer(&hub, "C1");
    let invoker = c1.clone();
    let call =
        tokio::spawn(async move { invoker.invoke_action(DTHING1, "action1", json!("x")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(c1.pending_requests(), 1);
    assert_eq!(hub.router().pending_forwards(), 1);

    c1.disconnect();
    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_millis(200), call)
        .await
        .expect("call not released within 200ms")
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(matches!(result, Err(MessagingError::ConnectionLost)));
    assert_eq!(c1.pending_requests(), 0);

    settle().await;
    assert_eq!(hub.router().pending_forwards(), 0);
    hub.stop().await;
}

#[tokio::test]
async fn test_action_status_and_progress() {
    let hub = start_hub().await;
    let agent = Agent::new(hub.connect_embedded("A1"));
    let progress_agent = agent.clone();
    agent.set_request_handler(request_handler(move |req, _info| {
        let agent = progress_agent.clone();
        async move {
            agent.pub_action_progress(&req, json!("working")).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(req.create_response(json!("done"), None))
        }
    }));
    agent.update_thing(&thing1_td()).await.unwrap();

    let (c1, received) = consumer(&hub, "C1");
    let req = RequestMessage::new(op::INVOKE_ACTION, DTHING1, "action1", json!("go"))
        .with_correlation_id("cid-progress");
    let resp = c1.send_request(req, true).await.unwrap().unwrap();
    assert_eq!(resp.value, json!("done"));
    settle().await;

    let progress: Vec<ActionStatus> = received
        .lock()
        .unwrap()
        .iter()
        .filter(|n| n.operation == op::INVOKE_ACTION)
        .map(|n| {
            assert_eq!(n.correlation_id, "cid-progress");
            assert_eq!(n.thing_id, DTHING1);
            serde_json::from_value(n.data.clone()).unwrap()
        })
        .collect();
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[0].status, ActionProgress::Pending);
    assert_eq!(progress[1].status, ActionProgress::Running);
    assert_eq!(progress[1].output, json!("working"));

    let status = c1.query_action(DTHING1, "action1").await.unwrap();
    assert_eq!(status.status, ActionProgress::Completed);
    assert_eq!(status.action_id, "cid-progress");
    assert_eq!(status.output, json!("done"));
    assert_eq!(status.sender_id, "C1");

    let all = c1.query_all_actions(DTHING1).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(all.contains_key("action1"));
    hub.stop().await;
}

#[tokio::test]
async fn test_property_reads_and_writes() {
    let hub = start_hub().await;
    let (agent, seen) = echo_agent(&hub).await;
    let (c1, r1) = consumer(&hub, "C1");
    c1.observe_property(DTHING1, "property2").await.unwrap();

    let mut values = Map::new();
    values.insert("property1".into(), json!(21.5));
    values.insert("property2".into(), json!("on"));
    agent.pub_properties("thing1", values).unwrap();
    settle().await;

    let all = c1.read_all_properties(DTHING1).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["property1"].data, json!(21.5));
    let observed: Vec<NotificationMessage> = r1
        .lock()
        .unwrap()
        .iter()
        .filter(|n| n.operation == op::OBSERVE_PROPERTY)
        .cloned()
        .collect();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].name, "property2");
    assert_eq!(observed[0].data, json!("on"));

    // operators may not write properties, managers and admins may
    let err = c1
        .write_property(DTHING1, "property1", json!(22))
        .await
        .unwrap_err();
    assert_eq!(remote_status(err), 403);

    let (admin, _) = consumer(&hub, "admin1");
    let ack = admin
        .write_property(DTHING1, "property1", json!(22))
        .await
        .unwrap();
    assert_eq!(ack, json!(22));
    assert_eq!(seen.lock().unwrap().last().unwrap().operation, op::WRITE_PROPERTY);

    let err = admin
        .write_property(DTHING1, "property1", json!("warm"))
        .await
        .unwrap_err();
    assert_eq!(remote_status(err), 400);

    let err = c1.read_property(DTHING1, "nosuchprop").await.unwrap_err();
    assert_eq!(remote_status(err), 404);
    let err = c1.read_all_properties("dtw:A1:nothing").await.unwrap_err();
    assert_eq!(remote_status(err), 404);
    hub.stop().await;
}

#[tokio::test]
async fn test_request_checks() {
    let hub = start_hub().await;
    let (_agent, seen) = echo_agent(&hub).await;
    let (viewer, _) = consumer(&hub, "viewer1");
    let (c1, _) = consumer(&hub, "C1");

    let err = viewer
        .invoke_action(DTHING1, "action1", json!("x"))
        .await
        .unwrap_err();
    assert_eq!(remote_status(err), 403);

    let err = c1.invoke_action(DTHING1, "nosuchaction", json!("x")).await.unwrap_err();
    assert_eq!(remote_status(err), 404);

    let err = c1.invoke_action(DTHING1, "action1", json!(12)).await.unwrap_err();
    assert_eq!(remote_status(err), 400);

    let err = c1.invoke_action("thing1", "action1", json!("x")).await.unwrap_err();
    assert_eq!(remote_status(err), 400);

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(c1.ping().await.unwrap(), json!("pong"));
    hub.stop().await;
}

#[tokio::test]
async fn test_directory() {
    let hub = start_hub().await;
    let (_agent, _) = echo_agent(&hub).await;
    let (viewer, r_viewer) = consumer(&hub, "viewer1");
    viewer.subscribe(directory::DTHING_ID, "").await.unwrap();

    let td = viewer.read_td(DTHING1).await.unwrap();
    assert_eq!(td.id, DTHING1);
    assert!(td.actions.contains_key("action1"));
    let tds = viewer.read_all_tds(10, 0).await.unwrap();
    assert_eq!(tds.len(), 1);
    let dir_td = viewer.read_td(directory::DTHING_ID).await.unwrap();
    assert!(dir_td.actions.contains_key(directory::ACTION_REMOVE_THING));

    let err = viewer
        .invoke_action(directory::DTHING_ID, directory::ACTION_REMOVE_THING, json!(DTHING1))
        .await
        .unwrap_err();
    assert_eq!(remote_status(err), 403);

    let (admin, _) = consumer(&hub, "admin1");
    admin
        .invoke_action(directory::DTHING_ID, directory::ACTION_REMOVE_THING, json!(DTHING1))
        .await
        .unwrap();
    let err = viewer.read_td(DTHING1).await.unwrap_err();
    assert_eq!(remote_status(err), 404);

    settle().await;
    let removed: Vec<NotificationMessage> = events(&r_viewer)
        .into_iter()
        .filter(|n| n.name == directory::EVENT_THING_REMOVED)
        .collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].data, json!(DTHING1));
    hub.stop().await;
}

#[tokio::test]
async fn test_agents_publish_their_own_things_only() {
    let hub = start_hub().await;
    let (_agent, _) = echo_agent(&hub).await;
    let a2 = Agent::new(hub.connect_embedded("A2"));
    a2.update_thing(&ThingDescription::new("thing2", "Thing 2"))
        .await
        .unwrap();

    let err = a2
        .consumer()
        .invoke_action(directory::DTHING_ID, directory::ACTION_REMOVE_THING, json!(DTHING1))
        .await
        .unwrap_err();
    assert_eq!(remote_status(err), 403);

    let (c1, _) = consumer(&hub, "C1");
    let err = c1
        .invoke_action(
            directory::DTHING_ID,
            directory::ACTION_UPDATE_THING,
            serde_json::to_value(thing1_td()).unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(remote_status(err), 403);
    assert_eq!(hub.store().count(), 2);
    hub.stop().await;
}

#[tokio::test]
async fn test_agent_disconnect_fails_forwarded_requests() {
    let hub = start_hub().await;
    let agent = Agent::new(hub.connect_embedded("A1"));
    agent.set_request_handler(request_handler(|_req, _info| async move { None }));
    agent.update_thing(&thing1_td()).await.unwrap();

    let (c1, _) = consumer(&hub, "C1");
    let invoker = c1.clone();
    let call =
        tokio::spawn(async move { invoker.invoke_action(DTHING1, "action1", json!("x")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    agent.disconnect();

    let result = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote_status(result.unwrap_err()), 503);
    let status = c1.query_action(DTHING1, "action1").await.unwrap();
    assert_eq!(status.status, ActionProgress::Failed);
    hub.stop().await;
}

#[tokio::test]
async fn test_forwarded_request_times_out() {
    let mut config = test_config();
    config.rpc_timeout_secs = 1;
    config.gc_interval_secs = 1;
    let hub = start_hub_with(config).await;
    let agent = Agent::new(hub.connect_embedded("A1"));
    agent.set_request_handler(request_handler(|_req, _info| async move { None }));
    agent.update_thing(&thing1_td()).await.unwrap();

    let (c1, _) = consumer(&hub, "C1");
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        c1.invoke_action(DTHING1, "action1", json!("x")),
    )
    .await
    .expect("gc did not expire the request");
    assert_eq!(remote_status(result.unwrap_err()), 504);
    assert_eq!(hub.router().pending_forwards(), 0);
    hub.stop().await;
}

#[tokio::test]
async fn test_clients_without_role_receive_nothing() {
    let authn = test_clients();
    authn.add_client("C4", "pw", roles::OPERATOR);
    let hub = HubRuntime::start(test_config(), authn.clone()).await.unwrap();
    let (agent, _) = echo_agent(&hub).await;
    let (ghost, r_ghost) = consumer(&hub, "ghost");
    let (c4, r4) = consumer(&hub, "C4");

    let err = ghost.read_event(DTHING1, "temperature").await.unwrap_err();
    assert_eq!(remote_status(err), 403);
    let err = ghost.subscribe(DTHING1, "").await.unwrap_err();
    assert_eq!(remote_status(err), 403);
    let err = ghost.subscribe("", "").await.unwrap_err();
    assert_eq!(remote_status(err), 403);
    let err = ghost.observe_property(DTHING1, "").await.unwrap_err();
    assert_eq!(remote_status(err), 403);
    // unsubscribing is always accepted
    ghost.unsubscribe(DTHING1, "").await.unwrap();

    c4.subscribe(DTHING1, "").await.unwrap();
    c4.observe_property(DTHING1, "").await.unwrap();
    agent.pub_event("thing1", "temperature", json!(42)).unwrap();
    settle().await;
    assert_eq!(events(&r4).len(), 1);

    // a client that lost its role keeps its connection but no longer receives
    authn.remove_client("C4");
    agent.pub_event("thing1", "temperature", json!(43)).unwrap();
    agent.pub_property("thing1", "property1", json!(1)).unwrap();
    settle().await;
    assert_eq!(events(&r4).len(), 1);
    assert!(!r4
        .lock()
        .unwrap()
        .iter()
        .any(|n| n.operation == op::OBSERVE_PROPERTY));
    assert!(r_ghost.lock().unwrap().is_empty());
    hub.stop().await;
}

#[tokio::test]
async fn test_denied_affordances_are_not_delivered() {
    let hub = start_hub().await;
    let agent = Agent::new(hub.connect_embedded("A1"));
    let mut td = thing1_td().add_event("alarm", "Alarm", "boolean");
    if let Some(alarm) = td.events.get_mut("alarm") {
        alarm.deny = vec![roles::OPERATOR.into()];
    }
    if let Some(secret) = td.properties.get_mut("property2") {
        secret.allow = vec![roles::ADMIN.into()];
    }
    agent.update_thing(&td).await.unwrap();

    let (c1, r1) = consumer(&hub, "C1");
    let (viewer, r_viewer) = consumer(&hub, "viewer1");
    let err = c1.subscribe(DTHING1, "alarm").await.unwrap_err();
    assert_eq!(remote_status(err), 403);
    let err = c1.observe_property(DTHING1, "property2").await.unwrap_err();
    assert_eq!(remote_status(err), 403);
    // thing-wide subscriptions are filtered per affordance on delivery
    c1.subscribe(DTHING1, "").await.unwrap();
    c1.observe_property(DTHING1, "").await.unwrap();
    viewer.subscribe(DTHING1, "").await.unwrap();

    agent.pub_event("thing1", "alarm", json!(true)).unwrap();
    agent.pub_event("thing1", "temperature", json!(42)).unwrap();
    agent.pub_property("thing1", "property1", json!(1)).unwrap();
    agent.pub_property("thing1", "property2", json!("hidden")).unwrap();
    settle().await;

    let c1_events: Vec<String> = events(&r1).into_iter().map(|n| n.name).collect();
    assert_eq!(c1_events, vec!["temperature".to_string()]);
    let c1_props: Vec<String> = r1
        .lock()
        .unwrap()
        .iter()
        .filter(|n| n.operation == op::OBSERVE_PROPERTY)
        .map(|n| n.name.clone())
        .collect();
    assert_eq!(c1_props, vec!["property1".to_string()]);
    assert_eq!(events(&r_viewer).len(), 2);
    hub.stop().await;
}
