// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Hub round trips over the network bindings on loopback sockets.

use hiveot_messaging::{
    notification_handler, op, request_handler, roles, Agent, Authenticator, Connection, Consumer,
    DataSchema, MemoryAuthenticator, NotificationMessage, ThingDescription,
};
use hiveot_runtime::{HubConfig, HubRuntime};
use hiveot_transports::{HttpClientConnection, MqttClientConnection, WssClientConnection};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DTHING1: &str = "dtw:A1:thing1";

struct TestHub {
    hub: HubRuntime,
    authn: Arc<MemoryAuthenticator>,
    agent: Agent,
}

async fn start_hub() -> TestHub {
    let authn = Arc::new(MemoryAuthenticator::new());
    authn.add_client("A1", "pw", roles::AGENT);
    authn.add_client("C1", "pw1", roles::OPERATOR);
    let hub = HubRuntime::start(HubConfig::for_testing(), authn.clone())
        .await
        .unwrap();
    let agent = echo_agent(hub.connect_embedded("A1")).await;
    TestHub {
        hub,
        authn,
        agent,
    }
}

async fn echo_agent(cc: Arc<dyn Connection>) -> Agent {
    let agent = Agent::new(cc);
    agent.set_request_handler(request_handler(|req, _info| async move {
        Some(req.create_response(req.input.clone(), None))
    }));
    let td = ThingDescription::new("thing1", "Thing 1")
        .add_action(
            "action1",
            "Echo",
            Some(DataSchema::of_type("string")),
            Some(DataSchema::of_type("string")),
        )
        .add_event("temperature", "Temperature", "number");
    agent.update_thing(&td).await.unwrap();
    agent
}

/// Subscribe, invoke action1 and receive one event over the given connection.
async fn exercise_consumer(cc: Arc<dyn Connection>, hub: &TestHub) {
    let consumer = Consumer::new(cc).with_rpc_timeout(Duration::from_secs(5));
    let received = Arc::new(Mutex::new(Vec::<NotificationMessage>::new()));
    let sink = received.clone();
    consumer.set_notification_handler(notification_handler(move |notif, _info| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(notif);
        }
    }));

    assert_eq!(consumer.ping().await.unwrap(), json!("pong"));
    let output = consumer
        .invoke_action(DTHING1, "action1", json!("hello"))
        .await
        .unwrap();
    assert_eq!(output, json!("hello"));

    consumer.subscribe(DTHING1, "temperature").await.unwrap();
    hub.agent
        .pub_event("thing1", "temperature", json!(42))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events: Vec<NotificationMessage> = received
        .lock()
        .unwrap()
        .iter()
        .filter(|n| n.operation == op::SUBSCRIBE_EVENT)
        .cloned()
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].thing_id, DTHING1);
    assert_eq!(events[0].data, json!(42));
    consumer.disconnect();
}

#[tokio::test]
async fn test_wss_binding() {
    let hub = start_hub().await;
    let addr = hub.hub.http_addr().unwrap();
    let token = hub.authn.login("C1", "pw1").unwrap();
    let conn = WssClientConnection::connect(&format!("ws://{}/hiveot/wss", addr), "C1", &token)
        .await
        .unwrap();
    exercise_consumer(conn, &hub).await;

    assert!(
        WssClientConnection::connect(&format!("ws://{}/hiveot/wss", addr), "C1", "bad-token")
            .await
            .is_err()
    );
    hub.hub.stop().await;
}

#[tokio::test]
async fn test_http_sse_binding() {
    let hub = start_hub().await;
    let base = format!("http://{}", hub.hub.http_addr().unwrap());
    let token = HttpClientConnection::login(&base, "C1", "pw1").await.unwrap();
    assert!(HttpClientConnection::login(&base, "C1", "wrong").await.is_err());

    let conn = HttpClientConnection::connect(&base, "C1", &token)
        .await
        .unwrap();
    exercise_consumer(conn, &hub).await;
    hub.hub.stop().await;
}

#[tokio::test]
async fn test_http_rest_surface() {
    let hub = start_hub().await;
    let base = format!("http://{}", hub.hub.http_addr().unwrap());
    let token = hub.authn.login("C1", "pw1").unwrap();
    let http = reqwest::Client::new();

    let pong: Value = http
        .get(format!("{}/ping", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pong, json!("pong"));

    let resp = http
        .get(format!("{}/things/{}", base, DTHING1))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let td: ThingDescription = resp.json().await.unwrap();
    assert_eq!(td.id, DTHING1);
    assert!(!td.forms.is_empty());
    assert!(!td.actions["action1"].forms.is_empty());

    let resp = http
        .post(format!("{}/things/invokeaction/{}/action1", base, DTHING1))
        .bearer_auth(&token)
        .header("X-CorrelationID", "rest-1")
        .json(&json!("hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["X-CorrelationID"], "rest-1");
    assert_eq!(resp.json::<Value>().await.unwrap(), json!("hi"));

    let resp = http
        .get(format!("{}/things/readevent/{}/temperature", base, DTHING1))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = http
        .get(format!("{}/things/{}", base, DTHING1))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    hub.hub.stop().await;
}

#[tokio::test]
async fn test_mqtt_tcp_binding() {
    let hub = start_hub().await;
    let addr = hub.hub.mqtt_tcp_addr().unwrap();
    let token = hub.authn.login("C1", "pw1").unwrap();
    let conn = MqttClientConnection::connect_tcp(&addr.to_string(), "C1", &token)
        .await
        .unwrap();
    exercise_consumer(conn, &hub).await;

    assert!(
        MqttClientConnection::connect_tcp(&addr.to_string(), "C1", "bad-token")
            .await
            .is_err()
    );
    hub.hub.stop().await;
}

#[tokio::test]
async fn test_mqtt_ws_binding() {
    let hub = start_hub().await;
    let addr = hub.hub.mqtt_ws_addr().unwrap();
    let token = hub.authn.login("C1", "pw1").unwrap();
    let conn = MqttClientConnection::connect_ws(&format!("ws://{}/mqtt", addr), "C1", &token)
        .await
        .unwrap();
    exercise_consumer(conn, &hub).await;
    hub.hub.stop().await;
}

#[tokio::test]
async fn test_agent_over_wss() {
    let authn = Arc::new(MemoryAuthenticator::new());
    authn.add_client("A1", "pw", roles::AGENT);
    authn.add_client("C1", "pw1", roles::OPERATOR);
    let mut config = HubConfig::for_testing();
    config.mqtt.enabled = false;
    let hub = HubRuntime::start(config, authn.clone()).await.unwrap();
    let url = format!("ws://{}/hiveot/wss", hub.http_addr().unwrap());

    let token = authn.login("A1", "pw").unwrap();
    let agent_conn = WssClientConnection::connect(&url, "A1", &token).await.unwrap();
    let _agent = echo_agent(agent_conn).await;

    let consumer = Consumer::new(hub.connect_embedded("C1"));
    let output = consumer
        .invoke_action(DTHING1, "action1", json!("over the wire"))
        .await
        .unwrap();
    assert_eq!(output, json!("over the wire"));
    hub.stop().await;
}
