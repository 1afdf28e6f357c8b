// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Envelope <-> PUBLISH conversion.
//!
//! The payload is always the JSON envelope. The envelope kind is carried by
//! the publish itself: a publish to an inbox topic is a response, one with a
//! `ResponseTopic` property is a request, anything else a notification. The
//! payload's `messageType` must agree.

use super::packet::{Properties, Publish};
use super::topics;
use bytes::Bytes;
use hiveot_messaging::{
    Envelope, JsonConverter, MessageConverter, MessagingError, NotificationMessage,
    RequestMessage, ResponseMessage, MSG_TYPE_NOTIFICATION, MSG_TYPE_REQUEST, MSG_TYPE_RESPONSE,
};

const CONTENT_TYPE: &str = "application/json";

/// Converter for one side of an MQTT session.
#[derive(Debug, Clone)]
pub struct MqttConverter {
    /// Where the peer sends responses to our requests.
    inbox: String,
    /// Where our responses go.
    reply_to: String,
    /// Agent segment for topics of non-digitwin thing IDs.
    agent_id: String,
}

impl MqttConverter {
    /// Converter of the hub side of a client session.
    pub fn for_hub(connection_id: &str, client_id: &str) -> Self {
        Self {
            inbox: topics::HUB_INBOX.to_string(),
            reply_to: topics::inbox_topic(connection_id),
            agent_id: client_id.to_string(),
        }
    }

    /// Converter of a client.
    pub fn for_client(connection_id: &str, client_id: &str) -> Self {
        Self {
            inbox: topics::inbox_topic(connection_id),
            reply_to: topics::HUB_INBOX.to_string(),
            agent_id: client_id.to_string(),
        }
    }

    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    fn publish(topic: String, qos: u8, properties: Properties, json: String) -> Publish {
        Publish {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: None,
            properties,
            payload: Bytes::from(json),
        }
    }

    fn kind_of(publish: &Publish) -> &'static str {
        if topics::is_inbox(&publish.topic) {
            MSG_TYPE_RESPONSE
        } else if publish.properties.response_topic.is_some() {
            MSG_TYPE_REQUEST
        } else {
            MSG_TYPE_NOTIFICATION
        }
    }

    fn correlation_of(publish: &Publish) -> Option<String> {
        publish
            .properties
            .correlation_data
            .as_ref()
            .and_then(|d| String::from_utf8(d.to_vec()).ok())
    }
}

impl MessageConverter for MqttConverter {
    type Wire = Publish;

    fn encode_request(&self, req: &RequestMessage) -> Result<Publish, MessagingError> {
        let topic = topics::thing_topic(
            &req.thing_id,
            &self.agent_id,
            &req.operation,
            &topics::sanitize(&req.name),
        );
        let properties = Properties {
            response_topic: Some(self.inbox.clone()),
            correlation_data: Some(Bytes::from(req.correlation_id.clone())),
            content_type: Some(CONTENT_TYPE.to_string()),
            ..Default::default()
        };
        Ok(Self::publish(topic, 1, properties, serde_json::to_string(req)?))
    }

    fn decode_request(&self, wire: &Publish) -> Result<RequestMessage, MessagingError> {
        match self.decode(wire)? {
            Envelope::Request(req) => Ok(req),
            _ => Err(MessagingError::InvalidMessage("not a request".into())),
        }
    }

    fn encode_response(&self, resp: &ResponseMessage) -> Result<Publish, MessagingError> {
        let properties = Properties {
            correlation_data: Some(Bytes::from(resp.correlation_id.clone())),
            content_type: Some(CONTENT_TYPE.to_string()),
            ..Default::default()
        };
        Ok(Self::publish(
            self.reply_to.clone(),
            1,
            properties,
            serde_json::to_string(resp)?,
        ))
    }

    fn decode_response(&self, wire: &Publish) -> Result<ResponseMessage, MessagingError> {
        match self.decode(wire)? {
            Envelope::Response(resp) => Ok(resp),
            _ => Err(MessagingError::InvalidMessage("not a response".into())),
        }
    }

    fn encode_notification(&self, notif: &NotificationMessage) -> Result<Publish, MessagingError> {
        let agent_id = if notif.sender_id.is_empty() {
            &self.agent_id
        } else {
            &notif.sender_id
        };
        let topic = topics::thing_topic(
            &notif.thing_id,
            agent_id,
            &notif.operation,
            &topics::sanitize(&notif.name),
        );
        let properties = Properties {
            content_type: Some(CONTENT_TYPE.to_string()),
            ..Default::default()
        };
        Ok(Self::publish(
            topic,
            0,
            properties,
            serde_json::to_string(notif)?,
        ))
    }

    fn decode_notification(&self, wire: &Publish) -> Result<NotificationMessage, MessagingError> {
        match self.decode(wire)? {
            Envelope::Notification(notif) => Ok(notif),
            _ => Err(MessagingError::InvalidMessage("not a notification".into())),
        }
    }

    fn decode(&self, wire: &Publish) -> Result<Envelope, MessagingError> {
        let expected = Self::kind_of(wire);
        let mut envelope = JsonConverter.decode_bytes(&wire.payload)?;
        if envelope.message_type() != expected {
            return Err(MessagingError::InvalidMessage(format!(
                "publish on '{}' is a {} but carries a {}",
                wire.topic,
                expected,
                envelope.message_type()
            )));
        }
        if let Some(cid) = Self::correlation_of(wire) {
            match &mut envelope {
                Envelope::Request(req) if req.correlation_id.is_empty() => req.correlation_id = cid,
                Envelope::Response(resp) if resp.correlation_id.is_empty() => {
                    resp.correlation_id = cid
                }
                _ => {}
            }
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiveot_messaging::op;
    use serde_json::json;

    #[test]
    fn test_request_goes_to_thing_topic_with_inbox() {
        let client = MqttConverter::for_client("MQTT-1", "user1");
        let req = RequestMessage::new(op::INVOKE_ACTION, "dtw:agent1:thing1", "action1", json!(1))
            .with_correlation_id("c1");
        let publish = client.encode_request(&req).unwrap();
        assert_eq!(publish.topic, "things/agent1/thing1/invokeaction/action1");
        assert_eq!(publish.qos, 1);
        assert!(!publish.retain);
        assert_eq!(publish.properties.response_topic.as_deref(), Some("INBOX/MQTT-1"));

        let hub = MqttConverter::for_hub("MQTT-1", "user1");
        assert_eq!(hub.decode_request(&publish).unwrap(), req);
    }

    #[test]
    fn test_response_goes_to_client_inbox() {
        let hub = MqttConverter::for_hub("MQTT-1", "user1");
        let req = RequestMessage::new(op::READ_PROPERTY, "dtw:a:t", "p", json!(null))
            .with_correlation_id("c2");
        let resp = req.create_response(json!(5), None);
        let publish = hub.encode_response(&resp).unwrap();
        assert_eq!(publish.topic, "INBOX/MQTT-1");

        let client = MqttConverter::for_client("MQTT-1", "user1");
        let decoded = client.decode_response(&publish).unwrap();
        assert_eq!(decoded.correlation_id, "c2");
        assert_eq!(decoded.value, json!(5));
    }

    #[test]
    fn test_notification_is_qos0_and_not_retained() {
        let agent = MqttConverter::for_client("MQTT-2", "agent1");
        let mut notif = NotificationMessage::new(op::SUBSCRIBE_EVENT, "thing1", "temp", json!(42));
        notif.sender_id = "agent1".into();
        let publish = agent.encode_notification(&notif).unwrap();
        assert_eq!(publish.topic, "things/agent1/thing1/subscribeevent/temp");
        assert_eq!(publish.qos, 0);
        assert!(!publish.retain);
        assert!(matches!(
            agent.decode(&publish).unwrap(),
            Envelope::Notification(_)
        ));
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let hub = MqttConverter::for_hub("MQTT-1", "user1");
        let notif = NotificationMessage::new(op::SUBSCRIBE_EVENT, "t", "e", json!(1));
        let mut publish = hub.encode_notification(&notif).unwrap();
        publish.properties.response_topic = Some("INBOX/MQTT-1".into());
        assert!(matches!(
            hub.decode(&publish),
            Err(MessagingError::InvalidMessage(_))
        ));
    }
}
