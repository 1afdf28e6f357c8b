// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Topic layout of the MQTT binding.
//!
//! ```text
//! things/{agentID}/{thingID}/{op}/{name}   requests and notifications
//! INBOX/{connectionID}                     responses to a client
//! INBOX/hub                                responses to the hub
//! ```

use hiveot_messaging::split_digitwin_id;

pub const THINGS_PREFIX: &str = "things";
pub const INBOX_PREFIX: &str = "INBOX/";
/// Inbox of the hub itself; agents publish their responses here.
pub const HUB_INBOX: &str = "INBOX/hub";

/// Replace characters that have a meaning in MQTT topics.
pub fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            c => c,
        })
        .collect()
}

/// Topic of a thing operation.
///
/// Digital-twin IDs are split into agent and native thing ID; other IDs are
/// placed under `agent_id`. The operation and name are used as given so
/// wildcards can be passed.
pub fn thing_topic(thing_id: &str, agent_id: &str, operation: &str, name: &str) -> String {
    let (agent, thing) = split_digitwin_id(thing_id).unwrap_or((agent_id, thing_id));
    format!(
        "{}/{}/{}/{}/{}",
        THINGS_PREFIX,
        sanitize(agent),
        sanitize(thing),
        operation,
        name
    )
}

/// Inbox topic of a client connection.
pub fn inbox_topic(connection_id: &str) -> String {
    format!("{}{}", INBOX_PREFIX, sanitize(connection_id))
}

pub fn is_inbox(topic: &str) -> bool {
    topic.starts_with(INBOX_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thing_topic() {
        assert_eq!(
            thing_topic("dtw:agent1:thing1", "", "subscribeevent", "temp"),
            "things/agent1/thing1/subscribeevent/temp"
        );
        assert_eq!(
            thing_topic("thing/1", "agent1", "invokeaction", "a"),
            "things/agent1/thing_1/invokeaction/a"
        );
        assert_eq!(inbox_topic("MQTT-1"), "INBOX/MQTT-1");
        assert!(is_inbox(HUB_INBOX));
        assert!(!is_inbox("things/a/b/c/d"));
    }
}
