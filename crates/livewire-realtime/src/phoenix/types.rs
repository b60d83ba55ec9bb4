//! Protocol envelopes and frame builders.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::transport::ChannelOptions;

/// Topic prefix the backend uses for application channels.
pub(crate) const TOPIC_PREFIX: &str = "realtime:";

// ---------------------------------------------------------------------------
// Phoenix Protocol Types
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    fn channel(topic: &str, event: &str, payload: Value, msg_ref: String) -> Self {
        Self {
            topic: wire_topic(topic),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref),
        }
    }

    pub(crate) fn join(topic: &str, payload: Value, msg_ref: String) -> Self {
        Self::channel(topic, "phx_join", payload, msg_ref)
    }

    pub(crate) fn leave(topic: &str, msg_ref: String) -> Self {
        Self::channel(topic, "phx_leave", json!({}), msg_ref)
    }

    pub(crate) fn broadcast(topic: &str, event: &str, payload: Value, msg_ref: String) -> Self {
        Self::channel(
            topic,
            "broadcast",
            json!({
                "type": "broadcast",
                "event": event,
                "payload": payload
            }),
            msg_ref,
        )
    }

    pub(crate) fn track(topic: &str, metadata: Value, msg_ref: String) -> Self {
        Self::channel(
            topic,
            "presence",
            json!({
                "type": "presence",
                "event": "track",
                "payload": metadata
            }),
            msg_ref,
        )
    }

    pub(crate) fn untrack(topic: &str, msg_ref: String) -> Self {
        Self::channel(
            topic,
            "presence",
            json!({
                "type": "presence",
                "event": "untrack"
            }),
            msg_ref,
        )
    }

    /// Socket-level keepalive.
    pub(crate) fn heartbeat(msg_ref: String) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
        }
    }
}

pub(crate) fn wire_topic(topic: &str) -> String {
    format!("{TOPIC_PREFIX}{topic}")
}

/// Extract the short topic name from a Phoenix topic.
pub(crate) fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix(TOPIC_PREFIX).unwrap_or(topic)
}

// ---------------------------------------------------------------------------
// Channel Configuration
// ---------------------------------------------------------------------------

/// The `phx_join` payload for a channel.
pub(crate) fn join_payload(
    options: &ChannelOptions,
    presence_key: &str,
    access_token: Option<&str>,
) -> Value {
    let feeds: Vec<Value> = options
        .change_feeds
        .iter()
        .map(|feed| {
            let mut filter = json!({ "event": "*", "schema": feed.schema });
            if let Some(table) = &feed.table {
                filter["table"] = json!(table);
            }
            filter
        })
        .collect();

    let mut payload = json!({
        "config": {
            "broadcast": {
                "self": options.receive_own_broadcasts,
                "ack": false
            },
            "presence": {
                "key": presence_key
            },
            "postgres_changes": feeds
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    payload
}
