//! Translation of inbound Phoenix messages into transport-neutral ones.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{strip_topic_prefix, PhoenixMessage};
use crate::event::{BroadcastMessage, ChangeEvent, ChangeOperation};
use crate::transport::{InboundMessage, PeerUpdate, PresenceMessage};

/// Server reply to a request we sent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
    pub(crate) status: String,
    pub(crate) response: Value,
}

impl Reply {
    pub(crate) fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub(crate) fn reason(&self) -> String {
        self.response
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string()
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Routed {
    Reply { msg_ref: String, reply: Reply },
    Deliver { topic: String, messages: Vec<InboundMessage> },
    Ignore,
}

/// Decide what to do with one inbound frame. `now` stamps presence and
/// change events.
pub(crate) fn translate(msg: &PhoenixMessage, now: Instant) -> Routed {
    let topic = strip_topic_prefix(&msg.topic);
    let deliver = |messages: Vec<InboundMessage>| Routed::Deliver {
        topic: topic.to_string(),
        messages,
    };

    match msg.event.as_str() {
        "phx_reply" => {
            let Some(msg_ref) = msg.msg_ref.clone() else {
                return Routed::Ignore;
            };
            let status = msg
                .payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("error")
                .to_string();
            let response = msg.payload.get("response").cloned().unwrap_or(Value::Null);
            Routed::Reply {
                msg_ref,
                reply: Reply { status, response },
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "channel error");
            deliver(vec![InboundMessage::ChannelError {
                reason: "channel error".to_string(),
            }])
        }
        "phx_close" => {
            info!(topic = %topic, "channel closed by server");
            deliver(vec![InboundMessage::ChannelError {
                reason: "channel closed".to_string(),
            }])
        }
        "broadcast" => {
            let event_name = msg
                .payload
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let payload = msg.payload.get("payload").cloned().unwrap_or(Value::Null);
            debug!(topic = %topic, event = %event_name, "broadcast received");
            deliver(vec![InboundMessage::Broadcast(BroadcastMessage::new(
                topic, event_name, payload,
            ))])
        }
        "presence_state" => {
            let peers = parse_presence_map(&msg.payload, now);
            debug!(topic = %topic, peers = peers.len(), "presence state received");
            deliver(vec![InboundMessage::Presence(PresenceMessage::Sync(peers))])
        }
        "presence_diff" => {
            let joins = msg
                .payload
                .get("joins")
                .map(|j| parse_presence_map(j, now))
                .unwrap_or_default();
            let leaves = msg
                .payload
                .get("leaves")
                .map(|l| parse_presence_map(l, now))
                .unwrap_or_default();
            debug!(topic = %topic, joins = joins.len(), leaves = leaves.len(), "presence diff received");

            // A key in both lists is a metadata update, not a departure.
            let rejoined: HashSet<&str> = joins.iter().map(|p| p.peer_id.as_str()).collect();
            let mut messages: Vec<InboundMessage> = leaves
                .iter()
                .filter(|p| !rejoined.contains(p.peer_id.as_str()))
                .map(|p| {
                    InboundMessage::Presence(PresenceMessage::Leave {
                        peer_id: p.peer_id.clone(),
                        at: now,
                    })
                })
                .collect();
            messages.extend(
                joins
                    .into_iter()
                    .map(|p| InboundMessage::Presence(PresenceMessage::Join(p))),
            );
            deliver(messages)
        }
        "postgres_changes" => match parse_change(topic, &msg.payload, now) {
            Some(event) => deliver(vec![InboundMessage::Change(event)]),
            None => {
                warn!(topic = %topic, "malformed postgres change, dropping");
                Routed::Ignore
            }
        },
        _ => {
            debug!(topic = %topic, event = %msg.event, "unhandled Phoenix event");
            Routed::Ignore
        }
    }
}

/// Parse a Phoenix presence map, `{ key: { metas: [..] } }`, keeping the
/// newest meta per key.
fn parse_presence_map(value: &Value, now: Instant) -> Vec<PeerUpdate> {
    let Some(obj) = value.as_object() else {
        return Vec::new();
    };
    obj.iter()
        .filter_map(|(key, entry)| {
            let meta = entry.get("metas")?.as_array()?.last()?;
            Some(PeerUpdate::at(key.clone(), strip_phx_refs(meta), now))
        })
        .collect()
}

fn strip_phx_refs(meta: &Value) -> Value {
    match meta {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "phx_ref" && k.as_str() != "phx_ref_prev")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

fn parse_change(topic: &str, payload: &Value, now: Instant) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let operation = ChangeOperation::parse(data.get("type")?.as_str()?)?;
    let table = data.get("table")?.as_str()?;
    let schema = data.get("schema").and_then(Value::as_str).unwrap_or("public");
    let row = |field: &str| {
        data.get(field)
            .filter(|v| v.as_object().is_some_and(|m| !m.is_empty()))
            .cloned()
    };
    let (before, after) = match operation {
        ChangeOperation::Insert => (None, row("record")),
        ChangeOperation::Update => (row("old_record"), row("record")),
        ChangeOperation::Delete => (row("old_record"), None),
    };
    let mut event = ChangeEvent::new(topic, table, operation, before, after).with_schema(schema);
    event.received_at = now;
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: &str, payload: Value) -> PhoenixMessage {
        PhoenixMessage {
            topic: "realtime:chat-123".into(),
            event: event.into(),
            payload,
            msg_ref: None,
        }
    }

    fn delivered(routed: Routed) -> Vec<InboundMessage> {
        match routed {
            Routed::Deliver { topic, messages } => {
                assert_eq!(topic, "chat-123");
                messages
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn reply_is_matched_by_ref() {
        let mut msg = frame(
            "phx_reply",
            json!({"status": "error", "response": {"reason": "unauthorized"}}),
        );
        msg.msg_ref = Some("12".into());
        match translate(&msg, Instant::now()) {
            Routed::Reply { msg_ref, reply } => {
                assert_eq!(msg_ref, "12");
                assert!(!reply.is_ok());
                assert_eq!(reply.reason(), "unauthorized");
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_unwraps_inner_event() {
        let messages = delivered(translate(
            &frame(
                "broadcast",
                json!({"type": "broadcast", "event": "typing", "payload": {"user": "a"}}),
            ),
            Instant::now(),
        ));
        match &messages[..] {
            [InboundMessage::Broadcast(b)] => {
                assert_eq!(b.topic, "chat-123");
                assert_eq!(b.event_name, "typing");
                assert_eq!(b.payload, json!({"user": "a"}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn presence_state_becomes_sync_with_latest_meta() {
        let now = Instant::now();
        let messages = delivered(translate(
            &frame(
                "presence_state",
                json!({
                    "alice": {"metas": [{"status": "away", "phx_ref": "a"}, {"status": "online", "phx_ref": "b"}]},
                    "bob": {"metas": []}
                }),
            ),
            now,
        ));
        match &messages[..] {
            [InboundMessage::Presence(PresenceMessage::Sync(peers))] => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].peer_id, "alice");
                assert_eq!(peers[0].metadata, json!({"status": "online"}));
                assert_eq!(peers[0].at, now);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn presence_diff_treats_rejoin_as_update() {
        let messages = delivered(translate(
            &frame(
                "presence_diff",
                json!({
                    "joins": {"alice": {"metas": [{"status": "busy"}]}},
                    "leaves": {
                        "alice": {"metas": [{"status": "online"}]},
                        "bob": {"metas": [{}]}
                    }
                }),
            ),
            Instant::now(),
        ));
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            InboundMessage::Presence(PresenceMessage::Leave { peer_id, .. }) if peer_id == "bob"
        ));
        assert!(matches!(
            &messages[1],
            InboundMessage::Presence(PresenceMessage::Join(p)) if p.peer_id == "alice"
        ));
    }

    #[test]
    fn postgres_insert_and_delete() {
        let insert = delivered(translate(
            &frame(
                "postgres_changes",
                json!({"data": {
                    "type": "INSERT", "schema": "public", "table": "messages",
                    "record": {"id": 1, "body": "hi"}, "old_record": {}
                }}),
            ),
            Instant::now(),
        ));
        match &insert[..] {
            [InboundMessage::Change(e)] => {
                assert_eq!(e.operation, ChangeOperation::Insert);
                assert_eq!(e.table, "messages");
                assert_eq!(e.before, None);
                assert_eq!(e.after, Some(json!({"id": 1, "body": "hi"})));
            }
            other => panic!("unexpected {other:?}"),
        }

        let delete = delivered(translate(
            &frame(
                "postgres_changes",
                json!({"data": {
                    "type": "DELETE", "schema": "private", "table": "messages",
                    "old_record": {"id": 1}
                }}),
            ),
            Instant::now(),
        ));
        match &delete[..] {
            [InboundMessage::Change(e)] => {
                assert_eq!(e.schema, "private");
                assert_eq!(e.before, Some(json!({"id": 1})));
                assert_eq!(e.after, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_change_and_unknown_events_are_ignored() {
        let now = Instant::now();
        assert_eq!(
            translate(&frame("postgres_changes", json!({"data": {"type": "TRUNCATE"}})), now),
            Routed::Ignore
        );
        assert_eq!(translate(&frame("system", json!({})), now), Routed::Ignore);
    }

    #[test]
    fn server_close_becomes_channel_error() {
        let messages = delivered(translate(&frame("phx_close", json!({})), Instant::now()));
        assert!(matches!(&messages[..], [InboundMessage::ChannelError { .. }]));
    }
}
