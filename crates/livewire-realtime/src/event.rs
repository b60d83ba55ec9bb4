//! Typed events delivered to listeners.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Row changes
// ---------------------------------------------------------------------------

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    /// Parse the wire name (`INSERT`, `UPDATE`, `DELETE`), case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A row-level change on a topic.
///
/// `before` is absent for inserts, `after` is absent for deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub topic: String,
    pub schema: String,
    pub table: String,
    pub operation: ChangeOperation,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub received_at: Instant,
}

impl ChangeEvent {
    pub fn insert(topic: &str, table: &str, row: Value) -> Self {
        Self::new(topic, table, ChangeOperation::Insert, None, Some(row))
    }

    pub fn update(topic: &str, table: &str, before: Value, after: Value) -> Self {
        Self::new(topic, table, ChangeOperation::Update, Some(before), Some(after))
    }

    pub fn delete(topic: &str, table: &str, before: Value) -> Self {
        Self::new(topic, table, ChangeOperation::Delete, Some(before), None)
    }

    pub fn new(
        topic: &str,
        table: &str,
        operation: ChangeOperation,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            schema: "public".to_string(),
            table: table.to_string(),
            operation,
            before,
            after,
            received_at: Instant::now(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// The row this change leaves behind, or the removed row for deletes.
    pub fn row(&self) -> Option<&Value> {
        self.after.as_ref().or(self.before.as_ref())
    }

    /// Apply this change to a keyed local collection: upsert on insert/update,
    /// remove on delete. Returns whether `rows` changed.
    ///
    /// Changes whose row has no `key_column` are ignored.
    pub fn apply_keyed(&self, rows: &mut HashMap<String, Value>, key_column: &str) -> bool {
        let Some(key) = self.row().and_then(|row| row.get(key_column)).map(key_string) else {
            return false;
        };
        match (self.operation, &self.after) {
            (ChangeOperation::Delete, _) => rows.remove(&key).is_some(),
            (_, Some(after)) => rows.insert(key, after.clone()).as_ref() != Some(after),
            (_, None) => false,
        }
    }
}

fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Predicate over change events. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeFilter {
    pub table: Option<String>,
    pub operations: Option<Vec<ChangeOperation>>,
}

impl ChangeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Restrict to `operation`. Repeated calls widen the set.
    pub fn operation(mut self, operation: ChangeOperation) -> Self {
        let ops = self.operations.get_or_insert_with(Vec::new);
        if !ops.contains(&operation) {
            ops.push(operation);
        }
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let table_ok = self.table.as_deref().map_or(true, |t| t == event.table);
        let op_ok = self
            .operations
            .as_ref()
            .map_or(true, |ops| ops.contains(&event.operation));
        table_ok && op_ok
    }
}

// ---------------------------------------------------------------------------
// Broadcasts
// ---------------------------------------------------------------------------

/// Ephemeral peer-to-peer message on a topic. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub topic: String,
    pub event_name: String,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(topic: &str, event_name: &str, payload: Value) -> Self {
        Self {
            topic: topic.to_string(),
            event_name: event_name.to_string(),
            payload,
            sent_at: Utc::now(),
        }
    }
}

/// An entry in a channel's recent-event history.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Change(ChangeEvent),
    Broadcast(BroadcastMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_parse_is_case_insensitive() {
        assert_eq!(ChangeOperation::parse("insert"), Some(ChangeOperation::Insert));
        assert_eq!(ChangeOperation::parse("UPDATE"), Some(ChangeOperation::Update));
        assert_eq!(ChangeOperation::parse("Delete"), Some(ChangeOperation::Delete));
        assert_eq!(ChangeOperation::parse("TRUNCATE"), None);
        assert_eq!(ChangeOperation::Delete.as_str(), "DELETE");
    }

    #[test]
    fn operation_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&ChangeOperation::Insert).unwrap(), "\"INSERT\"");
    }

    #[test]
    fn filter_matches_table_and_operation() {
        let insert = ChangeEvent::insert("chat-123", "messages", json!({"id": 1}));
        let delete = ChangeEvent::delete("chat-123", "messages", json!({"id": 1}));
        let other = ChangeEvent::insert("chat-123", "reactions", json!({"id": 9}));

        assert!(ChangeFilter::all().matches(&insert));
        assert!(ChangeFilter::all().matches(&other));

        let messages = ChangeFilter::all().table("messages");
        assert!(messages.matches(&insert));
        assert!(!messages.matches(&other));

        let inserts = messages.clone().operation(ChangeOperation::Insert);
        assert!(inserts.matches(&insert));
        assert!(!inserts.matches(&delete));

        let both = inserts.operation(ChangeOperation::Delete);
        assert!(both.matches(&delete));
    }

    #[test]
    fn apply_keyed_upserts_and_removes() {
        let mut rows = HashMap::new();

        let insert = ChangeEvent::insert("t", "messages", json!({"id": 1, "body": "hi"}));
        assert!(insert.apply_keyed(&mut rows, "id"));
        assert_eq!(rows["1"], json!({"id": 1, "body": "hi"}));

        // Replaying the same insert leaves the collection unchanged.
        assert!(!insert.apply_keyed(&mut rows, "id"));

        let update = ChangeEvent::update(
            "t",
            "messages",
            json!({"id": 1, "body": "hi"}),
            json!({"id": 1, "body": "edited"}),
        );
        assert!(update.apply_keyed(&mut rows, "id"));
        assert_eq!(rows["1"]["body"], "edited");

        let delete = ChangeEvent::delete("t", "messages", json!({"id": 1}));
        assert!(delete.apply_keyed(&mut rows, "id"));
        assert!(rows.is_empty());
        assert!(!delete.apply_keyed(&mut rows, "id"));
    }

    #[test]
    fn apply_keyed_ignores_rows_without_key() {
        let mut rows = HashMap::new();
        let insert = ChangeEvent::insert("t", "messages", json!({"body": "no id"}));
        assert!(!insert.apply_keyed(&mut rows, "id"));
        assert!(rows.is_empty());
    }

    #[test]
    fn string_keys_are_not_quoted() {
        let mut rows = HashMap::new();
        ChangeEvent::insert("t", "users", json!({"uuid": "u-1"})).apply_keyed(&mut rows, "uuid");
        assert!(rows.contains_key("u-1"));
    }
}
