pub mod fields;
pub mod sqlite;

use crate::errors::{ScalazapError, ScalazapResult};
use crate::models::{Connection, MessageRecord, RawWebhookLog, StatusUpdate};
use async_trait::async_trait;
use fields::{FieldValue, MessageField};
use serde_json::Value;
use std::collections::HashMap;

pub use sqlite::SqliteStore;

/// Default and maximum row counts for list queries.
pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same provider message ID already exists.
    Duplicate,
}

/// Equality filters over message fields, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter {
    pub conditions: Vec<(MessageField, FieldValue)>,
    pub limit: usize,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl MessageFilter {
    pub fn with(mut self, field: MessageField, value: FieldValue) -> Self {
        self.conditions.push((field, value));
        self
    }

    /// Build a filter from query parameters named after API fields
    /// (`?fromNumber=5511...&processed=false&limit=20`).
    pub fn from_query(params: &HashMap<String, String>) -> ScalazapResult<Self> {
        let mut filter = Self::default();
        // Sort for a stable SQL shape regardless of HashMap order
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        for key in keys {
            let raw = &params[key];
            if key == "limit" {
                let limit: usize = raw.parse().map_err(|_| {
                    ScalazapError::Validation(format!("limit must be a positive integer, got {raw:?}"))
                })?;
                filter.limit = limit.clamp(1, MAX_LIST_LIMIT);
                continue;
            }
            let field = MessageField::from_api_name(key)
                .ok_or_else(|| ScalazapError::Validation(format!("unknown filter field: {key}")))?;
            filter.conditions.push((field, FieldValue::parse(field, raw)?));
        }
        Ok(filter)
    }
}

/// Changes to the mutable flags of a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageUpdate {
    pub changes: Vec<(MessageField, FieldValue)>,
}

impl MessageUpdate {
    /// Build an update from a JSON object keyed by API field names.
    ///
    /// Only fields marked mutable in the field table are accepted.
    pub fn from_json(body: &Value) -> ScalazapResult<Self> {
        let Some(map) = body.as_object() else {
            return Err(ScalazapError::Validation(
                "update body must be a JSON object".into(),
            ));
        };
        let mut changes = Vec::with_capacity(map.len());
        for (key, value) in map {
            let field = MessageField::from_api_name(key)
                .ok_or_else(|| ScalazapError::Validation(format!("unknown field: {key}")))?;
            if !field.spec().mutable {
                return Err(ScalazapError::Validation(format!(
                    "{key} cannot be changed"
                )));
            }
            changes.push((field, FieldValue::from_json(field, value)?));
        }
        if changes.is_empty() {
            return Err(ScalazapError::Validation("no fields to update".into()));
        }
        Ok(Self { changes })
    }
}

/// Ordering of delivery states; a status update never moves a message backwards.
pub fn status_rank(status: &str) -> u8 {
    match status {
        "sent" => 1,
        "delivered" => 2,
        "read" => 3,
        "failed" => 4,
        _ => 0,
    }
}

/// Persistence for messages, raw webhook logs and connections.
///
/// The uniqueness of `message_id` is the authoritative deduplication
/// mechanism; any in-process cache in front of it is best effort.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message_if_absent(&self, record: &MessageRecord)
    -> ScalazapResult<InsertOutcome>;

    async fn get_message(&self, message_id: &str) -> ScalazapResult<Option<MessageRecord>>;

    async fn list_messages(&self, filter: &MessageFilter) -> ScalazapResult<Vec<MessageRecord>>;

    /// Returns `false` when no message has that ID.
    async fn update_message(&self, message_id: &str, update: &MessageUpdate)
    -> ScalazapResult<bool>;

    /// Apply a provider delivery status to one of our outbound messages.
    /// Returns `false` when the message is unknown or the status is stale.
    async fn apply_status(&self, update: &StatusUpdate) -> ScalazapResult<bool>;

    /// Delete every message record. Returns the number removed.
    async fn clear_messages(&self) -> ScalazapResult<usize>;

    async fn append_webhook_log(&self, log: &RawWebhookLog) -> ScalazapResult<i64>;

    async fn recent_webhook_logs(&self, limit: usize) -> ScalazapResult<Vec<RawWebhookLog>>;

    async fn upsert_connection(&self, connection: &Connection) -> ScalazapResult<()>;

    async fn get_connection(&self, id: &str) -> ScalazapResult<Option<Connection>>;

    /// First connection with status `connected` in insertion order,
    /// optionally restricted to one company.
    async fn first_connected(&self, company_id: Option<&str>)
    -> ScalazapResult<Option<Connection>>;

    async fn list_connections(&self) -> ScalazapResult<Vec<Connection>>;
}
