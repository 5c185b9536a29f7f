use super::{InsertOutcome, MessageFilter, MessageStore, MessageUpdate, status_rank};
use crate::errors::{ScalazapError, ScalazapResult};
use crate::models::{
    Connection, ConnectionStatus, ConnectionType, MessageRecord, MessageType, RawWebhookLog,
    StatusUpdate, WebhookSource,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection as SqlConnection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const MESSAGE_COLUMNS: &str = "message_id, from_number, to_number, contact_name, body, \
     message_type, phone_number_id, timestamp, is_from_me, processed, replied, media_id, status";

const CONNECTION_COLUMNS: &str =
    "id, name, phone_number_id, access_token, status, connection_type, company_id, created_at";

/// SQLite-backed [`MessageStore`].
pub struct SqliteStore {
    conn: Mutex<SqlConnection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create database parent directory: {}",
                    parent.display()
                )
            })?;
        }

        let conn = SqlConnection::open(db_path)
            .with_context(|| format!("Failed to open database at: {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;",
        )?;
        Self::with_connection(conn).with_context(|| {
            format!(
                "Failed to initialize database schema at: {}",
                db_path.display()
            )
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(SqlConnection::open_in_memory()?)
    }

    fn with_connection(conn: SqlConnection) -> anyhow::Result<Self> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> ScalazapResult<MutexGuard<'_, SqlConnection>> {
        self.conn
            .lock()
            .map_err(|e| ScalazapError::Store(format!("DB lock poisoned: {}", e)))
    }
}

fn ensure_schema(conn: &SqlConnection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            message_id TEXT NOT NULL UNIQUE,
            from_number TEXT NOT NULL,
            to_number TEXT NOT NULL,
            contact_name TEXT,
            body TEXT NOT NULL,
            message_type TEXT NOT NULL,
            phone_number_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            is_from_me INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            replied INTEGER NOT NULL DEFAULT 0,
            media_id TEXT,
            status TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS webhook_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            method TEXT NOT NULL,
            headers TEXT NOT NULL,
            query TEXT,
            body TEXT NOT NULL,
            received_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS connections (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone_number_id TEXT NOT NULL,
            access_token TEXT NOT NULL,
            status TEXT NOT NULL,
            connection_type TEXT NOT NULL,
            company_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
         CREATE INDEX IF NOT EXISTS idx_messages_from ON messages(from_number);
         CREATE INDEX IF NOT EXISTS idx_connections_status ON connections(status);",
    )?;
    Ok(())
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let message_type: String = row.get(5)?;
    let timestamp: String = row.get(7)?;
    Ok(MessageRecord {
        message_id: row.get(0)?,
        from_number: row.get(1)?,
        to_number: row.get(2)?,
        contact_name: row.get(3)?,
        body: row.get(4)?,
        message_type: MessageType::from_provider(&message_type),
        phone_number_id: row.get(6)?,
        timestamp: parse_ts(&timestamp),
        is_from_me: row.get(8)?,
        processed: row.get(9)?,
        replied: row.get(10)?,
        media_id: row.get(11)?,
        status: row.get(12)?,
    })
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connection> {
    let status: String = row.get(4)?;
    let connection_type: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number_id: row.get(2)?,
        access_token: row.get(3)?,
        status: ConnectionStatus::parse(&status),
        connection_type: ConnectionType::parse(&connection_type),
        company_id: row.get(6)?,
        created_at: parse_ts(&created_at),
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawWebhookLog> {
    let source: String = row.get(1)?;
    let headers: String = row.get(3)?;
    let received_at: String = row.get(6)?;
    Ok(RawWebhookLog {
        id: row.get(0)?,
        source: WebhookSource::parse(&source),
        method: row.get(2)?,
        headers: serde_json::from_str(&headers).unwrap_or(serde_json::Value::Null),
        query: row.get(4)?,
        body: row.get(5)?,
        received_at: parse_ts(&received_at),
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message_if_absent(
        &self,
        record: &MessageRecord,
    ) -> ScalazapResult<InsertOutcome> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                record.message_id,
                record.from_number,
                record.to_number,
                record.contact_name,
                record.body,
                record.message_type.as_str(),
                record.phone_number_id,
                format_ts(&record.timestamp),
                record.is_from_me,
                record.processed,
                record.replied,
                record.media_id,
                record.status,
            ],
        )?;
        if changed == 0 {
            debug!("store: message {} already present", record.message_id);
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn get_message(&self, message_id: &str) -> ScalazapResult<Option<MessageRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![message_id],
                row_to_message,
            )
            .optional()?;
        Ok(record)
    }

    async fn list_messages(&self, filter: &MessageFilter) -> ScalazapResult<Vec<MessageRecord>> {
        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages");
        let mut values = Vec::with_capacity(filter.conditions.len() + 1);
        for (i, (field, value)) in filter.conditions.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("{} = ?{}", field.column(), i + 1));
            values.push(value.to_sql());
        }
        sql.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT ?{}",
            values.len() + 1
        ));
        values.push(rusqlite::types::Value::Integer(filter.limit as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_message)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn update_message(
        &self,
        message_id: &str,
        update: &MessageUpdate,
    ) -> ScalazapResult<bool> {
        if update.changes.is_empty() {
            return Ok(false);
        }
        let mut assignments = Vec::with_capacity(update.changes.len());
        let mut values = Vec::with_capacity(update.changes.len() + 1);
        for (i, (field, value)) in update.changes.iter().enumerate() {
            assignments.push(format!("{} = ?{}", field.column(), i + 1));
            values.push(value.to_sql());
        }
        let sql = format!(
            "UPDATE messages SET {} WHERE message_id = ?{}",
            assignments.join(", "),
            values.len() + 1
        );
        values.push(rusqlite::types::Value::Text(message_id.to_string()));

        let conn = self.conn()?;
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed > 0)
    }

    async fn apply_status(&self, update: &StatusUpdate) -> ScalazapResult<bool> {
        let conn = self.conn()?;
        let current: Option<Option<String>> = conn
            .query_row(
                "SELECT status FROM messages WHERE message_id = ?1 AND is_from_me = 1",
                params![update.message_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };
        if current
            .as_deref()
            .is_some_and(|c| status_rank(c) >= status_rank(&update.status))
        {
            return Ok(false);
        }
        let changed = conn.execute(
            "UPDATE messages SET status = ?1 WHERE message_id = ?2",
            params![update.status, update.message_id],
        )?;
        Ok(changed > 0)
    }

    async fn clear_messages(&self) -> ScalazapResult<usize> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM messages", [])?;
        Ok(removed)
    }

    async fn append_webhook_log(&self, log: &RawWebhookLog) -> ScalazapResult<i64> {
        let headers = serde_json::to_string(&log.headers)
            .map_err(|e| ScalazapError::Store(format!("failed to encode headers: {}", e)))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO webhook_logs (source, method, headers, query, body, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                log.source.as_str(),
                log.method,
                headers,
                log.query,
                log.body,
                format_ts(&log.received_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn recent_webhook_logs(&self, limit: usize) -> ScalazapResult<Vec<RawWebhookLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, source, method, headers, query, body, received_at
             FROM webhook_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_log)?;
        let logs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    async fn upsert_connection(&self, connection: &Connection) -> ScalazapResult<()> {
        let conn = self.conn()?;
        // ON CONFLICT keeps the original rowid, so "first connected" order is stable
        conn.execute(
            &format!(
                "INSERT INTO connections ({CONNECTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    phone_number_id = excluded.phone_number_id,
                    access_token = excluded.access_token,
                    status = excluded.status,
                    connection_type = excluded.connection_type,
                    company_id = excluded.company_id"
            ),
            params![
                connection.id,
                connection.name,
                connection.phone_number_id,
                connection.access_token,
                connection.status.as_str(),
                connection.connection_type.as_str(),
                connection.company_id,
                format_ts(&connection.created_at),
            ],
        )?;
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> ScalazapResult<Option<Connection>> {
        let conn = self.conn()?;
        let connection = conn
            .query_row(
                &format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?1"),
                params![id],
                row_to_connection,
            )
            .optional()?;
        Ok(connection)
    }

    async fn first_connected(
        &self,
        company_id: Option<&str>,
    ) -> ScalazapResult<Option<Connection>> {
        let conn = self.conn()?;
        let connection = conn
            .query_row(
                &format!(
                    "SELECT {CONNECTION_COLUMNS} FROM connections
                     WHERE status = 'connected' AND (?1 IS NULL OR company_id = ?1)
                     ORDER BY rowid ASC LIMIT 1"
                ),
                params![company_id],
                row_to_connection,
            )
            .optional()?;
        Ok(connection)
    }

    async fn list_connections(&self) -> ScalazapResult<Vec<Connection>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections ORDER BY rowid ASC"
        ))?;
        let rows = stmt.query_map([], row_to_connection)?;
        let connections = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(connections)
    }
}
