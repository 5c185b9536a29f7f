// Shared test helpers; not every binary uses every item.
#![allow(unused)]

use async_trait::async_trait;
use chrono::Utc;
use scalazap::config::Config;
use scalazap::models::{
    Connection, ConnectionStatus, ConnectionType, Credentials, SendContent,
};
use scalazap::store::{MessageStore, SqliteStore};
use scalazap::whatsapp::{MessagingApi, SendOutcome};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub phone_number_id: String,
    pub recipient: String,
    pub content: SendContent,
    pub at: Instant,
}

/// Messaging API double. Pops scripted answers in order, then accepts
/// everything with a generated `wamid.mock-N` ID.
pub struct MockMessagingApi {
    answers: Arc<std::sync::Mutex<VecDeque<anyhow::Result<SendOutcome>>>>,
    pub calls: Arc<std::sync::Mutex<Vec<RecordedSend>>>,
}

impl MockMessagingApi {
    pub fn new() -> Self {
        Self::with_answers(Vec::new())
    }

    pub fn with_answers(answers: Vec<anyhow::Result<SendOutcome>>) -> Self {
        Self {
            answers: Arc::new(std::sync::Mutex::new(VecDeque::from(answers))),
            calls: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.recipient.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingApi for MockMessagingApi {
    async fn send(
        &self,
        credentials: &Credentials,
        recipient: &str,
        content: &SendContent,
    ) -> anyhow::Result<SendOutcome> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedSend {
                phone_number_id: credentials.phone_number_id.clone(),
                recipient: recipient.to_string(),
                content: content.clone(),
                at: Instant::now(),
            });
            calls.len()
        };
        let scripted = self.answers.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(SendOutcome::Accepted {
                message_id: Some(format!("wamid.mock-{n}")),
            })
        })
    }
}

pub fn accepted(id: &str) -> anyhow::Result<SendOutcome> {
    Ok(SendOutcome::Accepted {
        message_id: Some(id.to_string()),
    })
}

pub fn rejected(message: &str) -> anyhow::Result<SendOutcome> {
    Ok(SendOutcome::Rejected {
        message: message.to_string(),
    })
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.whatsapp.verify_token = "verify-me".to_string();
    config.dispatch.default_delay_ms = 0;
    config
}

pub fn connection(id: &str, phone_number_id: &str, status: ConnectionStatus) -> Connection {
    Connection {
        id: id.to_string(),
        name: format!("Line {id}"),
        phone_number_id: phone_number_id.to_string(),
        access_token: format!("EAAG-{id}"),
        status,
        connection_type: ConnectionType::OfficialApi,
        company_id: None,
        created_at: Utc::now(),
    }
}

/// In-memory store with one disconnected and one connected line.
pub async fn seeded_store() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
        .upsert_connection(&connection("old", "1000", ConnectionStatus::Disconnected))
        .await
        .unwrap();
    store
        .upsert_connection(&connection("main", "1098", ConnectionStatus::Connected))
        .await
        .unwrap();
    store
}

/// A Cloud API delivery carrying one text message.
pub fn text_delivery(message_id: &str, from: &str, body: &str) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "102290129340398",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "15550783881",
                        "phone_number_id": "1098"
                    },
                    "contacts": [{"profile": {"name": "Kerry Fisher"}, "wa_id": from}],
                    "messages": [{
                        "from": from,
                        "id": message_id,
                        "timestamp": "1717000000",
                        "type": "text",
                        "text": {"body": body}
                    }]
                }
            }]
        }]
    })
}
