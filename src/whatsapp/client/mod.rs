use crate::config::WhatsAppConfig;
use crate::models::{Credentials, SendContent};
use crate::utils::truncate_for_log;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a call the provider actually answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the message. It normally returns an ID.
    Accepted { message_id: Option<String> },
    /// The provider answered with an error body or a failure status.
    Rejected { message: String },
}

/// Outbound messaging endpoint. `Err` means the call never got an answer
/// (connect failure, timeout, unreadable body).
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn send(
        &self,
        credentials: &Credentials,
        recipient: &str,
        content: &SendContent,
    ) -> Result<SendOutcome>;
}

/// Graph API replies are a few hundred bytes; anything past this is dropped.
const MAX_REPLY_BYTES: usize = 64 * 1024;

/// Cloud API client for `POST /{version}/{phone-number-id}/messages`.
pub struct GraphApiClient {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
}

impl GraphApiClient {
    pub fn new(config: &WhatsAppConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("graph api: client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: config.graph_api_base.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
        }
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url,
            self.api_version,
            urlencode_segment(phone_number_id)
        )
    }
}

fn urlencode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// JSON body for one message.
pub(crate) fn build_payload(recipient: &str, content: &SendContent) -> Value {
    match content {
        SendContent::Text { body } => json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient,
            "type": "text",
            "text": {"preview_url": false, "body": body},
        }),
        SendContent::Template {
            name,
            language,
            components,
        } => json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient,
            "type": "template",
            "template": {
                "name": name,
                "language": {"code": language},
                "components": components,
            },
        }),
    }
}

/// Interpret a provider answer. Any non-null `error` field is a rejection
/// regardless of the HTTP status.
pub(crate) fn parse_response(status: u16, body: &str) -> SendOutcome {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if let Some(error) = parsed.as_ref().and_then(|v| v.get("error")).filter(|e| !e.is_null()) {
        return SendOutcome::Rejected {
            message: error_message(error),
        };
    }

    if !(200..300).contains(&status) {
        return SendOutcome::Rejected {
            message: format!("HTTP {}: {}", status, truncate_for_log(body.trim(), 200)),
        };
    }

    let message_id = parsed
        .as_ref()
        .and_then(|v| v.get("messages"))
        .and_then(Value::as_array)
        .and_then(|msgs| msgs.first())
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    SendOutcome::Accepted { message_id }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            let message = obj
                .get("error_user_msg")
                .or_else(|| obj.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            match obj.get("code").and_then(Value::as_i64) {
                Some(code) => format!("(#{}) {}", code, message),
                None => message.to_string(),
            }
        }
        other => other.to_string(),
    }
}

#[async_trait]
impl MessagingApi for GraphApiClient {
    async fn send(
        &self,
        credentials: &Credentials,
        recipient: &str,
        content: &SendContent,
    ) -> Result<SendOutcome> {
        let url = self.messages_url(&credentials.phone_number_id);
        debug!(
            "graph api: sending {} message to {} via {}",
            content.message_type().as_str(),
            recipient,
            credentials.phone_number_id
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credentials.access_token)
            .json(&build_payload(recipient, content))
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status().as_u16();
        let body = read_reply(response, MAX_REPLY_BYTES)
            .await
            .context("failed to read provider response")?;
        Ok(parse_response(status, &body))
    }
}

/// Read at most `cap` bytes of the reply. A longer body is cut, so an
/// oversized error page still yields a bounded rejection message.
async fn read_reply(mut response: reqwest::Response, cap: usize) -> Result<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = cap - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            debug!("graph api: reply cut at {} bytes", cap);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
