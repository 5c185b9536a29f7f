//! Domain records shared by ingestion, dispatch and the store.

use crate::errors::{ScalazapError, ScalazapResult};
use crate::utils::normalize_phone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical message kinds. Provider types outside this set map to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Sticker,
    Template,
    Unknown,
}

impl MessageType {
    pub fn from_provider(kind: &str) -> Self {
        match kind {
            "text" | "button" | "interactive" => Self::Text,
            "image" => Self::Image,
            "audio" | "voice" => Self::Audio,
            "video" => Self::Video,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "template" => Self::Template,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Template => "template",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the provider payload carries a downloadable media object.
    pub fn has_media(self) -> bool {
        matches!(
            self,
            Self::Image | Self::Audio | Self::Video | Self::Document | Self::Sticker
        )
    }
}

/// A stored message, inbound (`is_from_me == false`) or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub message_id: String,
    pub from_number: String,
    pub to_number: String,
    pub contact_name: Option<String>,
    pub body: String,
    pub message_type: MessageType,
    pub phone_number_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub processed: bool,
    pub replied: bool,
    pub media_id: Option<String>,
    pub status: Option<String>,
}

impl MessageRecord {
    /// Record for a message we just handed to the provider.
    pub fn outbound(
        message_id: String,
        phone_number_id: &str,
        recipient: &str,
        content: &SendContent,
    ) -> Self {
        Self {
            message_id,
            from_number: phone_number_id.to_string(),
            to_number: recipient.to_string(),
            contact_name: None,
            body: content.summary(),
            message_type: content.message_type(),
            phone_number_id: phone_number_id.to_string(),
            timestamp: Utc::now(),
            is_from_me: true,
            processed: true,
            replied: false,
            media_id: None,
            status: Some("sent".to_string()),
        }
    }
}

/// Delivery status reported by the provider for one of our messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: String,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Pending,
    Other(String),
}

impl From<String> for ConnectionStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ConnectionStatus> for String {
    fn from(status: ConnectionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl ConnectionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "pending" => Self::Pending,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Pending => "pending",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ConnectionType {
    OfficialApi,
    Other(String),
}

impl From<String> for ConnectionType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ConnectionType> for String {
    fn from(kind: ConnectionType) -> Self {
        kind.as_str().to_string()
    }
}

impl ConnectionType {
    pub fn parse(s: &str) -> Self {
        match s {
            "official_api" => Self::OfficialApi,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::OfficialApi => "official_api",
            Self::Other(s) => s,
        }
    }
}

/// One provisioned messaging line.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub phone_number_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub status: ConnectionStatus,
    pub connection_type: ConnectionType,
    pub company_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &"[REDACTED]")
            .field("status", &self.status)
            .field("connection_type", &self.connection_type)
            .field("company_id", &self.company_id)
            .finish_non_exhaustive()
    }
}

/// Sender identifier plus bearer token for the messaging API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub phone_number_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Where a raw webhook delivery came in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookSource {
    Verify,
    Event,
}

impl WebhookSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "verify" { Self::Verify } else { Self::Event }
    }
}

/// Append-only diagnostic copy of an inbound HTTP delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWebhookLog {
    #[serde(default)]
    pub id: i64,
    pub source: WebhookSource,
    pub method: String,
    pub headers: Value,
    pub query: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Template language, accepted either as `"pt_BR"` or `{"code": "pt_BR"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateLanguage {
    Code(String),
    Object { code: String },
}

impl TemplateLanguage {
    pub fn code(&self) -> &str {
        match self {
            Self::Code(code) | Self::Object { code } => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: Option<TemplateLanguage>,
    #[serde(default)]
    pub components: Option<Vec<Value>>,
}

/// Validated message content.
#[derive(Debug, Clone, PartialEq)]
pub enum SendContent {
    Text {
        body: String,
    },
    Template {
        name: String,
        language: String,
        components: Vec<Value>,
    },
}

impl SendContent {
    /// Text stored in the message record body column.
    pub fn summary(&self) -> String {
        match self {
            Self::Text { body } => body.clone(),
            Self::Template { name, .. } => format!("[template: {}]", name),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Text { .. } => MessageType::Text,
            Self::Template { .. } => MessageType::Template,
        }
    }
}

/// One outbound instruction as submitted by a caller.
///
/// Deserialization never fails on the item itself: a recipient given as a
/// JSON number is accepted, and any other shape problem is kept on the
/// request and surfaces from [`OutboundSendRequest::validate`], so a batch
/// reports it against that item alone.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OutboundSendRequest {
    pub to: String,
    pub message: Option<String>,
    pub template: Option<TemplateRef>,
    #[serde(skip)]
    pub(crate) malformed: Option<String>,
}

#[derive(Deserialize)]
struct RawSendRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    template: Option<TemplateRef>,
}

impl<'de> Deserialize<'de> for OutboundSendRequest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl OutboundSendRequest {
    pub fn text(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Lenient conversion from an arbitrary JSON item.
    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            return Self {
                malformed: Some("message item must be an object".into()),
                ..Self::default()
            };
        }
        let (to, bad_recipient) = match value.get("to") {
            None | Some(Value::Null) => (String::new(), false),
            Some(Value::String(s)) => (s.clone(), false),
            Some(Value::Number(n)) => (n.to_string(), false),
            Some(other) => (other.to_string(), true),
        };
        if bad_recipient {
            return Self {
                to,
                malformed: Some("to must be a string or number".into()),
                ..Self::default()
            };
        }
        match serde_json::from_value::<RawSendRequest>(value) {
            Ok(raw) => Self {
                to,
                message: raw.message,
                template: raw.template,
                malformed: None,
            },
            Err(e) => Self {
                to,
                malformed: Some(format!("invalid message item: {}", e)),
                ..Self::default()
            },
        }
    }

    /// Normalize the recipient and validate the content.
    ///
    /// Returns the digits-only recipient together with the content to send.
    pub fn validate(&self) -> ScalazapResult<(String, SendContent)> {
        if let Some(reason) = &self.malformed {
            return Err(ScalazapError::Validation(reason.clone()));
        }
        let recipient = normalize_phone(&self.to);
        if recipient.is_empty() {
            return Err(ScalazapError::Validation(
                "recipient phone number is required".into(),
            ));
        }

        if let Some(template) = &self.template {
            if template.name.trim().is_empty() {
                return Err(ScalazapError::Validation(
                    "template name is required".into(),
                ));
            }
            let Some(language) = template.language.as_ref().filter(|l| !l.code().is_empty())
            else {
                return Err(ScalazapError::Validation(
                    "template language code is required".into(),
                ));
            };
            let Some(components) = template.components.clone() else {
                return Err(ScalazapError::Validation(
                    "template components are required".into(),
                ));
            };
            return Ok((
                recipient,
                SendContent::Template {
                    name: template.name.clone(),
                    language: language.code().to_string(),
                    components,
                },
            ));
        }

        match self.message.as_deref() {
            Some(body) if !body.trim().is_empty() => Ok((
                recipient,
                SendContent::Text {
                    body: body.to_string(),
                },
            )),
            _ => Err(ScalazapError::Validation("message is required".into())),
        }
    }
}
