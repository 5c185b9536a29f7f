//! Normalization of Cloud API webhook deliveries.
//!
//! Deliveries nest messages as `entry[] → changes[] → value → messages[]`.
//! Every level is optional; a missing or mistyped level yields nothing
//! rather than an error.

use crate::config::VerifyTokenMode;
use crate::models::{MessageRecord, MessageType, StatusUpdate};
use crate::utils::normalize_phone;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Body returned for verification probes that do not pass.
pub const NEUTRAL_VERIFY_BODY: &str = "ok";

/// Query parameters of a `GET /webhook` verification probe.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Echo this challenge back verbatim.
    Accepted(String),
    Rejected(&'static str),
}

pub fn verify_subscription(
    query: &VerifyQuery,
    expected_token: &str,
    mode: VerifyTokenMode,
) -> VerifyOutcome {
    if query.mode.as_deref() != Some("subscribe") {
        return VerifyOutcome::Rejected("mode is not subscribe");
    }
    let Some(presented) = query.verify_token.as_deref() else {
        return VerifyOutcome::Rejected("missing verify token");
    };
    if !token_matches(expected_token, presented, mode) {
        return VerifyOutcome::Rejected("verify token mismatch");
    }
    match &query.challenge {
        Some(challenge) => VerifyOutcome::Accepted(challenge.clone()),
        None => VerifyOutcome::Rejected("missing challenge"),
    }
}

/// Compare a presented verify token against the configured one.
///
/// An empty configured token never matches.
pub fn token_matches(expected: &str, presented: &str, mode: VerifyTokenMode) -> bool {
    if expected.is_empty() {
        return false;
    }
    match mode {
        VerifyTokenMode::Exact => expected.as_bytes().ct_eq(presented.as_bytes()).into(),
        VerifyTokenMode::Prefix => {
            presented.len() >= expected.len()
                && bool::from(
                    presented.as_bytes()[..expected.len()].ct_eq(expected.as_bytes()),
                )
        }
    }
}

/// Validate an `X-Hub-Signature-256` header (`sha256=<hex>`) against the body.
pub fn validate_signature(app_secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    expected.as_bytes().ct_eq(sig.as_bytes()).into()
}

/// Everything of interest found in one delivery, in payload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDelivery {
    pub messages: Vec<MessageRecord>,
    pub statuses: Vec<StatusUpdate>,
    /// Message objects skipped because they had no ID or sender.
    pub skipped: usize,
}

impl ParsedDelivery {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.statuses.is_empty()
    }
}

fn array<'a>(value: Option<&'a Value>) -> &'a [Value] {
    value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Walk every entry, change and message in a delivery.
pub fn parse_delivery(payload: &Value, received_at: DateTime<Utc>) -> ParsedDelivery {
    let mut parsed = ParsedDelivery::default();
    for entry in array(payload.get("entry")) {
        for change in array(entry.get("changes")) {
            let Some(value) = change.get("value") else {
                continue;
            };
            let contacts = array(value.get("contacts"));
            let metadata = value.get("metadata");
            let phone_number_id = metadata
                .and_then(|m| str_field(m, "phone_number_id"))
                .unwrap_or_default();
            let display_number = metadata
                .and_then(|m| str_field(m, "display_phone_number"))
                .map(normalize_phone)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| phone_number_id.to_string());

            for message in array(value.get("messages")) {
                match normalize_message(
                    message,
                    contacts,
                    phone_number_id,
                    &display_number,
                    received_at,
                ) {
                    Some(record) => parsed.messages.push(record),
                    None => parsed.skipped += 1,
                }
            }

            for status in array(value.get("statuses")) {
                if let (Some(id), Some(state)) = (str_field(status, "id"), str_field(status, "status"))
                {
                    parsed.statuses.push(StatusUpdate {
                        message_id: id.to_string(),
                        status: state.to_string(),
                        recipient: str_field(status, "recipient_id").map(str::to_string),
                    });
                }
            }
        }
    }
    parsed
}

fn normalize_message(
    message: &Value,
    contacts: &[Value],
    phone_number_id: &str,
    display_number: &str,
    received_at: DateTime<Utc>,
) -> Option<MessageRecord> {
    let message_id = str_field(message, "id")?;
    let from = str_field(message, "from")?;
    let kind = str_field(message, "type").unwrap_or("text");
    let message_type = MessageType::from_provider(kind);

    let media_id = if message_type.has_media() {
        message
            .get(kind)
            .and_then(|m| str_field(m, "id"))
            .map(str::to_string)
    } else {
        None
    };

    Some(MessageRecord {
        message_id: message_id.to_string(),
        from_number: from.to_string(),
        to_number: display_number.to_string(),
        contact_name: contact_name(contacts, from),
        body: message_body(message, kind),
        message_type,
        phone_number_id: phone_number_id.to_string(),
        timestamp: parse_timestamp(message.get("timestamp")).unwrap_or(received_at),
        is_from_me: false,
        processed: false,
        replied: false,
        media_id,
        status: None,
    })
}

/// Profile name of the contact matching the sender, else the first contact's.
fn contact_name(contacts: &[Value], from: &str) -> Option<String> {
    let profile_name = |c: &Value| {
        c.get("profile")
            .and_then(|p| str_field(p, "name"))
            .map(str::to_string)
    };
    contacts
        .iter()
        .find(|c| str_field(c, "wa_id") == Some(from))
        .and_then(profile_name)
        .or_else(|| contacts.first().and_then(profile_name))
}

fn message_body(message: &Value, kind: &str) -> String {
    let body = match kind {
        "text" => message.get("text").and_then(|t| str_field(t, "body")),
        "button" => message.get("button").and_then(|b| str_field(b, "text")),
        "interactive" => message.get("interactive").and_then(|i| {
            i.get("button_reply")
                .or_else(|| i.get("list_reply"))
                .and_then(|r| str_field(r, "title"))
        }),
        other => message.get(other).and_then(|m| str_field(m, "caption")),
    };
    body.unwrap_or_default().to_string()
}

/// The provider sends epoch seconds, usually as a string.
fn parse_timestamp(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    let secs = match raw? {
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Utc.timestamp_opt(secs, 0).single()
}
