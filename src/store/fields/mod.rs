//! Statically declared mapping between API field names and store columns.
//!
//! Every filter and update that reaches the store goes through this table.
//! Unknown API names are rejected instead of being passed through.

use crate::errors::{ScalazapError, ScalazapResult};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
}

/// Message columns addressable from the API. Discriminants index `MESSAGE_FIELDS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageField {
    MessageId = 0,
    FromNumber,
    ToNumber,
    ContactName,
    MessageType,
    PhoneNumberId,
    IsFromMe,
    Processed,
    Replied,
    Status,
}

#[derive(Debug)]
pub struct FieldSpec {
    pub field: MessageField,
    pub api_name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    /// Whether callers may change the value after the record is created.
    pub mutable: bool,
}

#[rustfmt::skip]
pub const MESSAGE_FIELDS: &[FieldSpec] = &[
    FieldSpec { field: MessageField::MessageId, api_name: "messageId", column: "message_id", kind: FieldKind::Text, mutable: false },
    FieldSpec { field: MessageField::FromNumber, api_name: "fromNumber", column: "from_number", kind: FieldKind::Text, mutable: false },
    FieldSpec { field: MessageField::ToNumber, api_name: "toNumber", column: "to_number", kind: FieldKind::Text, mutable: false },
    FieldSpec { field: MessageField::ContactName, api_name: "contactName", column: "contact_name", kind: FieldKind::Text, mutable: false },
    FieldSpec { field: MessageField::MessageType, api_name: "messageType", column: "message_type", kind: FieldKind::Text, mutable: false },
    FieldSpec { field: MessageField::PhoneNumberId, api_name: "phoneNumberId", column: "phone_number_id", kind: FieldKind::Text, mutable: false },
    FieldSpec { field: MessageField::IsFromMe, api_name: "isFromMe", column: "is_from_me", kind: FieldKind::Bool, mutable: false },
    FieldSpec { field: MessageField::Processed, api_name: "processed", column: "processed", kind: FieldKind::Bool, mutable: true },
    FieldSpec { field: MessageField::Replied, api_name: "replied", column: "replied", kind: FieldKind::Bool, mutable: true },
    FieldSpec { field: MessageField::Status, api_name: "status", column: "status", kind: FieldKind::Text, mutable: false },
];

const _: () = {
    let mut i = 0;
    while i < MESSAGE_FIELDS.len() {
        assert!(
            MESSAGE_FIELDS[i].field as usize == i,
            "MESSAGE_FIELDS must be ordered by MessageField discriminant"
        );
        i += 1;
    }
    assert!(MESSAGE_FIELDS.len() == MessageField::Status as usize + 1);
};

impl MessageField {
    pub fn spec(self) -> &'static FieldSpec {
        &MESSAGE_FIELDS[self as usize]
    }

    pub fn column(self) -> &'static str {
        self.spec().column
    }

    pub fn api_name(self) -> &'static str {
        self.spec().api_name
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        MESSAGE_FIELDS
            .iter()
            .find(|spec| spec.api_name == name)
            .map(|spec| spec.field)
    }
}

/// A typed value for one field, checked against the field's kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
}

impl FieldValue {
    /// Parse a query-string value for `field`.
    pub fn parse(field: MessageField, raw: &str) -> ScalazapResult<Self> {
        match field.spec().kind {
            FieldKind::Text => Ok(Self::Text(raw.to_string())),
            FieldKind::Bool => match raw {
                "true" | "1" => Ok(Self::Bool(true)),
                "false" | "0" => Ok(Self::Bool(false)),
                _ => Err(ScalazapError::Validation(format!(
                    "{} expects true or false, got {:?}",
                    field.api_name(),
                    raw
                ))),
            },
        }
    }

    /// Convert a JSON body value for `field`.
    pub fn from_json(field: MessageField, value: &Value) -> ScalazapResult<Self> {
        match (field.spec().kind, value) {
            (FieldKind::Text, Value::String(s)) => Ok(Self::Text(s.clone())),
            (FieldKind::Bool, Value::Bool(b)) => Ok(Self::Bool(*b)),
            (FieldKind::Text, _) => Err(ScalazapError::Validation(format!(
                "{} expects a string",
                field.api_name()
            ))),
            (FieldKind::Bool, _) => Err(ScalazapError::Validation(format!(
                "{} expects a boolean",
                field.api_name()
            ))),
        }
    }

    pub fn to_sql(&self) -> rusqlite::types::Value {
        match self {
            Self::Text(s) => rusqlite::types::Value::Text(s.clone()),
            Self::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        }
    }
}
