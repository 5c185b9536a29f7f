//! WhatsApp Cloud API integration: webhook payload handling and the
//! outbound messages endpoint.

pub mod client;
pub mod webhook;

pub use client::{GraphApiClient, MessagingApi, SendOutcome};
