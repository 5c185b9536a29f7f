#![no_main]

use libfuzzer_sys::fuzz_target;
use scalazap::fuzz_api::{normalize_phone, parse_delivery};

fuzz_target!(|data: &[u8]| {
    if let Ok(payload) = serde_json::from_slice::<serde_json::Value>(data) {
        let parsed = parse_delivery(&payload, chrono::Utc::now());
        for message in &parsed.messages {
            assert!(!message.message_id.is_empty());
            assert!(normalize_phone(&message.to_number).len() <= message.to_number.len());
        }
    }
});
