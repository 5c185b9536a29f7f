//! Webhook ingestion: raw logging, verification, deduplication, persistence.
//!
//! The HTTP acknowledgement and the processing outcome are separate. Callers
//! always answer the provider with 200; the [`IngestReport`] only feeds logs
//! and tests.

use crate::config::{IngestConfig, WhatsAppConfig};
use crate::models::{MessageRecord, RawWebhookLog, WebhookSource};
use crate::store::{InsertOutcome, MessageStore};
use crate::utils::truncate_for_log;
use crate::whatsapp::webhook::{
    NEUTRAL_VERIFY_BODY, VerifyOutcome, VerifyQuery, parse_delivery, validate_signature,
    verify_subscription,
};
use chrono::Utc;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Raw bodies above this size are stored truncated in the webhook log.
const MAX_LOGGED_BODY_CHARS: usize = 64 * 1024;

/// HTTP metadata of one webhook request, as captured by the gateway.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: String,
    pub headers: Value,
    pub query: Option<String>,
    pub signature: Option<String>,
}

/// What happened to one event delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub statuses_applied: usize,
    /// Message objects without an ID or sender.
    pub skipped: usize,
    /// Per-message persistence failures.
    pub failures: Vec<String>,
    pub signature_rejected: bool,
    pub oversize: bool,
    pub parse_error: Option<String>,
}

impl IngestReport {
    pub fn rejected(&self) -> bool {
        self.signature_rejected || self.oversize || self.parse_error.is_some()
    }
}

pub struct WebhookIngestor {
    store: Arc<dyn MessageStore>,
    seen: Mutex<LruCache<String, ()>>,
    whatsapp: WhatsAppConfig,
    max_body_bytes: usize,
}

impl WebhookIngestor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        whatsapp: WhatsAppConfig,
        ingest: &IngestConfig,
        max_body_bytes: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(ingest.dedup_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            seen: Mutex::new(LruCache::new(capacity)),
            whatsapp,
            max_body_bytes,
        }
    }

    /// Append the request to the raw webhook log. Failures are logged only.
    pub async fn log_raw(&self, source: WebhookSource, meta: &RequestMeta, body: &[u8]) {
        let text = String::from_utf8_lossy(body);
        let entry = RawWebhookLog {
            id: 0,
            source,
            method: meta.method.clone(),
            headers: meta.headers.clone(),
            query: meta.query.clone(),
            body: truncate_for_log(&text, MAX_LOGGED_BODY_CHARS),
            received_at: Utc::now(),
        };
        if let Err(e) = self.store.append_webhook_log(&entry).await {
            error!("webhook: failed to write raw log: {}", e);
        }
    }

    /// Handle a verification probe. Returns the body to answer with; the
    /// status is always 200.
    pub async fn verify(&self, query: &VerifyQuery, meta: &RequestMeta) -> String {
        self.log_raw(WebhookSource::Verify, meta, &[]).await;
        match verify_subscription(
            query,
            &self.whatsapp.verify_token,
            self.whatsapp.verify_token_mode,
        ) {
            VerifyOutcome::Accepted(challenge) => {
                info!("webhook: verification accepted");
                challenge
            }
            VerifyOutcome::Rejected(reason) => {
                warn!("webhook: verification rejected: {}", reason);
                NEUTRAL_VERIFY_BODY.to_string()
            }
        }
    }

    /// Process one event delivery body. Never fails; problems land in the report.
    pub async fn ingest(&self, body: &[u8], signature: Option<&str>) -> IngestReport {
        let mut report = IngestReport::default();

        if body.len() > self.max_body_bytes {
            warn!(
                "webhook: body of {} bytes exceeds limit of {}, not processed",
                body.len(),
                self.max_body_bytes
            );
            report.oversize = true;
            return report;
        }

        if !self.whatsapp.app_secret.is_empty() {
            let valid = signature
                .is_some_and(|sig| validate_signature(&self.whatsapp.app_secret, sig, body));
            if !valid {
                warn!("webhook: missing or invalid X-Hub-Signature-256, delivery ignored");
                report.signature_rejected = true;
                return report;
            }
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("webhook: unparseable delivery: {}", e);
                report.parse_error = Some(e.to_string());
                return report;
            }
        };

        let parsed = parse_delivery(&payload, Utc::now());
        report.skipped = parsed.skipped;

        for record in &parsed.messages {
            self.persist(record, &mut report).await;
        }

        for status in &parsed.statuses {
            match self.store.apply_status(status).await {
                Ok(true) => report.statuses_applied += 1,
                Ok(false) => debug!(
                    "webhook: status {} for {} not applied",
                    status.status, status.message_id
                ),
                Err(e) => report
                    .failures
                    .push(format!("status {}: {}", status.message_id, e)),
            }
        }

        report
    }

    async fn persist(&self, record: &MessageRecord, report: &mut IngestReport) {
        if self.recently_seen(&record.message_id) {
            debug!("webhook: {} already seen, skipping", record.message_id);
            report.duplicates += 1;
            return;
        }

        match self.store.insert_message_if_absent(record).await {
            Ok(InsertOutcome::Inserted) => {
                self.remember(&record.message_id);
                info!(
                    "webhook: stored {} message {} from {}",
                    record.message_type.as_str(),
                    record.message_id,
                    record.from_number
                );
                report.accepted += 1;
            }
            Ok(InsertOutcome::Duplicate) => {
                self.remember(&record.message_id);
                report.duplicates += 1;
            }
            Err(e) => {
                // Leave the cache untouched so a redelivery can still be stored
                error!("webhook: failed to store {}: {}", record.message_id, e);
                report.failures.push(format!("{}: {}", record.message_id, e));
            }
        }
    }

    fn recently_seen(&self, message_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_id)
            .is_some()
    }

    fn remember(&self, message_id: &str) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(message_id.to_string(), ());
    }

    /// Log the raw delivery, then process it on a spawned task.
    ///
    /// Waits at most `deadline` for the report. When the deadline passes the
    /// task keeps running and `None` is returned so the caller can ack anyway.
    pub async fn accept_event(
        self: &Arc<Self>,
        meta: RequestMeta,
        body: Vec<u8>,
        deadline: Duration,
    ) -> Option<IngestReport> {
        self.log_raw(WebhookSource::Event, &meta, &body).await;

        let ingestor = Arc::clone(self);
        let task = tokio::spawn(async move {
            let report = ingestor.ingest(&body, meta.signature.as_deref()).await;
            log_report(&report);
            report
        });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                error!("webhook: processing task failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "webhook: processing exceeded {}ms, acknowledging early",
                    deadline.as_millis()
                );
                None
            }
        }
    }
}

fn log_report(report: &IngestReport) {
    if report.rejected() {
        return;
    }
    if report.failures.is_empty() {
        debug!(
            "webhook: accepted={} duplicates={} statuses={} skipped={}",
            report.accepted, report.duplicates, report.statuses_applied, report.skipped
        );
    } else {
        warn!(
            "webhook: accepted={} duplicates={} failures={}: {}",
            report.accepted,
            report.duplicates,
            report.failures.len(),
            report.failures.join("; ")
        );
    }
}
