//! Outbound dispatch: single sends and paced, strictly sequential batches.

pub mod pacer;

use crate::config::{DispatchConfig, MAX_DELAY_MS, PacerKind};
use crate::errors::{ScalazapError, ScalazapResult};
use crate::models::{Credentials, MessageRecord, OutboundSendRequest, SendContent};
use crate::store::MessageStore;
use crate::whatsapp::{MessagingApi, SendOutcome};
use pacer::pacer_for;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use pacer::{FixedIntervalPacer, Pacer, QuotaPacer};

/// Result of one batch item, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ItemOutcome {
    #[serde(rename_all = "camelCase")]
    Sent {
        recipient: String,
        message_id: String,
        recorded: bool,
    },
    #[serde(rename_all = "camelCase")]
    Failed { recipient: String, error: String },
}

/// Accounting for a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Option<String>,
    pub sent: usize,
    pub failed: usize,
    /// `"{recipient}: {reason}"` for every failed item.
    pub errors: Vec<String>,
    #[serde(skip)]
    pub outcomes: Vec<ItemOutcome>,
    /// Message IDs the provider accepted but that could not be persisted.
    pub unrecorded: Vec<String>,
}

/// A message the provider accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub message_id: String,
    pub recorded: bool,
}

pub struct Dispatcher {
    api: Arc<dyn MessagingApi>,
    store: Arc<dyn MessageStore>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        store: Arc<dyn MessageStore>,
        config: DispatchConfig,
    ) -> Self {
        Self { api, store, config }
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.config.default_delay_ms)
    }

    /// Send one message. Validation errors, provider rejections and transport
    /// failures all fail the call.
    pub async fn send_one(
        &self,
        credentials: &Credentials,
        request: &OutboundSendRequest,
    ) -> ScalazapResult<SentMessage> {
        let (recipient, content) = request.validate()?;
        let message_id = self
            .deliver(credentials, &recipient, &content)
            .await
            .map_err(|message| ScalazapError::Provider { message })?;
        let recorded = self
            .record(credentials, &recipient, &content, &message_id)
            .await;
        info!("dispatch: sent {} to {}", message_id, recipient);
        Ok(SentMessage {
            recipient,
            message_id,
            recorded,
        })
    }

    /// Send every item in order, pacing between them.
    ///
    /// A failing item is counted and reported; the batch always runs to the end.
    pub async fn dispatch_batch(
        &self,
        credentials: &Credentials,
        items: &[OutboundSendRequest],
        delay: Option<Duration>,
        batch_id: Option<String>,
    ) -> ScalazapResult<BatchReport> {
        if items.is_empty() {
            return Err(ScalazapError::Validation(
                "messages must contain at least one item".into(),
            ));
        }
        if items.len() > self.config.max_batch_size {
            return Err(ScalazapError::Validation(format!(
                "batch of {} exceeds maxBatchSize {}",
                items.len(),
                self.config.max_batch_size
            )));
        }

        let delay = delay.unwrap_or_else(|| self.default_delay());
        self.check_delay(delay)?;
        let pacer = pacer_for(self.config.pacer, delay);
        let label = batch_id.as_deref().unwrap_or("-");
        let started = Instant::now();
        info!(
            "dispatch: batch {} starting, {} items, {}ms apart",
            label,
            items.len(),
            delay.as_millis()
        );

        let mut report = BatchReport {
            batch_id: batch_id.clone(),
            ..BatchReport::default()
        };

        for (index, item) in items.iter().enumerate() {
            pacer.wait_turn(index).await;
            let outcome = self.dispatch_item(credentials, item).await;
            match &outcome {
                ItemOutcome::Sent {
                    recipient,
                    message_id,
                    recorded,
                } => {
                    info!(
                        "dispatch: batch {} item {}/{} sent to {} as {}",
                        label,
                        index + 1,
                        items.len(),
                        recipient,
                        message_id
                    );
                    report.sent += 1;
                    if !recorded {
                        report.unrecorded.push(message_id.clone());
                    }
                }
                ItemOutcome::Failed { recipient, error } => {
                    warn!(
                        "dispatch: batch {} item {}/{} to {} failed: {}",
                        label,
                        index + 1,
                        items.len(),
                        recipient,
                        error
                    );
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", recipient, error));
                }
            }
            report.outcomes.push(outcome);
        }

        info!(
            "dispatch: batch {} done in {:?}: sent={} failed={}",
            label,
            started.elapsed(),
            report.sent,
            report.failed
        );
        Ok(report)
    }

    /// Per-request delays get the same bounds as `dispatch.defaultDelayMs`.
    fn check_delay(&self, delay: Duration) -> ScalazapResult<()> {
        if delay > Duration::from_millis(MAX_DELAY_MS) {
            return Err(ScalazapError::Validation(format!(
                "delayMs must be <= {}",
                MAX_DELAY_MS
            )));
        }
        if self.config.pacer == PacerKind::Quota && delay.is_zero() {
            return Err(ScalazapError::Validation(
                "delayMs must be > 0 with the quota pacer".into(),
            ));
        }
        Ok(())
    }

    async fn dispatch_item(
        &self,
        credentials: &Credentials,
        item: &OutboundSendRequest,
    ) -> ItemOutcome {
        let (recipient, content) = match item.validate() {
            Ok(valid) => valid,
            Err(e) => {
                let reason = match e {
                    ScalazapError::Validation(msg) => msg,
                    other => other.to_string(),
                };
                return ItemOutcome::Failed {
                    recipient: item.to.clone(),
                    error: reason,
                };
            }
        };

        match self.deliver(credentials, &recipient, &content).await {
            Ok(message_id) => {
                let recorded = self
                    .record(credentials, &recipient, &content, &message_id)
                    .await;
                ItemOutcome::Sent {
                    recipient,
                    message_id,
                    recorded,
                }
            }
            Err(error) => ItemOutcome::Failed { recipient, error },
        }
    }

    /// Call the provider once. `Ok` holds the provider ID or a local placeholder.
    async fn deliver(
        &self,
        credentials: &Credentials,
        recipient: &str,
        content: &SendContent,
    ) -> Result<String, String> {
        match self.api.send(credentials, recipient, content).await {
            Ok(SendOutcome::Accepted { message_id }) => Ok(message_id.unwrap_or_else(|| {
                let placeholder = format!("local-{}", uuid::Uuid::new_v4());
                debug!(
                    "dispatch: provider returned no id for {}, using {}",
                    recipient, placeholder
                );
                placeholder
            })),
            Ok(SendOutcome::Rejected { message }) => Err(message),
            Err(e) => Err(format!("{:#}", e)),
        }
    }

    /// Persist the outbound record. Returns whether it was stored.
    async fn record(
        &self,
        credentials: &Credentials,
        recipient: &str,
        content: &SendContent,
        message_id: &str,
    ) -> bool {
        let record = MessageRecord::outbound(
            message_id.to_string(),
            &credentials.phone_number_id,
            recipient,
            content,
        );
        match self.store.insert_message_if_absent(&record).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "dispatch: {} sent but not recorded: {}",
                    message_id, e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests;
