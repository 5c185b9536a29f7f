//! Spacing between consecutive sends of a batch.

use crate::config::PacerKind;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::time::Duration;

/// Decides when the next item of a batch may go out.
///
/// A pacer instance belongs to one batch; `index` is the item's position.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn wait_turn(&self, index: usize);
}

/// Sleeps exactly `interval` before every item except the first.
#[derive(Debug, Clone, Copy)]
pub struct FixedIntervalPacer {
    interval: Duration,
}

impl FixedIntervalPacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Pacer for FixedIntervalPacer {
    async fn wait_turn(&self, index: usize) {
        if index == 0 || self.interval.is_zero() {
            return;
        }
        tokio::time::sleep(self.interval).await;
    }
}

/// GCRA limiter allowing one send per `interval` with a burst of one.
///
/// Unlike the fixed pacer, time spent inside the previous send counts
/// toward the interval.
pub struct QuotaPacer {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl QuotaPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            limiter: Quota::with_period(interval).map(RateLimiter::direct),
        }
    }
}

#[async_trait]
impl Pacer for QuotaPacer {
    async fn wait_turn(&self, _index: usize) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Fresh pacer for one batch.
pub fn pacer_for(kind: PacerKind, interval: Duration) -> Box<dyn Pacer> {
    match kind {
        PacerKind::Fixed => Box::new(FixedIntervalPacer::new(interval)),
        PacerKind::Quota => Box::new(QuotaPacer::new(interval)),
    }
}
