use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Disposition, PipelineError};
use crate::messaging::{DeliveryHandler, InboundMessage};
use crate::metrics::Metrics;

// ============================================================================
// Dead-Letter Observer
// ============================================================================
//
// Terminal sink of the pipeline, running in its own consumer group. Every
// dead-lettered order is counted, logged and kept in a bounded window of
// recent records for the operator endpoint. Nothing here can fail in a way
// that redelivery would fix, so every message is acknowledged.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub order_id: String,
    pub product: String,
    pub price: f64,
    pub attempts: u32,
    pub reason: Option<String>,
    pub observed_at: DateTime<Utc>,
}

pub struct DeadLetterObserver {
    failed: AtomicU64,
    capacity: usize,
    recent: Mutex<VecDeque<DeadLetterRecord>>,
    metrics: Arc<Metrics>,
}

impl DeadLetterObserver {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            failed: AtomicU64::new(0),
            capacity: capacity.max(1),
            recent: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            metrics,
        }
    }

    pub fn observe(&self, record: DeadLetterRecord) {
        let failed = self.failed.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.record_dead_letter_observed();

        tracing::error!(
            order_id = %record.order_id,
            product = %record.product,
            price = record.price,
            attempts = record.attempts,
            reason = record.reason.as_deref().unwrap_or("unknown"),
            failed_orders = failed,
            "☠️ Dead-lettered order observed"
        );

        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    /// Dead-lettered orders seen since start; unaffected by statistics reset
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Up to `limit` most recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<DeadLetterRecord> {
        let recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent.iter().rev().take(limit).cloned().collect()
    }
}

#[async_trait]
impl DeliveryHandler for DeadLetterObserver {
    async fn handle(&self, message: &InboundMessage) -> Result<Disposition, PipelineError> {
        match message.order() {
            Ok(order) => {
                self.observe(DeadLetterRecord {
                    order_id: order.order_id,
                    product: order.product,
                    price: order.price,
                    attempts: message.metadata.retry_count(),
                    reason: message.metadata.failure_reason().map(str::to_string),
                    observed_at: Utc::now(),
                });
                Ok(Disposition::Observed)
            }
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    offset = message.offset,
                    key = ?message.key,
                    error = %e,
                    "Undecodable dead-letter payload, discarding"
                );
                self.metrics.record_discarded(&message.topic);
                Ok(Disposition::Discarded)
            }
        }
    }
}
