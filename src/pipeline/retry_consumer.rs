use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    AggregationTracker, Channel, Disposition, PipelineError, ProcessingPolicy, RetryLedger,
};
use crate::config::Config;
use crate::messaging::{DeliveryHandler, EventPublisher, InboundMessage, OutboundMessage};
use crate::metrics::Metrics;
use crate::models::{MessageMetadata, Order};

// ============================================================================
// Retry-Escalation Consumer
// ============================================================================
//
// Per delivery, reconstructed from the message alone:
//
//   Received --ok-------------------------------> Succeeded (tracker)
//   Received --fail, next < max_retries---------> AwaitingRetry (retry channel)
//   Received --fail, next >= max_retries--------> DeadLettered (dlq channel)
//   Received --arrived with count >= max--------> DeadLettered, policy skipped
//   AwaitingRetry --redelivery------------------> Received
//
// Every disposition returned from `handle` is already durable (the broker
// acknowledged the republish), so the partition worker may commit it. A
// failed republish comes back as `PipelineError` and the commit is withheld.
//
// ============================================================================

const EXHAUSTED_ON_ARRIVAL: &str = "retry budget exhausted before processing";

pub struct RetryEscalationConsumer {
    retry_topic: String,
    dlq_topic: String,
    max_retries: u32,
    retry_delay: Duration,
    policy: Arc<dyn ProcessingPolicy>,
    publisher: Arc<dyn EventPublisher>,
    tracker: Arc<AggregationTracker>,
    ledger: RetryLedger,
    metrics: Arc<Metrics>,
}

impl RetryEscalationConsumer {
    pub fn new(
        config: &Config,
        policy: Arc<dyn ProcessingPolicy>,
        publisher: Arc<dyn EventPublisher>,
        tracker: Arc<AggregationTracker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            retry_topic: config.redpanda.retry_topic.clone(),
            dlq_topic: config.redpanda.dlq_topic.clone(),
            max_retries: config.pipeline.max_retries,
            retry_delay: config.pipeline.retry_delay,
            policy,
            publisher,
            tracker,
            ledger: RetryLedger::new(),
            metrics,
        }
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    fn channel_of(&self, topic: &str) -> Channel {
        if topic == self.retry_topic {
            Channel::Retry
        } else if topic == self.dlq_topic {
            Channel::DeadLetter
        } else {
            Channel::Primary
        }
    }

    /// Drive one delivery of `order` to its next state
    pub async fn process(
        &self,
        channel: Channel,
        order: &Order,
        metadata: &MessageMetadata,
    ) -> Result<Disposition, PipelineError> {
        let attempts = RetryLedger::attempts_from(channel, metadata);

        if attempts >= self.max_retries {
            tracing::warn!(
                order_id = %order.order_id,
                attempts = attempts,
                max_retries = self.max_retries,
                "Order arrived with no retries left, dead-lettering without processing"
            );
            return self.dead_letter(order, self.max_retries, EXHAUSTED_ON_ARRIVAL).await;
        }

        tracing::debug!(
            order_id = %order.order_id,
            channel = %channel,
            attempt = attempts,
            "Processing order"
        );

        let started = Instant::now();
        match self.policy.attempt(order, attempts) {
            Ok(()) => {
                self.metrics
                    .record_processed(channel, started.elapsed().as_secs_f64());
                self.tracker.record_success(order.price);
                self.ledger.clear(&order.order_id);

                tracing::info!(
                    order_id = %order.order_id,
                    product = %order.product,
                    price = order.price,
                    attempt = attempts,
                    "✅ Order processed"
                );
                Ok(Disposition::Succeeded { attempt: attempts })
            }
            Err(failure) => {
                self.metrics
                    .record_processing_failure(channel, started.elapsed().as_secs_f64());

                let next = attempts + 1;
                if next < self.max_retries {
                    self.retry(order, next, &failure.reason).await
                } else {
                    self.dead_letter(order, next, &failure.reason).await
                }
            }
        }
    }

    async fn retry(&self, order: &Order, attempt: u32, reason: &str) -> Result<Disposition, PipelineError> {
        let metadata = MessageMetadata::new().with_retry_count(attempt);
        self.publish(Channel::Retry, &self.retry_topic, order, metadata).await?;

        self.ledger.record(&order.order_id, attempt);
        self.metrics.record_retry_published(attempt);

        tracing::warn!(
            order_id = %order.order_id,
            attempt = attempt,
            max_retries = self.max_retries,
            reason = %reason,
            "🔁 Order failed, sent to retry channel"
        );
        Ok(Disposition::Retried { attempt })
    }

    async fn dead_letter(&self, order: &Order, attempt: u32, reason: &str) -> Result<Disposition, PipelineError> {
        let metadata = MessageMetadata::new()
            .with_retry_count(attempt)
            .with_failure_reason(reason);
        self.publish(Channel::DeadLetter, &self.dlq_topic, order, metadata).await?;

        self.ledger.clear(&order.order_id);
        self.metrics.record_dead_letter_published();

        tracing::error!(
            order_id = %order.order_id,
            attempt = attempt,
            reason = %reason,
            "💀 Order exhausted its retries, sent to dead-letter channel"
        );
        Ok(Disposition::DeadLettered { attempt })
    }

    async fn publish(
        &self,
        channel: Channel,
        topic: &str,
        order: &Order,
        metadata: MessageMetadata,
    ) -> Result<(), PipelineError> {
        let message = OutboundMessage::order(topic, order, metadata).map_err(|source| {
            PipelineError::Encode {
                order_id: order.order_id.clone(),
                source,
            }
        })?;

        self.publisher.publish(message).await.map_err(|source| {
            self.metrics.record_publish_failure(topic);
            PipelineError::Publish { channel, source }
        })
    }
}

#[async_trait]
impl DeliveryHandler for RetryEscalationConsumer {
    async fn handle(&self, message: &InboundMessage) -> Result<Disposition, PipelineError> {
        let order = match message.order() {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = ?message.key,
                    error = %e,
                    "Undecodable order payload, discarding"
                );
                self.metrics.record_discarded(&message.topic);
                return Ok(Disposition::Discarded);
            }
        };

        self.process(self.channel_of(&message.topic), &order, &message.metadata)
            .await
    }

    fn pause_after(&self, disposition: &Disposition) -> Option<Duration> {
        if disposition.is_terminal() || self.retry_delay.is_zero() {
            return None;
        }
        Some(self.retry_delay)
    }
}
