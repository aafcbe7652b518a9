use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::time::Duration;

use super::{EventPublisher, MessagingError, OutboundMessage, PartitionContext, SubscribedConsumer};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

// ============================================================================
// Redpanda Client
// ============================================================================
//
// Producer side: every publish waits for the broker's delivery report
// (acks=all, idempotent producer) behind a circuit breaker.
// Consumer side: consumers are created with auto-commit disabled; offsets
// are committed by the partition workers once a message reached its outcome.
//
// ============================================================================

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedpandaClient {
    brokers: String,
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaClient {
    pub fn new(brokers: &str) -> Result<Self, MessagingError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()?;

        // Open after 5 failures, try again after 30s, close after 3 successes
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        tracing::info!(brokers = %brokers, "Redpanda producer created");

        Ok(Self {
            brokers: brokers.to_string(),
            producer,
            circuit_breaker: CircuitBreaker::new("redpanda-producer", cb_config),
        })
    }

    /// Create a manually-committed consumer subscribed to `topics`
    pub fn create_consumer(
        &self,
        group_id: &str,
        topics: &[&str],
        auto_offset_reset: &str,
    ) -> Result<SubscribedConsumer, MessagingError> {
        let (context, revocations) = PartitionContext::new(group_id);
        let consumer: StreamConsumer<PartitionContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create_with_context(context)?;

        consumer
            .subscribe(topics)
            .map_err(|e| MessagingError::Subscribe {
                topics: topics.iter().map(|t| t.to_string()).collect(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            group_id = %group_id,
            topics = ?topics,
            auto_offset_reset = %auto_offset_reset,
            manual_commit = true,
            "Subscribed consumer"
        );

        Ok(SubscribedConsumer::new(consumer, revocations))
    }

    pub async fn get_circuit_breaker_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}

#[async_trait]
impl EventPublisher for RedpandaClient {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in message.metadata.iter() {
            headers = headers.insert(Header { key, value: Some(value) });
        }

        let result = self.circuit_breaker.call(async {
            let record = FutureRecord::to(&message.topic)
                .key(message.key.as_str())
                .payload(message.payload.as_slice())
                .headers(headers);

            self.producer
                .send(record, Timeout::After(SEND_TIMEOUT))
                .await
                .map_err(|(e, _)| e.to_string())?;

            Ok::<(), String>(())
        }).await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    topic = %message.topic,
                    key = %message.key,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    topic = %message.topic,
                    "Circuit breaker open - Redpanda unavailable"
                );
                Err(MessagingError::CircuitOpen { topic: message.topic })
            }
            Err(CircuitBreakerError::OperationFailed(reason)) => {
                tracing::error!(
                    error = %reason,
                    topic = %message.topic,
                    key = %message.key,
                    "Failed to publish to Redpanda"
                );
                Err(MessagingError::Publish { topic: message.topic, reason })
            }
        }
    }
}
