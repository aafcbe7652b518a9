// ============================================================================
// Messaging Module
// ============================================================================
//
// Everything that touches the broker client:
// - errors.rs    - MessagingError
// - publisher.rs - EventPublisher seam and the outbound message shape
// - redpanda.rs  - rdkafka-backed producer (circuit breaker) and consumer factory
// - consumer.rs  - consume loop, rebalance context, manual commits
// - partition.rs - bounded per-partition workers, pause/resume, seek fencing
//
// ============================================================================

mod consumer;
mod errors;
mod partition;
mod publisher;
mod redpanda;

pub use consumer::{DeliveryHandler, InboundMessage, PartitionContext, PartitionedConsumer, SubscribedConsumer};
pub use errors::MessagingError;
pub use publisher::{EventPublisher, OutboundMessage};
pub use redpanda::RedpandaClient;

#[cfg(test)]
pub(crate) use publisher::testing;
