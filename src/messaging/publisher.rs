use async_trait::async_trait;

use super::MessagingError;
use crate::models::{MessageMetadata, Order};

/// A message ready to hand to the broker
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub metadata: MessageMetadata,
}

impl OutboundMessage {
    /// Encode `order` for `topic`, keyed by its order id
    pub fn order(topic: &str, order: &Order, metadata: MessageMetadata) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.to_string(),
            key: order.order_id.clone(),
            payload: order.to_payload()?,
            metadata,
        })
    }
}

/// Publishing seam between the pipeline and the broker client.
///
/// `publish` resolves only once the broker has acknowledged the write, so a
/// caller that sees `Ok` may treat the message as durably enqueued.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError>;
}
