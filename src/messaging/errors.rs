use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Circuit breaker open, refusing to publish to {topic}")]
    CircuitOpen { topic: String },

    #[error("Failed to create Kafka client: {0}")]
    Client(#[from] rdkafka::error::KafkaError),

    #[error("Failed to subscribe to {topics:?}: {reason}")]
    Subscribe { topics: Vec<String>, reason: String },

    #[error("Offset {operation} failed for {topic}[{partition}]@{offset}: {reason}")]
    Offset {
        operation: &'static str,
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Failed to {operation} {topic}[{partition}]: {reason}")]
    Flow {
        operation: &'static str,
        topic: String,
        partition: i32,
        reason: String,
    },
}

impl IsTransient for MessagingError {
    fn is_transient(&self) -> bool {
        // An open breaker will not close within a producer backoff window
        matches!(self, MessagingError::Publish { .. })
    }
}
