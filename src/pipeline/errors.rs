use super::Channel;
use crate::messaging::MessagingError;

// ============================================================================
// Pipeline Errors
// ============================================================================
//
// Only failures that must withhold the acknowledgment surface here. Processing
// failures are an expected input of the state machine (see `policy`), not an
// error of the pipeline.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Publish to {channel} channel failed: {source}")]
    Publish {
        channel: Channel,
        #[source]
        source: MessagingError,
    },

    #[error("Failed to encode order {order_id}: {source}")]
    Encode {
        order_id: String,
        #[source]
        source: serde_json::Error,
    },
}
