use rand::Rng;

use crate::models::Order;

/// A recoverable processing error; the order is retried or dead-lettered
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct ProcessingFailure {
    pub reason: String,
}

impl ProcessingFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Decides whether processing an order succeeds.
///
/// Implementations are invoked again on every redelivery of the same order,
/// so they must tolerate running more than once per order.
pub trait ProcessingPolicy: Send + Sync {
    /// `attempt` is the number of earlier failed attempts for this order
    fn attempt(&self, order: &Order, attempt: u32) -> Result<(), ProcessingFailure>;
}

/// Fails each attempt independently with a fixed probability
pub struct RandomFailurePolicy {
    failure_rate: f64,
}

impl RandomFailurePolicy {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl ProcessingPolicy for RandomFailurePolicy {
    fn attempt(&self, _order: &Order, _attempt: u32) -> Result<(), ProcessingFailure> {
        if rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(ProcessingFailure::transient("Simulated temporary failure"));
        }
        Ok(())
    }
}
