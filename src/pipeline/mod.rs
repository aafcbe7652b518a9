// ============================================================================
// Order Pipeline
// ============================================================================
//
// The retry-escalation core and the components around it:
// - outcome.rs        - channels and per-message dispositions
// - errors.rs         - PipelineError (ack-withholding failures)
// - policy.rs         - injectable processing outcome
// - ledger.rs         - in-flight attempt counts per order id
// - aggregation.rs    - running count/sum/average of processed orders
// - retry_consumer.rs - retry-or-dead-letter state machine
// - dead_letter.rs    - terminal dead-letter sink
// - producer.rs       - single and bulk order publishing
//
// ============================================================================

mod aggregation;
mod dead_letter;
mod errors;
mod ledger;
mod outcome;
mod policy;
mod producer;
mod retry_consumer;

pub use aggregation::{AggregateSnapshot, AggregationTracker};
pub use dead_letter::{DeadLetterObserver, DeadLetterRecord};
pub use errors::PipelineError;
pub use ledger::RetryLedger;
pub use outcome::{Channel, Disposition};
pub use policy::{ProcessingFailure, ProcessingPolicy, RandomFailurePolicy};
pub use producer::{BulkJob, JobReport, JobStatus, OrderProducer};
pub use retry_consumer::RetryEscalationConsumer;
