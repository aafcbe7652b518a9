use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Channel, PipelineError};
use crate::config::Config;
use crate::messaging::{EventPublisher, OutboundMessage};
use crate::metrics::Metrics;
use crate::models::{MessageMetadata, Order};
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

// ============================================================================
// Order Producer
// ============================================================================
//
// Two entry points into the primary channel:
// - single orders, published in the background so the HTTP caller never
//   waits on the broker
// - synthetic bulk loads, run as jobs with an id, live progress and a
//   cancellation token checked between publishes
//
// Finished jobs stay queryable for the retention window. The job table is
// also capped; when full, the oldest finished job is evicted first.
//
// ============================================================================

pub const PRODUCTS: [&str; 10] = [
    "Laptop",
    "Mouse",
    "Keyboard",
    "Monitor",
    "Headphones",
    "Webcam",
    "USB Cable",
    "SSD",
    "RAM",
    "Graphics Card",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
}

/// Handle of one synthetic bulk load
pub struct BulkJob {
    id: Uuid,
    requested: u32,
    published: AtomicU32,
    failed: AtomicU32,
    state: Mutex<JobState>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct JobState {
    status: JobStatus,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: Uuid,
    pub requested: u32,
    pub published: u32,
    pub failed: u32,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BulkJob {
    fn new(requested: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            requested,
            published: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                finished_at: None,
            }),
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn report(&self) -> JobReport {
        let state = self.state();
        JobReport {
            job_id: self.id,
            requested: self.requested,
            published: self.published.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            status: state.status,
            started_at: self.started_at,
            finished_at: state.finished_at,
        }
    }

    /// Stop the job before its next publish. A finished job stays as it is;
    /// returns whether this call cancelled it.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        self.finish(JobStatus::Cancelled)
    }

    /// Move a running job to `status`; false if it had already finished
    fn finish(&self, status: JobStatus) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.status != JobStatus::Running {
            return false;
        }
        state.status = status;
        state.finished_at = Some(Utc::now());
        true
    }

    /// Finished for at least `retention` as of `now`
    fn expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.state().finished_at {
            Some(finished_at) => (now - finished_at)
                .to_std()
                .map(|age| age >= retention)
                .unwrap_or(false),
            None => false,
        }
    }
}

pub struct OrderProducer {
    topic: String,
    pacing: Duration,
    price_min: f64,
    price_max: f64,
    retry: RetryConfig,
    publisher: Arc<dyn EventPublisher>,
    jobs: DashMap<Uuid, Arc<BulkJob>>,
    job_retention: Duration,
    max_jobs: usize,
    metrics: Arc<Metrics>,
}

impl OrderProducer {
    pub fn new(config: &Config, publisher: Arc<dyn EventPublisher>, metrics: Arc<Metrics>) -> Self {
        Self {
            topic: config.redpanda.primary_topic.clone(),
            pacing: config.producer.pacing,
            price_min: config.producer.price_min,
            price_max: config.producer.price_max,
            retry: RetryConfig::conservative(),
            publisher,
            jobs: DashMap::new(),
            job_retention: config.producer.job_retention,
            max_jobs: config.producer.max_jobs,
            metrics,
        }
    }

    /// Publish one order to the primary channel, retrying transient broker errors
    pub async fn publish_order(&self, order: &Order) -> Result<(), PipelineError> {
        let message = OutboundMessage::order(&self.topic, order, MessageMetadata::new())
            .map_err(|source| PipelineError::Encode {
                order_id: order.order_id.clone(),
                source,
            })?;

        let publisher = &self.publisher;
        let result = retry_on_transient(self.retry.clone(), move |_attempt| {
            let message = message.clone();
            async move { publisher.publish(message).await }
        })
        .await;

        match result {
            RetryResult::Success(()) => {
                self.metrics.record_produced(true);
                tracing::info!(
                    order_id = %order.order_id,
                    product = %order.product,
                    price = order.price,
                    "📤 Order published"
                );
                Ok(())
            }
            RetryResult::Failed(source) | RetryResult::PermanentFailure(source) => {
                self.metrics.record_produced(false);
                self.metrics.record_publish_failure(&self.topic);
                Err(PipelineError::Publish {
                    channel: Channel::Primary,
                    source,
                })
            }
        }
    }

    /// Hand `order` to a background task; failures are only logged
    pub fn produce_order(self: &Arc<Self>, order: Order) {
        let producer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = producer.publish_order(&order).await {
                tracing::error!(order_id = %order.order_id, error = %e, "Failed to publish order");
            }
        });
    }

    /// Start a paced bulk load of `count` synthetic orders
    pub fn produce_random(self: &Arc<Self>, count: u32) -> Arc<BulkJob> {
        let job = Arc::new(BulkJob::new(count));
        self.prune_jobs(1);
        self.jobs.insert(job.id(), job.clone());

        tracing::info!(job_id = %job.id(), count = count, "Starting bulk order job");
        tokio::spawn(self.clone().run_bulk(job.clone()));
        job
    }

    async fn run_bulk(self: Arc<Self>, job: Arc<BulkJob>) {
        for seq in 0..job.requested {
            if job.cancel.is_cancelled() {
                break;
            }

            let order = self.random_order(seq);
            match self.publish_order(&order).await {
                Ok(()) => {
                    job.published.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    job.failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(job_id = %job.id(), order_id = %order.order_id, error = %e, "Bulk publish failed");
                }
            }

            if seq + 1 < job.requested {
                tokio::select! {
                    _ = job.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.pacing) => {}
                }
            }
        }

        let _ = job.finish(JobStatus::Completed);
        let report = job.report();
        tracing::info!(
            job_id = %report.job_id,
            status = ?report.status,
            published = report.published,
            failed = report.failed,
            "Bulk order job finished"
        );
    }

    fn random_order(&self, seq: u32) -> Order {
        let mut rng = rand::thread_rng();
        let product = PRODUCTS[rng.gen_range(0..PRODUCTS.len())];
        let price = rng.gen_range(self.price_min..self.price_max);
        let order_id = format!("ORD-{:08x}-{}", rng.gen::<u32>(), 1000 + seq);

        Order::new(order_id, product, (price * 100.0).round() / 100.0)
    }

    /// Drop jobs past retention, then the oldest finished ones until
    /// `incoming` more fit under the cap. Running jobs are never dropped.
    fn prune_jobs(&self, incoming: usize) {
        let now = Utc::now();
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.expired(now, self.job_retention));

        let excess = (self.jobs.len() + incoming).saturating_sub(self.max_jobs);
        if excess > 0 {
            let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
                .jobs
                .iter()
                .filter_map(|entry| entry.value().state().finished_at.map(|at| (at, *entry.key())))
                .collect();
            finished.sort();
            for (_, id) in finished.into_iter().take(excess) {
                self.jobs.remove(&id);
            }
        }

        let evicted = before.saturating_sub(self.jobs.len());
        if evicted > 0 {
            tracing::debug!(evicted = evicted, tracked = self.jobs.len(), "Evicted finished bulk jobs");
        }
    }

    pub fn job_status(&self, id: Uuid) -> Option<JobReport> {
        self.prune_jobs(0);
        self.jobs.get(&id).map(|job| job.report())
    }

    pub fn cancel_job(&self, id: Uuid) -> Option<JobReport> {
        self.prune_jobs(0);
        let job = self.jobs.get(&id)?.clone();
        if job.cancel() {
            tracing::info!(job_id = %id, "Bulk order job cancelled");
        } else {
            tracing::debug!(job_id = %id, status = ?job.status(), "Bulk order job already finished, nothing to cancel");
        }
        Some(job.report())
    }
}
