use actix::prelude::*;
use actix_web::web;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod api;
mod config;
mod messaging;
mod metrics;
mod models;
mod pipeline;
mod utils;

use actors::{CoordinatorActor, HealthMonitorActor, Shutdown};
use api::AppState;
use config::Config;
use messaging::{EventPublisher, PartitionedConsumer, RedpandaClient};
use pipeline::{
    AggregationTracker, DeadLetterObserver, OrderProducer, RandomFailurePolicy, RetryEscalationConsumer,
};

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment and defaults still apply
    let _ = dotenvy::dotenv();

    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=order_retry_pipeline=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_retry_pipeline=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order retry pipeline");

    // === 1. Configuration ===
    let config = Config::from_env()?;
    tracing::info!(
        brokers = %config.redpanda.brokers,
        primary = %config.redpanda.primary_topic,
        retry = %config.redpanda.retry_topic,
        dlq = %config.redpanda.dlq_topic,
        max_retries = config.pipeline.max_retries,
        retry_delay_ms = config.pipeline.retry_delay.as_millis() as u64,
        failure_rate = config.pipeline.failure_rate,
        "Configuration loaded"
    );

    // === 2. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);

    // === 3. Redpanda client (producer with circuit breaker) ===
    let redpanda = Arc::new(RedpandaClient::new(&config.redpanda.brokers)?);
    let publisher: Arc<dyn EventPublisher> = redpanda.clone();

    // === 4. Pipeline components ===
    let tracker = Arc::new(AggregationTracker::new());
    let retry_consumer = Arc::new(RetryEscalationConsumer::new(
        &config,
        Arc::new(RandomFailurePolicy::new(config.pipeline.failure_rate)),
        publisher.clone(),
        tracker.clone(),
        metrics.clone(),
    ));
    let dead_letters = Arc::new(DeadLetterObserver::new(config.pipeline.dlq_history, metrics.clone()));
    let producer = Arc::new(OrderProducer::new(&config, publisher, metrics.clone()));

    // === 5. Consumers ===
    let rp = &config.redpanda;
    let order_consumer = PartitionedConsumer::new(
        "order-consumer",
        redpanda.create_consumer(
            &rp.consumer_group_id,
            &[rp.primary_topic.as_str(), rp.retry_topic.as_str()],
            &rp.auto_offset_reset,
        )?,
        retry_consumer.clone(),
    );
    let dlq_consumer = PartitionedConsumer::new(
        "dlq-observer",
        redpanda.create_consumer(
            &rp.dlq_consumer_group_id,
            &[rp.dlq_topic.as_str()],
            &rp.auto_offset_reset,
        )?,
        dead_letters.clone(),
    );

    // === 6. Supervision ===
    let health = HealthMonitorActor::new(metrics.clone())
        .with_redpanda(redpanda.clone())
        .start();
    let coordinator = CoordinatorActor::new(vec![order_consumer, dlq_consumer], health.clone()).start();

    // === 7. HTTP API (runs until SIGINT/SIGTERM) ===
    let state = web::Data::new(AppState {
        producer,
        tracker,
        retry_consumer,
        dead_letters,
        health,
        metrics,
    });
    let served = api::start_server(state, &config.server.host, config.server.port).await;

    tracing::info!("🛑 HTTP server stopped, shutting down consumers");
    coordinator.send(Shutdown).await?;

    served?;
    tracing::info!("👋 Shutdown complete");
    Ok(())
}
