use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::pipeline::Channel;
use crate::utils::CircuitState;

// ============================================================================
// Metrics Module - Prometheus metrics for the order pipeline
// ============================================================================
//
// Covers:
// - Order processing (throughput, latency, failed attempts per channel)
// - Retry escalation and dead-lettering
// - Publish failures and undecodable messages
// - Producer outcomes
// - Producer circuit breaker state
//
// Rendered in the Prometheus text format on GET /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Processing Metrics
    pub orders_processed: IntCounter,
    pub processing_failures: IntCounterVec,
    pub processing_duration: HistogramVec,

    // Escalation Metrics
    pub retries_published: IntCounterVec,
    pub dead_letters_published: IntCounter,
    pub dead_letters_observed: IntCounter,

    // Broker Metrics
    pub publish_failures: IntCounterVec,
    pub discarded_messages: IntCounterVec,
    pub orders_produced: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Processing Metrics
        let orders_processed = IntCounter::new(
            "orders_processed_total",
            "Orders processed successfully and folded into the running average",
        )?;
        registry.register(Box::new(orders_processed.clone()))?;

        let processing_failures = IntCounterVec::new(
            Opts::new("order_processing_failures_total", "Failed processing attempts"),
            &["channel"],
        )?;
        registry.register(Box::new(processing_failures.clone()))?;

        let processing_duration = HistogramVec::new(
            HistogramOpts::new("order_processing_duration_seconds", "Order handling duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["channel"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        // Escalation Metrics
        let retries_published = IntCounterVec::new(
            Opts::new("order_retries_published_total", "Orders republished to the retry channel"),
            &["attempt"],
        )?;
        registry.register(Box::new(retries_published.clone()))?;

        let dead_letters_published = IntCounter::new(
            "order_dead_letters_published_total",
            "Orders escalated to the dead-letter channel",
        )?;
        registry.register(Box::new(dead_letters_published.clone()))?;

        let dead_letters_observed = IntCounter::new(
            "order_dead_letters_observed_total",
            "Dead-lettered orders seen by the observer",
        )?;
        registry.register(Box::new(dead_letters_observed.clone()))?;

        // Broker Metrics
        let publish_failures = IntCounterVec::new(
            Opts::new("publish_failures_total", "Publishes rejected by the broker"),
            &["topic"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let discarded_messages = IntCounterVec::new(
            Opts::new("discarded_messages_total", "Messages dropped because they could not be decoded"),
            &["topic"],
        )?;
        registry.register(Box::new(discarded_messages.clone()))?;

        let orders_produced = IntCounterVec::new(
            Opts::new("orders_produced_total", "Orders handed to the primary channel"),
            &["outcome"],
        )?;
        registry.register(Box::new(orders_produced.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_processed,
            processing_failures,
            processing_duration,
            retries_published,
            dead_letters_published,
            dead_letters_observed,
            publish_failures,
            discarded_messages,
            orders_produced,
            circuit_breaker_state,
        })
    }

    pub fn record_processed(&self, channel: Channel, duration_secs: f64) {
        self.orders_processed.inc();
        self.processing_duration
            .with_label_values(&[channel.as_str()])
            .observe(duration_secs);
    }

    pub fn record_processing_failure(&self, channel: Channel, duration_secs: f64) {
        self.processing_failures.with_label_values(&[channel.as_str()]).inc();
        self.processing_duration
            .with_label_values(&[channel.as_str()])
            .observe(duration_secs);
    }

    pub fn record_retry_published(&self, attempt: u32) {
        self.retries_published
            .with_label_values(&[&attempt.to_string()])
            .inc();
    }

    pub fn record_dead_letter_published(&self) {
        self.dead_letters_published.inc();
    }

    pub fn record_dead_letter_observed(&self) {
        self.dead_letters_observed.inc();
    }

    pub fn record_publish_failure(&self, topic: &str) {
        self.publish_failures.with_label_values(&[topic]).inc();
    }

    pub fn record_discarded(&self, topic: &str) {
        self.discarded_messages.with_label_values(&[topic]).inc();
    }

    pub fn record_produced(&self, published: bool) {
        let outcome = if published { "published" } else { "failed" };
        self.orders_produced.with_label_values(&[outcome]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.circuit_breaker_state.set(state.as_gauge());
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
