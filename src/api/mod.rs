// ============================================================================
// HTTP API
// ============================================================================
//
// Thin actix-web layer over the pipeline components:
// - /api/orders/produce[...]   - single orders and bulk jobs
// - /api/orders/statistics     - aggregation snapshot and reset
// - /api/orders/dlq            - recent dead-lettered orders
// - /health, /metrics          - health monitor and Prometheus exposition
//
// ============================================================================

mod handlers;

use actix_web::{web, App, HttpServer};
use std::sync::Arc;

use crate::actors::HealthMonitorActor;
use crate::metrics::Metrics;
use crate::pipeline::{AggregationTracker, DeadLetterObserver, OrderProducer, RetryEscalationConsumer};

/// Shared handles the handlers read from
pub struct AppState {
    pub producer: Arc<OrderProducer>,
    pub tracker: Arc<AggregationTracker>,
    pub retry_consumer: Arc<RetryEscalationConsumer>,
    pub dead_letters: Arc<DeadLetterObserver>,
    pub health: actix::Addr<HealthMonitorActor>,
    pub metrics: Arc<Metrics>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/orders")
            .route("/produce", web::post().to(handlers::produce_order))
            .route("/produce/random", web::post().to(handlers::produce_random))
            .route("/produce/jobs/{id}", web::get().to(handlers::job_status))
            .route("/produce/jobs/{id}", web::delete().to(handlers::cancel_job))
            .route("/statistics", web::get().to(handlers::statistics))
            .route("/statistics/reset", web::post().to(handlers::reset_statistics))
            .route("/dlq", web::get().to(handlers::dead_letters)),
    )
    .route("/health", web::get().to(handlers::health))
    .route("/metrics", web::get().to(handlers::metrics));
}

/// Serve the API until the server is stopped
pub async fn start_server(state: web::Data<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    tracing::info!("🌐 Starting HTTP server on http://{}:{}", host, port);

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind((host, port))?
        .run()
        .await
}
