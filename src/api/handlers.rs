use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::actors::GetSystemHealth;
use crate::models::Order;

const DEFAULT_RANDOM_COUNT: u32 = 10;
const DEFAULT_DLQ_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub order_id: String,
    pub product: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct RandomQuery {
    pub count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    pub total_orders: u64,
    pub total_price: f64,
    pub running_average: f64,
    pub failed_orders: u64,
    pub retries_in_flight: usize,
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

pub async fn produce_order(state: web::Data<AppState>, body: web::Json<OrderRequest>) -> impl Responder {
    let request = body.into_inner();
    if request.order_id.trim().is_empty() {
        return bad_request("orderId must not be blank");
    }

    let order = Order::new(request.order_id, request.product, request.price);
    let order_id = order.order_id.clone();
    state.producer.produce_order(order);

    HttpResponse::Ok().json(serde_json::json!({
        "message": "Order produced successfully",
        "orderId": order_id,
    }))
}

pub async fn produce_random(state: web::Data<AppState>, query: web::Query<RandomQuery>) -> impl Responder {
    let count = query.count.unwrap_or(DEFAULT_RANDOM_COUNT);
    if count == 0 {
        return bad_request("count must be at least 1");
    }

    let job = state.producer.produce_random(count);

    HttpResponse::Accepted().json(serde_json::json!({
        "message": format!("Started producing {} random orders", count),
        "jobId": job.id(),
    }))
}

pub async fn job_status(state: web::Data<AppState>, id: web::Path<Uuid>) -> impl Responder {
    match state.producer.job_status(id.into_inner()) {
        Some(report) => HttpResponse::Ok().json(report),
        None => HttpResponse::NotFound().json(serde_json::json!({ "error": "unknown job" })),
    }
}

pub async fn cancel_job(state: web::Data<AppState>, id: web::Path<Uuid>) -> impl Responder {
    match state.producer.cancel_job(id.into_inner()) {
        Some(report) => HttpResponse::Ok().json(report),
        None => HttpResponse::NotFound().json(serde_json::json!({ "error": "unknown job" })),
    }
}

pub async fn statistics(state: web::Data<AppState>) -> impl Responder {
    let snapshot = state.tracker.snapshot();

    HttpResponse::Ok().json(StatisticsResponse {
        total_orders: snapshot.total_orders,
        total_price: snapshot.total_price,
        running_average: snapshot.running_average,
        failed_orders: state.dead_letters.failed_count(),
        retries_in_flight: state.retry_consumer.ledger().in_flight(),
    })
}

pub async fn reset_statistics(state: web::Data<AppState>) -> impl Responder {
    state.tracker.reset();
    HttpResponse::Ok().json(serde_json::json!({ "message": "Statistics reset successfully" }))
}

pub async fn dead_letters(state: web::Data<AppState>, query: web::Query<LimitQuery>) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_DLQ_LIMIT);
    HttpResponse::Ok().json(state.dead_letters.recent(limit))
}

pub async fn health(state: web::Data<AppState>) -> impl Responder {
    match state.health.send(GetSystemHealth).await {
        Ok(health) if health.overall_status.is_unhealthy() => {
            HttpResponse::ServiceUnavailable().json(health)
        }
        Ok(health) => HttpResponse::Ok().json(health),
        Err(e) => {
            tracing::error!(error = %e, "Health monitor unreachable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "error": "health monitor unavailable" }))
        }
    }
}

pub async fn metrics(state: web::Data<AppState>) -> impl Responder {
    match state.metrics.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::HealthMonitorActor;
    use crate::api::configure;
    use crate::config::Config;
    use crate::messaging::testing::RecordingPublisher;
    use crate::metrics::Metrics;
    use crate::pipeline::{
        AggregationTracker, DeadLetterObserver, DeadLetterRecord, OrderProducer, RandomFailurePolicy,
        RetryEscalationConsumer,
    };
    use actix::Actor;
    use actix_web::{test, App};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        state: web::Data<AppState>,
        publisher: Arc<RecordingPublisher>,
    }

    fn fixture() -> Fixture {
        let config = Config::from_lookup(|key| match key {
            "PRODUCER_PACING_MS" => Some("1".to_string()),
            _ => None,
        })
        .unwrap();
        let publisher = Arc::new(RecordingPublisher::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let tracker = Arc::new(AggregationTracker::new());

        let state = AppState {
            producer: Arc::new(OrderProducer::new(&config, publisher.clone(), metrics.clone())),
            tracker: tracker.clone(),
            retry_consumer: Arc::new(RetryEscalationConsumer::new(
                &config,
                Arc::new(RandomFailurePolicy::new(0.0)),
                publisher.clone(),
                tracker,
                metrics.clone(),
            )),
            dead_letters: Arc::new(DeadLetterObserver::new(10, metrics.clone())),
            health: HealthMonitorActor::new(metrics.clone()).start(),
            metrics,
        };

        Fixture {
            state: web::Data::new(state),
            publisher,
        }
    }

    #[actix_web::test]
    async fn test_produce_order_publishes_in_background() {
        let fx = fixture();
        let app = test::init_service(App::new().app_data(fx.state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/orders/produce")
            .set_json(serde_json::json!({"orderId": "ORD-1", "product": "Mouse", "price": 25.0}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["orderId"], "ORD-1");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.publisher.sent_to("orders").len(), 1);
    }

    #[actix_web::test]
    async fn test_blank_order_id_is_rejected() {
        let fx = fixture();
        let app = test::init_service(App::new().app_data(fx.state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/orders/produce")
            .set_json(serde_json::json!({"orderId": "  ", "product": "Mouse", "price": 25.0}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_random_job_lifecycle() {
        let fx = fixture();
        let app = test::init_service(App::new().app_data(fx.state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/orders/produce/random?count=3")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let job_id = body["jobId"].as_str().unwrap().to_string();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/orders/produce/jobs/{}", job_id))
            .to_request();
        let report: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report["status"], "completed");
        assert_eq!(report["published"], 3);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/orders/produce/jobs/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_statistics_and_reset() {
        let fx = fixture();
        fx.state.tracker.record_success(10.0);
        fx.state.tracker.record_success(30.0);
        fx.state.dead_letters.observe(DeadLetterRecord {
            order_id: "ORD-9".to_string(),
            product: "SSD".to_string(),
            price: 80.0,
            attempts: 3,
            reason: Some("Simulated temporary failure".to_string()),
            observed_at: chrono::Utc::now(),
        });
        let app = test::init_service(App::new().app_data(fx.state.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/orders/statistics").to_request();
        let stats: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats["totalOrders"], 2);
        assert_eq!(stats["runningAverage"], 20.0);
        assert_eq!(stats["failedOrders"], 1);

        let req = test::TestRequest::post().uri("/api/orders/statistics/reset").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/api/orders/statistics").to_request();
        let stats: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats["totalOrders"], 0);
        assert_eq!(stats["runningAverage"], 0.0);
        assert_eq!(stats["failedOrders"], 1);

        let req = test::TestRequest::get().uri("/api/orders/dlq?limit=5").to_request();
        let records: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(records[0]["orderId"], "ORD-9");
    }

    #[actix_web::test]
    async fn test_health_and_metrics() {
        let fx = fixture();
        let app = test::init_service(App::new().app_data(fx.state.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let health: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(health["overallStatus"]["state"], "healthy");

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert!(String::from_utf8_lossy(&body).contains("circuit_breaker_state"));
    }
}
