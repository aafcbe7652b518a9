use actix::prelude::*;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::health_monitor::StopActor;
use super::{GetSystemHealth, HealthMonitorActor, UpdateHealth};
use crate::actors::core::HealthStatus;
use crate::messaging::PartitionedConsumer;

// ============================================================================
// Coordinator Actor - Supervises the consumer runners
// ============================================================================
//
// Responsibilities:
// - Start one runner task per PartitionedConsumer
// - Report runner health to the HealthMonitorActor
// - Flag a runner whose loop ends before shutdown as unhealthy
// - Log system health periodically
// - Coordinate graceful shutdown (cancel runners and wait for them, stop the monitor)
//
// Actor Hierarchy:
//   CoordinatorActor (Supervisor)
//   ├── order-consumer runner (primary + retry channels)
//   ├── dlq-observer runner   (dead-letter channel)
//   └── HealthMonitorActor
//
// ============================================================================

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);
const RUNNER_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

pub struct CoordinatorActor {
    consumers: Vec<PartitionedConsumer>,
    runners: Vec<JoinHandle<()>>,
    health_monitor: Addr<HealthMonitorActor>,
    shutdown: CancellationToken,
}

impl CoordinatorActor {
    pub fn new(consumers: Vec<PartitionedConsumer>, health_monitor: Addr<HealthMonitorActor>) -> Self {
        Self {
            consumers,
            runners: Vec::new(),
            health_monitor,
            shutdown: CancellationToken::new(),
        }
    }

    fn start_runners(&mut self, ctx: &mut Context<Self>) {
        tracing::info!(count = self.consumers.len(), "Starting supervised consumer runners");

        for consumer in self.consumers.drain(..) {
            let name = consumer.name();
            let token = self.shutdown.child_token();
            let addr = ctx.address();

            self.runners.push(actix::spawn(async move {
                consumer.run(token).await;
                addr.do_send(RunnerStopped { name });
            }));

            self.health_monitor.do_send(UpdateHealth {
                component: name.to_string(),
                status: HealthStatus::Healthy,
                details: Some("consumer loop running".to_string()),
            });
        }

        tracing::info!("✅ All consumer runners started");
    }
}

impl Actor for CoordinatorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("🎯 CoordinatorActor started");
        self.start_runners(ctx);

        ctx.run_interval(HEALTH_LOG_INTERVAL, |act, _ctx| {
            let health_monitor = act.health_monitor.clone();
            actix::spawn(async move {
                match health_monitor.send(GetSystemHealth).await {
                    Ok(health) => match health.overall_status {
                        HealthStatus::Healthy => {
                            tracing::debug!("System health check: Healthy");
                        }
                        HealthStatus::Degraded(ref msg) => {
                            tracing::warn!("System health check: Degraded - {}", msg);
                        }
                        HealthStatus::Unhealthy(ref msg) => {
                            tracing::error!("System health check: Unhealthy - {}", msg);
                        }
                    },
                    Err(e) => {
                        tracing::error!("Failed to get system health: {}", e);
                    }
                }
            });
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        tracing::info!("🛑 CoordinatorActor stopping - cancelling consumer runners");
        self.shutdown.cancel();
        Running::Stop
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("🛑 CoordinatorActor stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

/// Resolves once every runner has stopped its partition workers
impl Handler<Shutdown> for CoordinatorActor {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        tracing::info!(runners = self.runners.len(), "Received shutdown signal");

        self.shutdown.cancel();
        self.health_monitor.do_send(StopActor);
        ctx.stop();

        let runners = std::mem::take(&mut self.runners);
        Box::pin(async move {
            let drained = tokio::time::timeout(RUNNER_DRAIN_TIMEOUT, async {
                for runner in runners {
                    if let Err(e) = runner.await {
                        tracing::error!(error = %e, "Consumer runner panicked");
                    }
                }
            })
            .await;

            if drained.is_err() {
                tracing::warn!(
                    timeout_secs = RUNNER_DRAIN_TIMEOUT.as_secs(),
                    "Consumer runners did not stop in time"
                );
            }
        })
    }
}

/// Sent by a runner task once its consumer loop has returned
#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct RunnerStopped {
    pub name: &'static str,
}

impl Handler<RunnerStopped> for CoordinatorActor {
    type Result = ();

    fn handle(&mut self, msg: RunnerStopped, _: &mut Self::Context) {
        if self.shutdown.is_cancelled() {
            tracing::info!(consumer = msg.name, "Consumer runner stopped");
            return;
        }

        tracing::error!(consumer = msg.name, "Consumer loop ended unexpectedly");
        self.health_monitor.do_send(UpdateHealth {
            component: msg.name.to_string(),
            status: HealthStatus::Unhealthy("consumer loop ended".to_string()),
            details: None,
        });
    }
}
