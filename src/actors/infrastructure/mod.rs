// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// - Health monitoring
// - Coordination and supervision of the consumer runners
//
// ============================================================================

mod coordinator;
mod health_monitor;

pub use coordinator::{CoordinatorActor, Shutdown};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
