// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure (actix) around the order pipeline.
//
// Structure:
// - core/           - health types shared with the HTTP surface
// - infrastructure/ - HealthMonitorActor and CoordinatorActor
//
// Note: The pipeline itself (retry escalation, aggregation, dead letters)
//       runs on plain tasks. Actors are reserved for supervision only.
//
// ============================================================================

mod core;
mod infrastructure;

pub use self::core::HealthStatus;
pub use infrastructure::{CoordinatorActor, GetSystemHealth, HealthMonitorActor, Shutdown, SystemHealth};
