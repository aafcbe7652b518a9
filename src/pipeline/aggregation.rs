use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

// ============================================================================
// Aggregation Tracker
// ============================================================================
//
// Count and sum live in one struct behind one mutex, so every update touches
// both atomically and every read sees a matching pair. The lock is never held
// across I/O; callers only ever do arithmetic under it.
//
// ============================================================================

/// Consistent view of the running totals
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub total_orders: u64,
    pub total_price: f64,
    pub running_average: f64,
}

#[derive(Default)]
struct Totals {
    orders: u64,
    price: f64,
}

impl Totals {
    fn snapshot(&self) -> AggregateSnapshot {
        let running_average = if self.orders == 0 {
            0.0
        } else {
            self.price / self.orders as f64
        };

        AggregateSnapshot {
            total_orders: self.orders,
            total_price: self.price,
            running_average,
        }
    }
}

#[derive(Default)]
pub struct AggregationTracker {
    totals: Mutex<Totals>,
}

impl AggregationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn totals(&self) -> MutexGuard<'_, Totals> {
        // Totals are plain numbers; a panicked holder cannot leave them torn
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one processed order and return the totals right after it
    pub fn record_success(&self, price: f64) -> AggregateSnapshot {
        let snapshot = {
            let mut totals = self.totals();
            totals.orders += 1;
            totals.price += price;
            totals.snapshot()
        };

        tracing::info!(
            total_orders = snapshot.total_orders,
            running_average = %format!("{:.2}", snapshot.running_average),
            "→ Running average price updated"
        );

        snapshot
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        self.totals().snapshot()
    }

    pub fn reset(&self) {
        *self.totals() = Totals::default();
        tracing::info!("Statistics reset");
    }
}
