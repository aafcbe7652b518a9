use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards the broker producer. Once the broker keeps rejecting publishes the
// breaker opens and callers fail fast with `CircuitOpen` instead of waiting
// out a send timeout per message; the consumer side turns that into a
// withheld acknowledgment, so nothing is lost while the breaker is open.
//
// Closed --(failure_threshold failures)--> Open
// Open   --(timeout elapsed)-------------> HalfOpen
// HalfOpen --(success_threshold ok)------> Closed
// HalfOpen --(any failure)---------------> Open
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used by the `circuit_breaker_state` metric
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time to wait before attempting recovery
    pub timeout: Duration,
    /// Number of successes needed to close circuit from half-open
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
        }
    }

    /// Run `operation` unless the circuit is open
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        self.admit::<E>().await?;

        match operation.await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut guard = self.state.lock().await;

        if guard.state != CircuitState::Open {
            return Ok(());
        }

        match guard.opened_at {
            Some(opened_at) if opened_at.elapsed() >= self.config.timeout => {
                tracing::info!(breaker = self.name, "Circuit breaker half-open, probing");
                guard.state = CircuitState::HalfOpen;
                guard.success_count = 0;
                Ok(())
            }
            _ => Err(CircuitBreakerError::CircuitOpen),
        }
    }

    async fn record_success(&self) {
        let mut guard = self.state.lock().await;
        let current = guard.state;

        match current {
            CircuitState::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.config.success_threshold {
                    tracing::info!(
                        breaker = self.name,
                        successes = guard.success_count,
                        "Circuit breaker closed"
                    );
                    guard.state = CircuitState::Closed;
                    guard.failure_count = 0;
                    guard.success_count = 0;
                    guard.opened_at = None;
                }
            }
            CircuitState::Closed => {
                guard.failure_count = 0;
            }
            CircuitState::Open => {
                tracing::warn!(breaker = self.name, "Success recorded while circuit is open");
            }
        }
    }

    async fn record_failure(&self) {
        let mut guard = self.state.lock().await;
        guard.failure_count += 1;
        let current = guard.state;

        match current {
            CircuitState::Closed if guard.failure_count >= self.config.failure_threshold => {
                tracing::warn!(
                    breaker = self.name,
                    failures = guard.failure_count,
                    "Circuit breaker opened"
                );
                guard.state = CircuitState::Open;
                guard.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = self.name, "Probe failed, reopening circuit");
                guard.state = CircuitState::Open;
                guard.success_count = 0;
                guard.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.lock().await.state
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}
