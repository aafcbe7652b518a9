use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Transient Retry
// ============================================================================
//
// Repeats a broker call while its error reports itself as transient, waiting
// a capped, growing delay between attempts. Used on the producer path, where
// a broker hiccup should not cost the caller an order.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Attempts in total, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Cap for the growing delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl RetryConfig {
    /// One retry after 200 ms, for request paths that should fail fast
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// How a retried operation ended
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Every attempt failed transiently; carries the last error
    Failed(E),
    /// The error said retrying would not help
    PermanentFailure(E),
}

/// Errors that may clear up on their own if the operation is repeated
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Delay schedule derived from a `RetryConfig`
#[derive(Debug)]
struct Backoff {
    next: Duration,
    multiplier: f64,
    ceiling: Duration,
}

impl Backoff {
    fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay.min(config.max_delay),
            multiplier: config.multiplier.max(1.0),
            ceiling: config.max_delay,
        }
    }

    /// Delay to wait now; grows the following one
    fn step(&mut self) -> Duration {
        let current = self.next;
        self.next = Duration::try_from_secs_f64(self.next.as_secs_f64() * self.multiplier)
            .map_or(self.ceiling, |grown| grown.min(self.ceiling));
        current
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of
/// attempts. `operation` receives the 1-based attempt number.
pub async fn retry_on_transient<F, Fut, T, E>(config: RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = Backoff::new(&config);

    let mut attempt = 1;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, max_attempts = max_attempts, "Recovered on retry");
                }
                return RetryResult::Success(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            tracing::warn!(attempt = attempt, error = %error, "Non-transient error, giving up");
            return RetryResult::PermanentFailure(error);
        }
        if attempt == max_attempts {
            tracing::error!(attempts = attempt, error = %error, "Retry budget spent");
            return RetryResult::Failed(error);
        }

        let delay = backoff.step();
        tracing::warn!(
            attempt = attempt,
            max_attempts = max_attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "Transient error, backing off"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient: {})", self.transient)
        }
    }

    impl IsTransient for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_on_transient(fast_config(3), |_attempt| {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError { transient: true })
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Success("success")));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let result = retry_on_transient(fast_config(2), |_attempt| async {
            Err::<(), _>(TestError { transient: true })
        })
        .await;

        assert!(matches!(result, RetryResult::Failed(_)));
    }

    #[test]
    fn test_backoff_grows_up_to_the_ceiling() {
        let mut backoff = Backoff::new(&RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        });

        let delays: Vec<_> = (0..4).map(|_| backoff.step().as_millis()).collect();
        assert_eq!(delays, vec![40, 80, 100, 100]);
    }

    #[tokio::test]
    async fn test_attempt_numbers_start_at_one() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result = retry_on_transient(fast_config(3), |attempt| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(attempt);
                Err::<(), _>(TestError { transient: true })
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Failed(_)));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_on_transient(fast_config(5), |_attempt| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError { transient: false })
            }
        })
        .await;

        assert!(matches!(result, RetryResult::PermanentFailure(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
