//! Wires the retry policy and circuit breaker into one entry point for
//! the collector and sync managers: `ErrorHandler::execute` runs a
//! fallible operation against a device, retrying transient failures with
//! backoff and consulting/updating that device's breaker, and rolls up
//! everything into `ErrorStats`.

use std::future::Future;
use std::time::Duration;

use edge_common::{ErrorKind, Id};

use crate::circuit::CircuitBreaker;
use crate::retry::RetryPolicy;
use crate::stats::ErrorStats;

/// Returned when `execute` cannot produce a value for the caller, either
/// because the breaker is open or every retry was exhausted.
#[derive(Debug, Clone)]
pub enum HandlerError {
    CircuitOpen { device_id: Id },
    Exhausted {
        device_id: Id,
        operation: String,
        attempts: u32,
        last_kind: ErrorKind,
        last_message: String,
    },
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::CircuitOpen { device_id } => {
                write!(f, "circuit open for device {}", device_id.0)
            }
            HandlerError::Exhausted {
                device_id,
                operation,
                attempts,
                last_message,
                ..
            } => write!(
                f,
                "{operation} against device {} failed after {attempts} attempt(s): {last_message}",
                device_id.0
            ),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<HandlerError> for edge_common::EdgeError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::CircuitOpen { device_id } => {
                edge_common::EdgeError::new(ErrorKind::CircuitOpen(device_id.0))
            }
            HandlerError::Exhausted { last_kind, .. } => edge_common::EdgeError::new(last_kind),
        }
    }
}

pub struct ErrorHandler {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    stats: ErrorStats,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self {
            breaker: CircuitBreaker::with_defaults(),
            retry: RetryPolicy::default(),
            stats: ErrorStats::new(),
        }
    }
}

impl ErrorHandler {
    pub fn new(breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self {
            breaker,
            retry,
            stats: ErrorStats::new(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> &ErrorStats {
        &self.stats
    }

    /// Runs `op` against `device_id`, retrying on retryable `ErrorKind`s
    /// with backoff up to `retry.max_retries` additional attempts. `op`
    /// returns a raw message on failure; it is categorized via
    /// `ErrorKind::categorize` on each attempt. Breaker state is
    /// consulted before the first attempt and updated after the last.
    pub async fn execute<F, Fut, T>(
        &self,
        device_id: &Id,
        operation: &str,
        mut op: F,
    ) -> Result<T, HandlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        if !self.breaker.admit(device_id) {
            return Err(HandlerError::CircuitOpen {
                device_id: device_id.clone(),
            });
        }

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    self.breaker.record_success(device_id);
                    return Ok(value);
                }
                Err(message) => {
                    let kind = ErrorKind::categorize(&message);
                    self.stats.record(device_id, operation, &kind, &message);

                    let retryable = kind.is_retryable() && attempt < self.retry.max_retries;
                    if !retryable {
                        self.breaker.record_failure(device_id);
                        return Err(HandlerError::Exhausted {
                            device_id: device_id.clone(),
                            operation: operation.to_string(),
                            attempts: attempt + 1,
                            last_kind: kind,
                            last_message: message,
                        });
                    }

                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let handler = ErrorHandler::new(
            CircuitBreaker::new(10, Duration::from_secs(1)),
            RetryPolicy {
                jitter: false,
                ..RetryPolicy::default()
            },
        );
        let device = Id::new("meter-1");
        let calls = AtomicU32::new(0);

        let result = handler
            .execute(&device, "collect", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("read timed out".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_kind_fails_on_first_attempt() {
        let handler = ErrorHandler::default();
        let device = Id::new("meter-2");
        let calls = AtomicU32::new(0);

        let result: Result<(), HandlerError> = handler
            .execute(&device, "collect", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("invalid register 99001".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_opens_breaker_after_threshold() {
        let handler = ErrorHandler::new(
            CircuitBreaker::new(1, Duration::from_secs(60)),
            RetryPolicy {
                max_retries: 0,
                jitter: false,
                ..RetryPolicy::default()
            },
        );
        let device = Id::new("meter-3");

        let _ = handler
            .execute(&device, "collect", || async { Err::<(), _>("timed out".to_string()) })
            .await;

        assert!(handler.breaker().is_open(&device));
        let result: Result<(), HandlerError> = handler
            .execute(&device, "collect", || async { Ok(()) })
            .await;
        assert!(matches!(result, Err(HandlerError::CircuitOpen { .. })));
    }

    #[test]
    fn stats_roll_up_per_operation() {
        let handler = ErrorHandler::default();
        let device = Id::new("meter-4");
        handler.stats().record(&device, "collect", &ErrorKind::Timeout, "timed out");
        assert_eq!(handler.stats().totals_by_kind().get("timeout"), Some(&1));
    }
}
