//! Combined retry and circuit breaker protection for one named dependency.

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use super::{CircuitBreaker, RetryExecutor};
use crate::errors::{PipelineError, PipelineResult};

/// Guards calls to a single external service.
///
/// The circuit is checked once up front so an open circuit fails fast
/// without entering the retry loop. Every attempt then runs through the
/// breaker: failures are counted per attempt, and a circuit that opens
/// mid-loop stops the remaining retries.
#[derive(Clone)]
pub struct ResilienceGuard {
    service: String,
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl ResilienceGuard {
    /// Creates a guard for `service`.
    pub fn new(service: impl Into<String>, breaker: Arc<CircuitBreaker>, retry: RetryExecutor) -> Self {
        Self {
            service: service.into(),
            breaker,
            retry,
        }
    }

    /// Returns the guarded service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Executes an operation with retry and circuit breaking applied.
    pub async fn execute<F, Fut, T>(&self, operation: &str, f: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        if self.breaker.is_open(&self.service).await {
            warn!(service = %self.service, operation, "Circuit open, skipping call");
            return Err(PipelineError::CircuitOpen {
                service: self.service.clone(),
            });
        }

        let breaker = &self.breaker;
        let service = self.service.as_str();
        let f = &f;
        self.retry
            .execute(operation, move || breaker.call(service, f))
            .await
    }
}

impl std::fmt::Debug for ResilienceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceGuard")
            .field("service", &self.service)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
