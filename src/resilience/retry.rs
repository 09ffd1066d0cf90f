//! Retry logic with exponential backoff and jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{PipelineError, PipelineResult};
use crate::observability::{MetricsCollector, NoopMetricsCollector};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay doubled after every failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
        }
    }
}

/// Retry executor with exponential backoff.
///
/// After the `n`-th failed attempt the executor waits
/// `min(initial_delay * 2^n + U(0, jitter), max_delay)`. A server-provided
/// retry-after hint lengthens the wait but never past `max_delay`. Errors
/// that are not retryable are returned at once.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Arc<dyn MetricsCollector>,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Sets the metrics collector notified of every retry.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an operation with retry logic.
    ///
    /// Returns the first success, or the error of the last attempt.
    pub async fn execute<F, Fut, T>(&self, operation: &str, f: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match f().await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(operation, attempt, error = %error, "Not retrying");
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
                return Err(error);
            }

            let delay = self.calculate_delay(attempt, error.retry_after());
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            self.metrics.record_retry(operation, attempt);
            tokio::time::sleep(delay).await;
        }
    }

    /// Calculates the delay after `failed_attempts` failures.
    fn calculate_delay(&self, failed_attempts: u32, server_retry_after: Option<Duration>) -> Duration {
        let max = self.config.max_delay.as_secs_f64();
        let exponent = failed_attempts.min(30) as i32;
        let base = self.config.initial_delay.as_secs_f64() * 2f64.powi(exponent);
        let jitter = rand::random::<f64>() * self.config.jitter.as_secs_f64();

        let mut delay = (base + jitter).min(max);
        if let Some(retry_after) = server_retry_after {
            delay = delay.max(retry_after.as_secs_f64().min(max));
        }
        Duration::from_secs_f64(delay.max(0.0))
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Convenience for one-off calls outside an executor.
pub async fn retry<F, Fut, T>(operation: &str, config: RetryConfig, f: F) -> PipelineResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    RetryExecutor::new(config).execute(operation, f).await
}
