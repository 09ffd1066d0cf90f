//! Circuit breaker backed by a shared state store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::clock::{Clock, SystemClock};
use super::state_store::{CircuitSnapshot, CircuitStateStore};
use crate::errors::{PipelineError, PipelineResult};
use crate::observability::{MetricsCollector, NoopMetricsCollector};

/// Attempts at the timed reset before giving up and reporting the circuit open.
const RESET_CAS_ATTEMPTS: u32 = 3;

/// Circuit breaker state as observed by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests are allowed.
    Closed,
    /// Circuit is open - requests are blocked.
    Open,
}

impl CircuitState {
    /// Returns the lowercase state name.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u64,
    /// How long the circuit stays open after the last failure.
    pub reset_timeout: Duration,
    /// Prefix for state keys in the shared store.
    pub namespace: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            namespace: "circuit_breaker".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Lifetime of an idle state entry.
    pub fn state_ttl(&self) -> Duration {
        self.reset_timeout * 2
    }
}

/// Circuit breaker tracking the health of named services.
///
/// A service is open while it has at least `failure_threshold` recorded
/// failures and the last one happened less than `reset_timeout` ago. Once the
/// timeout passes, the next check clears the counter and lets calls through;
/// there is no separate half-open probing state.
///
/// If the state store cannot be read the breaker reports the service as open.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    store: Arc<dyn CircuitStateStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsCollector>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker over a state store.
    pub fn new(config: CircuitBreakerConfig, store: Arc<dyn CircuitStateStore>) -> Self {
        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the metrics collector notified of state changes.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn state_key(&self, service: &str) -> String {
        format!("{}:{}", self.config.namespace, service)
    }

    /// Returns the current state of a service.
    pub async fn state(&self, service: &str) -> CircuitState {
        if self.is_open(service).await {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Returns true if calls to `service` should be refused.
    pub async fn is_open(&self, service: &str) -> bool {
        match self.evaluate(service).await {
            Ok(open) => open,
            Err(err) => {
                error!(service, error = %err, "Error checking circuit state, failing open");
                true
            }
        }
    }

    async fn evaluate(&self, service: &str) -> PipelineResult<bool> {
        let key = self.state_key(service);

        for _ in 0..RESET_CAS_ATTEMPTS {
            let now = self.clock.now();
            let Some(snapshot) = self.store.load(&key, now).await? else {
                return Ok(false);
            };

            if snapshot.failures < self.config.failure_threshold {
                return Ok(false);
            }

            if self.within_reset_timeout(&snapshot, now) {
                warn!(
                    service,
                    failures = snapshot.failures,
                    "Circuit OPEN"
                );
                return Ok(true);
            }

            if self.store.reset_if_unchanged(&key, &snapshot).await? {
                info!(service, "Reset circuit after timeout");
                self.metrics
                    .record_circuit_state(service, CircuitState::Closed);
                return Ok(false);
            }
        }

        warn!(service, "Circuit state kept changing during timed reset");
        Ok(true)
    }

    fn within_reset_timeout(&self, snapshot: &CircuitSnapshot, now: DateTime<Utc>) -> bool {
        match snapshot.last_failure_at {
            // A stamp ahead of `now` (clock skew between instances) counts as zero elapsed.
            Some(at) => {
                let elapsed = (now - at).to_std().unwrap_or(Duration::ZERO);
                elapsed < self.config.reset_timeout
            }
            None => false,
        }
    }

    /// Records a failed call to `service`.
    pub async fn record_failure(&self, service: &str) -> PipelineResult<()> {
        let snapshot = self
            .store
            .record_failure(
                &self.state_key(service),
                self.clock.now(),
                self.config.state_ttl(),
            )
            .await?;

        warn!(service, failures = snapshot.failures, "Recorded failure");
        if snapshot.failures == self.config.failure_threshold {
            warn!(service, "Circuit opened");
            self.metrics.record_circuit_state(service, CircuitState::Open);
        }
        Ok(())
    }

    /// Clears the failure count of `service`.
    pub async fn reset(&self, service: &str) -> PipelineResult<()> {
        self.store.reset(&self.state_key(service)).await
    }

    /// Runs `f` guarded by the breaker for `service`.
    ///
    /// Refuses with [`PipelineError::CircuitOpen`] when the circuit is open.
    /// Success resets the failure count; any error is recorded and returned
    /// unchanged.
    pub async fn call<F, Fut, T>(&self, service: &str, f: F) -> PipelineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        if self.is_open(service).await {
            return Err(PipelineError::CircuitOpen {
                service: service.to_string(),
            });
        }

        match f().await {
            Ok(value) => {
                if let Err(err) = self.reset(service).await {
                    error!(service, error = %err, "Failed to reset circuit");
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(store_err) = self.record_failure(service).await {
                    error!(service, error = %store_err, "Failed to record failure");
                }
                Err(err)
            }
        }
    }
}
