//! Resilience patterns for the catalog pipeline.
//!
//! Provides retry logic, a circuit breaker with shared state, and a guard
//! combining both around calls to one external service.

mod circuit_breaker;
mod clock;
mod guard;
mod retry;
mod state_store;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, SystemClock};
pub use guard::ResilienceGuard;
pub use retry::{retry, RetryConfig, RetryExecutor};
pub use state_store::{CircuitSnapshot, CircuitStateStore, InMemoryCircuitStore};

pub(crate) use state_store::ttl_after;
