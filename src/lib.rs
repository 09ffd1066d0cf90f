//! Catalog Ingestion Pipeline
//!
//! A resilient pipeline that pulls items from an upstream catalog, persists
//! them, submits them to a downstream processor and replays failures from a
//! dead-letter queue.
//!
//! # Features
//!
//! - **Shared circuit breaking**: breaker state lives in a pluggable store
//!   (in-process or Postgres) so several workers see the same health
//! - **Retries**: exponential backoff with jitter for transient failures
//! - **Dead letters**: SQS with a local directory fallback, never dropping an item
//! - **Reprocessing**: a long-running consumer that replays and acknowledges
//! - **Observability**: structured `tracing` logs and an injected metrics collector
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use integrations_catalog_pipeline::{
//!     DefaultMetricsCollector, HttpProcessingClient, InMemoryCircuitStore, InMemoryRepository,
//!     PipelineConfig, PipelineOrchestrator, PokeApiCatalog,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_env()?;
//!     let metrics = Arc::new(DefaultMetricsCollector::new());
//!     let transport = config.transport()?;
//!
//!     let breaker = config.circuit_breaker(Arc::new(InMemoryCircuitStore::new()), metrics.clone());
//!     let queue = config.durable_queue()?;
//!     let sink = Arc::new(config.dead_letter_sink(queue, metrics.clone()));
//!
//!     let catalog = PokeApiCatalog::new(
//!         transport.clone(),
//!         config.guard("catalog", breaker.clone(), metrics.clone()),
//!         config.catalog_base_url.clone(),
//!     );
//!     let processing = HttpProcessingClient::new(
//!         transport,
//!         config.guard("processing", breaker, metrics.clone()),
//!         config.processing_endpoint.clone(),
//!         sink,
//!     );
//!
//!     let orchestrator = PipelineOrchestrator::new(
//!         Arc::new(catalog),
//!         Arc::new(InMemoryRepository::new()),
//!         Arc::new(InMemoryRepository::new()),
//!         Arc::new(processing),
//!     )
//!     .with_metrics(metrics);
//!
//!     let stats = orchestrator.run().await?;
//!     println!("processed {} posts", stats.posts_processed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod dlq;
pub mod errors;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod processing;
pub mod repository;
pub mod reprocessor;
pub mod resilience;
pub mod search;
pub mod signing;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use catalog::{CatalogClient, PokeApiCatalog};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use dlq::{DeadLetterSink, DurableQueue, InMemoryQueue, LocalFallbackStore, SqsQueue};
pub use errors::{ErrorKind, PipelineError, PipelineResult};
pub use observability::{
    init_logging, DefaultMetricsCollector, LogConfig, MetricsCollector, NoopMetricsCollector,
};
pub use pipeline::PipelineOrchestrator;
pub use processing::{HttpProcessingClient, ProcessingClient};
pub use repository::{InMemoryRepository, ItemRepository};
pub use reprocessor::{BatchOutcome, Reprocessor, ReprocessorConfig, ReprocessorState};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitStateStore, InMemoryCircuitStore,
    ResilienceGuard, RetryConfig, RetryExecutor,
};
pub use search::{OpenSearchIndexer, SearchIndexer};

// Type re-exports
pub use types::{
    Comment, DlqMessage, Document, Entity, ItemErrorStatus, ItemRef, ItemType, PipelineRunStats,
    Post, Value,
};

/// Mock implementations for testing.
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
