//! Configuration module for the catalog pipeline.
//!
//! Provides endpoint, timeout, retry, circuit breaker, dead-letter and
//! reprocessor settings, read from the environment or assembled with
//! [`PipelineConfigBuilder`], plus helpers wiring them into components.

use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::DEFAULT_CATALOG_URL;
use crate::dlq::{
    DeadLetterSink, DurableQueue, LocalFallbackStore, SqsConfig, SqsQueue, MAX_WAIT_SECONDS,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::observability::MetricsCollector;
use crate::persistence::DatabaseConfig;
use crate::processing::DEFAULT_PROCESSING_ENDPOINT;
use crate::reprocessor::ReprocessorConfig;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitStateStore, ResilienceGuard, RetryConfig,
    RetryExecutor,
};
use crate::signing::SigningParams;
use crate::transport::{HttpTransport, ReqwestTransport, TransportConfig};

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default AWS region for the dead-letter queue.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Headroom a queue receive gets beyond its long-poll wait.
const RECEIVE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Default fallback directory for dead-letter files.
pub const DEFAULT_FALLBACK_DIR: &str = "dlq_fallback";

/// Dead-letter queue settings.
#[derive(Clone)]
pub struct DlqSettings {
    /// SQS queue URL. Without one, every dead letter goes to the fallback directory.
    pub queue_url: Option<String>,
    /// AWS region.
    pub region: String,
    /// AWS access key id.
    pub access_key_id: Option<String>,
    /// AWS secret access key.
    pub(crate) secret_access_key: Option<SecretString>,
    /// AWS session token.
    pub(crate) session_token: Option<SecretString>,
    /// Local fallback directory.
    pub fallback_dir: PathBuf,
    /// Attempts for a single queue send.
    pub send_attempts: u32,
    /// Pause between queue send attempts.
    pub send_retry_delay: Duration,
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self {
            queue_url: None,
            region: DEFAULT_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            fallback_dir: PathBuf::from(DEFAULT_FALLBACK_DIR),
            send_attempts: 3,
            send_retry_delay: Duration::from_millis(200),
        }
    }
}

impl DlqSettings {
    /// Signing parameters for SQS requests.
    pub fn signing_params(&self) -> SigningParams {
        let mut params = SigningParams::new(self.region.clone(), "sqs")
            .with_session_token(self.session_token.clone());
        if let Some(key) = &self.access_key_id {
            params = params.with_access_key(key.clone());
        }
        if let Some(secret) = &self.secret_access_key {
            params = params.with_secret_key(secret.clone());
        }
        params
    }
}

impl std::fmt::Debug for DlqSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |present: bool| if present { "[REDACTED]" } else { "None" };
        f.debug_struct("DlqSettings")
            .field("queue_url", &self.queue_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(self.secret_access_key.is_some()))
            .field("session_token", &redact(self.session_token.is_some()))
            .field("fallback_dir", &self.fallback_dir)
            .field("send_attempts", &self.send_attempts)
            .finish_non_exhaustive()
    }
}

/// Configuration for the pipeline and the reprocessor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Catalog base URL.
    pub catalog_base_url: String,
    /// Listing pages read per run.
    pub catalog_max_pages: u32,
    /// Processing service endpoint.
    pub processing_endpoint: String,
    /// Timeout for every outbound HTTP request.
    pub timeout: Duration,
    /// Retry policy for catalog and processing calls.
    pub retry: RetryConfig,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Dead-letter queue settings.
    pub dlq: DlqSettings,
    /// Reprocessor polling settings.
    pub reprocessor: ReprocessorConfig,
    /// OpenSearch base URL used to reindex replayed posts.
    pub opensearch_url: Option<String>,
    /// Database connection settings.
    pub database: DatabaseConfig,
}

impl PipelineConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CATALOG_BASE_URL`, `CATALOG_MAX_PAGES`
    /// - `PROCESSING_ENDPOINT`
    /// - `HTTP_TIMEOUT_SECS`
    /// - `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_DELAY_MS`, `RETRY_MAX_DELAY_MS`
    /// - `CIRCUIT_FAILURE_THRESHOLD`, `CIRCUIT_RESET_TIMEOUT_SECS`
    /// - `DLQ_QUEUE_URL`, `AWS_DEFAULT_REGION`, `AWS_ACCESS_KEY_ID`,
    ///   `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`, `DLQ_FALLBACK_DIR`
    /// - `DLQ_BATCH_SIZE`, `DLQ_WAIT_TIME_SECS`, `DLQ_IDLE_DELAY_SECS`
    /// - `OPENSEARCH_URL`
    /// - `DATABASE_URL` or `POSTGRES_*`
    ///
    /// Unparseable numbers fall back to their defaults.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
            .map(|config| Self {
                database: DatabaseConfig::from_env(),
                ..config
            })
    }

    /// Builds a configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut builder = PipelineConfigBuilder::new();

        if let Some(url) = lookup("CATALOG_BASE_URL") {
            builder = builder.catalog_base_url(url);
        }
        if let Some(pages) = number("CATALOG_MAX_PAGES") {
            builder = builder.catalog_max_pages(clamp_u32(pages));
        }
        if let Some(endpoint) = lookup("PROCESSING_ENDPOINT") {
            builder = builder.processing_endpoint(endpoint);
        }
        if let Some(secs) = number("HTTP_TIMEOUT_SECS") {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(attempts) = number("RETRY_MAX_ATTEMPTS") {
            builder = builder.max_attempts(clamp_u32(attempts));
        }
        if let Some(ms) = number("RETRY_INITIAL_DELAY_MS") {
            builder = builder.initial_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = number("RETRY_MAX_DELAY_MS") {
            builder = builder.max_delay(Duration::from_millis(ms));
        }
        if let Some(threshold) = number("CIRCUIT_FAILURE_THRESHOLD") {
            builder = builder.failure_threshold(threshold);
        }
        if let Some(secs) = number("CIRCUIT_RESET_TIMEOUT_SECS") {
            builder = builder.reset_timeout(Duration::from_secs(secs));
        }
        if let Some(url) = lookup("DLQ_QUEUE_URL").filter(|u| !u.is_empty()) {
            builder = builder.dlq_queue_url(url);
        }
        if let Some(region) = lookup("AWS_DEFAULT_REGION") {
            builder = builder.aws_region(region);
        }
        if let (Some(key), Some(secret)) = (
            lookup("AWS_ACCESS_KEY_ID"),
            lookup("AWS_SECRET_ACCESS_KEY"),
        ) {
            builder = builder.aws_credentials(key, secret, lookup("AWS_SESSION_TOKEN"));
        }
        if let Some(dir) = lookup("DLQ_FALLBACK_DIR") {
            builder = builder.fallback_dir(dir);
        }
        if let Some(size) = number("DLQ_BATCH_SIZE") {
            builder = builder.batch_size(clamp_u32(size));
        }
        if let Some(secs) = number("DLQ_WAIT_TIME_SECS") {
            builder = builder.wait_time(Duration::from_secs(secs));
        }
        if let Some(secs) = number("DLQ_IDLE_DELAY_SECS") {
            builder = builder.idle_delay(Duration::from_secs(secs));
        }
        if let Some(url) = lookup("OPENSEARCH_URL").filter(|u| !u.is_empty()) {
            builder = builder.opensearch_url(url);
        }

        builder.build()
    }

    /// Creates the shared HTTP transport.
    pub fn transport(&self) -> PipelineResult<Arc<dyn HttpTransport>> {
        let transport = ReqwestTransport::with_config(TransportConfig {
            timeout: self.timeout,
            ..TransportConfig::default()
        })?;
        Ok(Arc::new(transport))
    }

    /// Creates a circuit breaker over `store`.
    pub fn circuit_breaker(
        &self,
        store: Arc<dyn CircuitStateStore>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(self.circuit_breaker.clone(), store).with_metrics(metrics))
    }

    /// Creates a guard for `service` sharing `breaker`.
    pub fn guard(
        &self,
        service: &str,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> ResilienceGuard {
        ResilienceGuard::new(
            service,
            breaker,
            RetryExecutor::new(self.retry.clone()).with_metrics(metrics),
        )
    }

    /// Request timeout for queue calls.
    ///
    /// Always longer than the reprocessor's long-poll wait so an empty
    /// receive returns before the client gives up.
    pub fn queue_timeout(&self) -> Duration {
        let wait = self
            .reprocessor
            .wait_time
            .min(Duration::from_secs(MAX_WAIT_SECONDS));
        self.timeout.max(wait + RECEIVE_TIMEOUT_MARGIN)
    }

    /// Creates the SQS queue, if a queue URL is configured.
    ///
    /// The queue gets its own transport using [`queue_timeout`](Self::queue_timeout).
    pub fn durable_queue(&self) -> PipelineResult<Option<Arc<dyn DurableQueue>>> {
        let Some(queue_url) = &self.dlq.queue_url else {
            return Ok(None);
        };
        let transport = ReqwestTransport::with_config(TransportConfig {
            timeout: self.queue_timeout(),
            ..TransportConfig::default()
        })?;
        let queue = SqsQueue::new(
            Arc::new(transport),
            SqsConfig {
                queue_url: queue_url.clone(),
                signing: self.dlq.signing_params(),
                send_attempts: self.dlq.send_attempts,
                send_retry_delay: self.dlq.send_retry_delay,
            },
        )?;
        Ok(Some(Arc::new(queue)))
    }

    /// Creates the dead-letter sink writing to `queue` and the fallback directory.
    pub fn dead_letter_sink(
        &self,
        queue: Option<Arc<dyn DurableQueue>>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> DeadLetterSink {
        DeadLetterSink::new(queue, LocalFallbackStore::new(self.dlq.fallback_dir.clone()))
            .with_metrics(metrics)
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn validate_url(name: &str, value: &str) -> PipelineResult<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(PipelineError::Configuration {
            message: format!("{} must start with http:// or https://", name),
        });
    }
    url::Url::parse(value)?;
    Ok(())
}

/// Builder for [`PipelineConfig`].
#[derive(Default)]
pub struct PipelineConfigBuilder {
    catalog_base_url: Option<String>,
    catalog_max_pages: Option<u32>,
    processing_endpoint: Option<String>,
    timeout: Option<Duration>,
    retry: RetryConfig,
    circuit_breaker: CircuitBreakerConfig,
    dlq: DlqSettings,
    reprocessor: ReprocessorConfig,
    opensearch_url: Option<String>,
    database: Option<DatabaseConfig>,
}

impl PipelineConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the catalog base URL.
    pub fn catalog_base_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_base_url = Some(url.into());
        self
    }

    /// Sets how many listing pages a run reads.
    pub fn catalog_max_pages(mut self, pages: u32) -> Self {
        self.catalog_max_pages = Some(pages);
        self
    }

    /// Sets the processing endpoint.
    pub fn processing_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.processing_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the HTTP request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the total retry attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Sets the first retry delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.retry.initial_delay = delay;
        self
    }

    /// Sets the retry delay cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.retry.max_delay = delay;
        self
    }

    /// Sets the retry jitter bound.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.retry.jitter = jitter;
        self
    }

    /// Sets the circuit breaker failure threshold.
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.circuit_breaker.failure_threshold = threshold;
        self
    }

    /// Sets the circuit breaker reset timeout.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.circuit_breaker.reset_timeout = timeout;
        self
    }

    /// Sets the SQS queue URL.
    pub fn dlq_queue_url(mut self, url: impl Into<String>) -> Self {
        self.dlq.queue_url = Some(url.into());
        self
    }

    /// Sets the AWS region.
    pub fn aws_region(mut self, region: impl Into<String>) -> Self {
        self.dlq.region = region.into();
        self
    }

    /// Sets static AWS credentials.
    pub fn aws_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        self.dlq.access_key_id = Some(access_key_id.into());
        self.dlq.secret_access_key = Some(SecretString::new(secret_access_key.into()));
        self.dlq.session_token = session_token.map(SecretString::new);
        self
    }

    /// Sets the local fallback directory.
    pub fn fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dlq.fallback_dir = dir.into();
        self
    }

    /// Sets the reprocessor batch size.
    pub fn batch_size(mut self, size: u32) -> Self {
        self.reprocessor.batch_size = size;
        self
    }

    /// Sets the reprocessor long-poll wait.
    pub fn wait_time(mut self, wait: Duration) -> Self {
        self.reprocessor.wait_time = wait;
        self
    }

    /// Sets the reprocessor idle pause.
    pub fn idle_delay(mut self, delay: Duration) -> Self {
        self.reprocessor.idle_delay = delay;
        self
    }

    /// Sets the OpenSearch URL.
    pub fn opensearch_url(mut self, url: impl Into<String>) -> Self {
        self.opensearch_url = Some(url.into());
        self
    }

    /// Sets the database settings.
    pub fn database(mut self, database: DatabaseConfig) -> Self {
        self.database = Some(database);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> PipelineResult<PipelineConfig> {
        let catalog_base_url = self
            .catalog_base_url
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        validate_url("Catalog URL", &catalog_base_url)?;

        let processing_endpoint = self
            .processing_endpoint
            .unwrap_or_else(|| DEFAULT_PROCESSING_ENDPOINT.to_string());
        validate_url("Processing endpoint", &processing_endpoint)?;

        if let Some(queue_url) = &self.dlq.queue_url {
            validate_url("DLQ queue URL", queue_url)?;
        }
        if let Some(search_url) = &self.opensearch_url {
            validate_url("OpenSearch URL", search_url)?;
        }

        if self.retry.max_attempts < 1 {
            return Err(PipelineError::Configuration {
                message: "Retry attempts must be at least 1".to_string(),
            });
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(PipelineError::Configuration {
                message: "Initial retry delay cannot exceed the maximum delay".to_string(),
            });
        }
        if self.circuit_breaker.failure_threshold < 1 {
            return Err(PipelineError::Configuration {
                message: "Circuit failure threshold must be at least 1".to_string(),
            });
        }
        if self.dlq.send_attempts < 1 || self.reprocessor.batch_size < 1 {
            return Err(PipelineError::Configuration {
                message: "DLQ send attempts and batch size must be at least 1".to_string(),
            });
        }

        Ok(PipelineConfig {
            catalog_base_url,
            catalog_max_pages: self.catalog_max_pages.unwrap_or(1).max(1),
            processing_endpoint,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retry: self.retry,
            circuit_breaker: self.circuit_breaker,
            dlq: self.dlq,
            reprocessor: self.reprocessor,
            opensearch_url: self.opensearch_url,
            database: self.database.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = PipelineConfig::builder().build().unwrap();

        assert_eq!(config.catalog_base_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.processing_endpoint, DEFAULT_PROCESSING_ENDPOINT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.reprocessor.batch_size, 10);
        assert!(config.dlq.queue_url.is_none());
    }

    #[test]
    fn test_config_builder_invalid_urls() {
        assert!(PipelineConfig::builder().catalog_base_url("ftp://x").build().is_err());
        assert!(PipelineConfig::builder().processing_endpoint("localhost").build().is_err());
        assert!(PipelineConfig::builder().dlq_queue_url("sqs").build().is_err());
    }

    #[test]
    fn test_config_builder_rejects_zero_threshold_and_attempts() {
        assert!(PipelineConfig::builder().failure_threshold(0).build().is_err());
        assert!(PipelineConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("CATALOG_BASE_URL", "http://catalog.local/api/"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("RETRY_INITIAL_DELAY_MS", "250"),
            ("CIRCUIT_FAILURE_THRESHOLD", "2"),
            ("CIRCUIT_RESET_TIMEOUT_SECS", "30"),
            ("DLQ_QUEUE_URL", "http://localstack:4566/000000000000/dead-letter-queue"),
            ("AWS_ACCESS_KEY_ID", "test"),
            ("AWS_SECRET_ACCESS_KEY", "s3cret"),
            ("DLQ_IDLE_DELAY_SECS", "5"),
            ("HTTP_TIMEOUT_SECS", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.catalog_base_url, "http://catalog.local/api");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(30));
        assert_eq!(config.reprocessor.idle_delay, Duration::from_secs(5));
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);

        let params = config.dlq.signing_params();
        assert_eq!(params.access_key_id, "test");
        assert_eq!(params.secret_access_key.expose_secret(), "s3cret");
        assert_eq!(params.region, DEFAULT_REGION);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = PipelineConfig::builder()
            .aws_credentials("AKID", "very-secret", Some("token-value".to_string()))
            .build()
            .unwrap();

        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("very-secret"));
        assert!(!debug_str.contains("token-value"));
    }

    #[tokio::test]
    async fn test_durable_queue_only_with_url() {
        let config = PipelineConfig::builder().build().unwrap();
        assert!(config.durable_queue().unwrap().is_none());

        let config = PipelineConfig::builder()
            .dlq_queue_url("http://localhost:4566/000000000000/dlq")
            .build()
            .unwrap();
        assert!(config.durable_queue().unwrap().is_some());
    }

    #[test]
    fn test_queue_timeout_outlasts_long_poll() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("HTTP_TIMEOUT_SECS", "10"),
            ("DLQ_WAIT_TIME_SECS", "20"),
        ]))
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.queue_timeout(), Duration::from_secs(25));

        // Waits beyond the SQS maximum are capped before adding headroom.
        let config = PipelineConfig::builder()
            .wait_time(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(config.queue_timeout(), Duration::from_secs(25));

        let config = PipelineConfig::builder()
            .timeout(Duration::from_secs(60))
            .wait_time(Duration::from_secs(20))
            .build()
            .unwrap();
        assert_eq!(config.queue_timeout(), Duration::from_secs(60));
    }
}
