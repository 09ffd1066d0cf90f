//! Error types for the catalog pipeline.
//!
//! Every failure mode of the pipeline maps onto one [`PipelineError`] variant,
//! and every variant belongs to exactly one [`ErrorKind`]. The kind decides
//! whether a failure is retried, dead-lettered, or reported as a failed run.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Broad classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network timeouts, connection resets, 429 and 5xx responses. Retryable.
    Transient,
    /// The dependency is marked unhealthy by the circuit breaker.
    CircuitOpen,
    /// Malformed payloads, missing fields, 4xx responses. Never retried.
    Permanent,
    /// The dead-letter queue and its local fallback both failed.
    Storage,
    /// A shared store (breaker state, durable queue) is unreachable.
    Infrastructure,
    /// Invalid configuration.
    Configuration,
}

impl ErrorKind {
    /// Returns the stable name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Storage => "storage",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comprehensive error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error (invalid URL, missing queue, bad threshold).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// Request timeout.
    #[error("Request timeout: {message}")]
    Timeout {
        /// Error message.
        message: String,
    },

    /// Network/connection error.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Error message.
        message: String,
        /// Duration to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// Internal server error.
    #[error("Internal server error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Request ID for debugging.
        request_id: Option<String>,
    },

    /// Bad gateway error.
    #[error("Bad gateway: {message}")]
    BadGateway {
        /// Error message.
        message: String,
    },

    /// Service unavailable.
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Error message.
        message: String,
        /// Duration to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// Gateway timeout.
    #[error("Gateway timeout: {message}")]
    GatewayTimeout {
        /// Error message.
        message: String,
    },

    /// Circuit breaker open for a named service.
    #[error("Service {service} unavailable (circuit open)")]
    CircuitOpen {
        /// The guarded service.
        service: String,
    },

    /// Bad request (rejected by the remote service).
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message describing the rejection.
        message: String,
    },

    /// Resource not found.
    #[error("Not found: {message}")]
    NotFound {
        /// Error message.
        message: String,
        /// The type of resource that was not found.
        resource: Option<String>,
    },

    /// Validation error (payload failed boundary validation).
    #[error("Validation error: {message}")]
    Validation {
        /// Error message describing the validation issue.
        message: String,
        /// Field-level errors.
        errors: Vec<FieldError>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// Unexpected repository failure.
    #[error("Repository error: {message}")]
    Repository {
        /// Error message.
        message: String,
    },

    /// Circuit breaker state store unreachable.
    #[error("Circuit state store error: {message}")]
    StateStore {
        /// Error message.
        message: String,
    },

    /// Durable queue unreachable or rejected the request.
    #[error("Queue error: {message}")]
    Queue {
        /// Error message.
        message: String,
    },

    /// Both the durable queue and the local fallback failed.
    #[error("Dead-letter storage failed: {message}")]
    DeadLetterStorage {
        /// Error message.
        message: String,
    },

    /// Unknown error.
    #[error("Unknown error (HTTP {status}): {message}")]
    Unknown {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Raw response body.
        body: Option<String>,
    },
}

/// Field-level validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// The field that failed validation.
    pub field: String,
    /// The validation error message.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl PipelineError {
    /// Returns the kind this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Timeout { .. }
            | PipelineError::Connection { .. }
            | PipelineError::RateLimit { .. }
            | PipelineError::Internal { .. }
            | PipelineError::BadGateway { .. }
            | PipelineError::ServiceUnavailable { .. }
            | PipelineError::GatewayTimeout { .. } => ErrorKind::Transient,
            PipelineError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            PipelineError::BadRequest { .. }
            | PipelineError::NotFound { .. }
            | PipelineError::Validation { .. }
            | PipelineError::Serialization { .. }
            | PipelineError::Repository { .. }
            | PipelineError::Unknown { .. } => ErrorKind::Permanent,
            PipelineError::DeadLetterStorage { .. } => ErrorKind::Storage,
            PipelineError::StateStore { .. } | PipelineError::Queue { .. } => {
                ErrorKind::Infrastructure
            }
            PipelineError::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Returns the name of the error kind, for operator-facing reports.
    pub fn kind_name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::RateLimit { retry_after, .. }
            | PipelineError::ServiceUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Creates a validation error from field errors.
    pub fn validation(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
        PipelineError::Validation {
            message: message.into(),
            errors,
        }
    }

    /// Creates a validation error for a single missing or malformed field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let error = FieldError::new(field, message);
        PipelineError::Validation {
            message: format!("field '{}': {}", error.field, error.message),
            errors: vec![error],
        }
    }

    /// Creates a not found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        let resource = resource.into();
        let id = id.into();
        PipelineError::NotFound {
            message: format!("{} '{}' not found", resource, id),
            resource: Some(resource),
        }
    }

    /// Maps an HTTP status code and message to an error.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            400 => PipelineError::BadRequest { message },
            404 => PipelineError::NotFound {
                message,
                resource: None,
            },
            408 => PipelineError::Timeout { message },
            422 => PipelineError::Validation {
                message,
                errors: Vec::new(),
            },
            429 => PipelineError::RateLimit {
                message,
                retry_after,
            },
            500 => PipelineError::Internal {
                message,
                request_id: None,
            },
            502 => PipelineError::BadGateway { message },
            503 => PipelineError::ServiceUnavailable {
                message,
                retry_after,
            },
            504 => PipelineError::GatewayTimeout { message },
            _ => PipelineError::Unknown {
                status,
                message,
                body: None,
            },
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_connect() || err.is_request() {
            PipelineError::Connection {
                message: err.to_string(),
            }
        } else if err.is_decode() {
            PipelineError::Serialization {
                message: err.to_string(),
            }
        } else {
            PipelineError::Unknown {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
                body: None,
            }
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for PipelineError {
    fn from(err: url::ParseError) -> Self {
        PipelineError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}

impl From<tokio_postgres::Error> for PipelineError {
    fn from(err: tokio_postgres::Error) -> Self {
        PipelineError::Repository {
            message: err.to_string(),
        }
    }
}

impl From<deadpool_postgres::PoolError> for PipelineError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        PipelineError::Repository {
            message: format!("Pool error: {}", err),
        }
    }
}
