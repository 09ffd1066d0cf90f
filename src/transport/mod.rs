//! HTTP transport module.
//!
//! The catalog, processing, search and SQS adapters all talk HTTP through
//! the [`HttpTransport`] trait so tests can swap in a mock.

mod http_transport;

pub use http_transport::{create_transport, HttpTransport, ReqwestTransport, TransportConfig};

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::{PipelineError, PipelineResult};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl Method {
    /// Returns the uppercase method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| PipelineError::Serialization {
            message: format!(
                "{} (body: {})",
                e,
                truncate(&String::from_utf8_lossy(&self.body), 256)
            ),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Extracts the retry-after duration from response headers.
pub(crate) fn extract_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps an error response to a [`PipelineError`].
pub(crate) fn map_http_error(
    status: u16,
    body: &[u8],
    headers: &HashMap<String, String>,
) -> PipelineError {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error").and_then(|e| e.get("message").or(Some(e))))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {} error", status));

    match PipelineError::from_status(status, message, extract_retry_after(headers)) {
        PipelineError::Internal { message, .. } => PipelineError::Internal {
            message,
            request_id: headers.get("x-request-id").cloned(),
        },
        PipelineError::Unknown { status, message, .. } => PipelineError::Unknown {
            status,
            message,
            body: Some(truncate(&String::from_utf8_lossy(body), 1024).to_string()),
        },
        other => other,
    }
}
