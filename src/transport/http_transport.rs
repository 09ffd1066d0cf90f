//! HTTP transport implementation using reqwest.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{map_http_error, HttpResponse, Method};
use crate::errors::{PipelineError, PipelineResult};
use crate::types::Document;

/// HTTP transport used by every outbound adapter.
///
/// Responses with a status of 400 or above are returned as errors, mapped
/// through [`PipelineError::from_status`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Executes an HTTP request.
    async fn execute(
        &self,
        method: Method,
        url: String,
        headers: HashMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> PipelineResult<HttpResponse>;

    /// Convenience method for GET requests expecting JSON.
    async fn get(&self, url: &str) -> PipelineResult<HttpResponse> {
        let mut headers = HashMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        self.execute(Method::Get, url.to_string(), headers, None)
            .await
    }

    /// Sends a document as a JSON body.
    async fn send_json(
        &self,
        method: Method,
        url: &str,
        document: &Document,
    ) -> PipelineResult<HttpResponse> {
        let body = serde_json::to_vec(document)?;
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        self.execute(method, url.to_string(), headers, Some(body))
            .await
    }
}

/// Configuration for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout applied to every request.
    pub timeout: Duration,
    /// Value of the `user-agent` header.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("catalog-pipeline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Reqwest-based HTTP transport implementation.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a new reqwest transport.
    pub fn new(timeout: Duration) -> PipelineResult<Self> {
        Self::with_config(TransportConfig {
            timeout,
            ..Default::default()
        })
    }

    /// Creates a new transport with configuration.
    pub fn with_config(config: TransportConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| PipelineError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    /// Creates a new transport with a custom client.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Converts response headers to a HashMap.
    fn extract_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_lowercase(), val.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        method: Method,
        url: String,
        headers: HashMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> PipelineResult<HttpResponse> {
        debug!(method = method.as_str(), url = %url, "Outgoing request");
        let mut request = self.client.request(method.into(), &url);

        for (key, value) in &headers {
            request = request.header(key, value);
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let response_headers = Self::extract_headers(response.headers());
        let body = response.bytes().await?.to_vec();
        debug!(method = method.as_str(), url = %url, status, "Response received");

        if status >= 400 {
            return Err(map_http_error(status, &body, &response_headers));
        }

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

/// Creates a shared transport instance.
pub fn create_transport(timeout: Duration) -> PipelineResult<Arc<dyn HttpTransport>> {
    Ok(Arc::new(ReqwestTransport::new(timeout)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_transport_creation() {
        let transport = ReqwestTransport::new(Duration::from_secs(30));
        assert!(transport.is_ok());
        assert_eq!(transport.unwrap().timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/berry/1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .get(&format!("{}/berry/1/", server.uri()))
            .await
            .unwrap();

        let doc: Document = response.json().unwrap();
        assert_eq!(doc.get("id"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_send_json_posts_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/post"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"name": "cheri"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let doc = Document::new().with("name", "cheri");
        let response = transport
            .send_json(Method::Post, &format!("{}/post", server.uri()), &doc)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_error_status_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport.get(&server.uri()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }
}
