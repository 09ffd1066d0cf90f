//! Amazon SQS queue over the JSON protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::queue::{DurableQueue, ReceivedMessage};
use crate::errors::{PipelineError, PipelineResult};
use crate::resilience::{Clock, SystemClock};
use crate::signing::{sign_request, SigningParams};
use crate::transport::{HttpTransport, Method};

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
pub(crate) const MAX_WAIT_SECONDS: u64 = 20;
const MAX_BATCH: u32 = 10;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest<'a> {
    queue_url: &'a str,
    message_body: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageRequest<'a> {
    queue_url: &'a str,
    max_number_of_messages: u32,
    wait_time_seconds: u64,
    attribute_names: [&'static str; 1],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<SqsMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessage {
    receipt_handle: String,
    body: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageRequest<'a> {
    queue_url: &'a str,
    receipt_handle: &'a str,
}

/// Settings for [`SqsQueue`].
#[derive(Debug, Clone)]
pub struct SqsConfig {
    /// Full queue URL.
    pub queue_url: String,
    /// Signing region and credentials.
    pub signing: SigningParams,
    /// Attempts for a single send.
    pub send_attempts: u32,
    /// Pause between send attempts.
    pub send_retry_delay: Duration,
}

/// SQS-backed durable queue.
///
/// Requests are signed with SigV4 and sent to the queue URL's origin.
/// `send` retries a few times with a fixed short delay; receive and delete
/// do not retry.
pub struct SqsQueue {
    transport: Arc<dyn HttpTransport>,
    config: SqsConfig,
    endpoint: String,
    clock: Arc<dyn Clock>,
}

impl SqsQueue {
    /// Creates a queue client.
    pub fn new(transport: Arc<dyn HttpTransport>, config: SqsConfig) -> PipelineResult<Self> {
        let url = Url::parse(&config.queue_url)?;
        let host = url.host_str().ok_or_else(|| PipelineError::Configuration {
            message: format!("Queue URL has no host: {}", config.queue_url),
        })?;
        let endpoint = match url.port() {
            Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
            None => format!("{}://{}/", url.scheme(), host),
        };

        Ok(Self {
            transport,
            config,
            endpoint,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used for request timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the queue URL.
    pub fn queue_url(&self) -> &str {
        &self.config.queue_url
    }

    async fn call(&self, action: &str, body: Vec<u8>) -> PipelineResult<Vec<u8>> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), CONTENT_TYPE.to_string());
        headers.insert("x-amz-target".to_string(), format!("AmazonSQS.{}", action));

        sign_request(
            "POST",
            &self.endpoint,
            &mut headers,
            &body,
            &self.config.signing,
            &self.clock.now(),
        )?;
        // The transport derives Host from the URL; the signed value is identical.
        headers.remove("host");

        let response = self
            .transport
            .execute(Method::Post, self.endpoint.clone(), headers, Some(body))
            .await
            .map_err(|e| match e {
                config @ PipelineError::Configuration { .. } => config,
                other => PipelineError::Queue {
                    message: format!("SQS {} failed: {}", action, other),
                },
            })?;
        Ok(response.body)
    }

    async fn send_once(&self, body: &str) -> PipelineResult<()> {
        let request = serde_json::to_vec(&SendMessageRequest {
            queue_url: &self.config.queue_url,
            message_body: body,
        })?;
        self.call("SendMessage", request).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for SqsQueue {
    async fn send(&self, body: String) -> PipelineResult<()> {
        let attempts = self.config.send_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&body).await {
                Ok(()) => {
                    debug!(queue = %self.config.queue_url, attempt, "Sent message");
                    return Ok(());
                }
                Err(err) if attempt < attempts => {
                    warn!(queue = %self.config.queue_url, attempt, error = %err, "SQS send failed, retrying");
                    tokio::time::sleep(self.config.send_retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn receive(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> PipelineResult<Vec<ReceivedMessage>> {
        let request = serde_json::to_vec(&ReceiveMessageRequest {
            queue_url: &self.config.queue_url,
            max_number_of_messages: max_messages.clamp(1, MAX_BATCH),
            wait_time_seconds: wait_time.as_secs().min(MAX_WAIT_SECONDS),
            attribute_names: ["ApproximateReceiveCount"],
        })?;
        let body = self.call("ReceiveMessage", request).await?;

        let response: ReceiveMessageResponse = if body.is_empty() {
            ReceiveMessageResponse::default()
        } else {
            serde_json::from_slice(&body)?
        };

        Ok(response
            .messages
            .into_iter()
            .map(|m| ReceivedMessage {
                receive_count: m
                    .attributes
                    .get("ApproximateReceiveCount")
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(1),
                handle: m.receipt_handle,
                body: m.body,
            })
            .collect())
    }

    async fn delete(&self, handle: &str) -> PipelineResult<()> {
        let request = serde_json::to_vec(&DeleteMessageRequest {
            queue_url: &self.config.queue_url,
            receipt_handle: handle,
        })?;
        self.call("DeleteMessage", request).await?;
        Ok(())
    }
}
