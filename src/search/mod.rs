//! Search index adapters.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{PipelineError, PipelineResult};
use crate::transport::{HttpTransport, Method};
use crate::types::Document;

/// Default index for replayed posts.
pub const DEFAULT_INDEX: &str = "posts";

/// Writes documents to a search index.
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Indexes `document` under `id`, replacing any previous version.
    async fn index(&self, id: &str, document: &Document) -> PipelineResult<()>;
}

/// OpenSearch document API client.
pub struct OpenSearchIndexer {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    index: String,
}

impl OpenSearchIndexer {
    /// Creates an indexer writing to the `posts` index at `base_url`.
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: DEFAULT_INDEX.to_string(),
        }
    }

    /// Sets the index name.
    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    /// Returns the index name.
    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn document_url(&self, id: &str) -> PipelineResult<String> {
        let mut url = url::Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|()| PipelineError::Configuration {
                message: format!("Search URL cannot be a base: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend([self.index.as_str(), "_doc", id]);
        Ok(url.to_string())
    }
}

#[async_trait]
impl SearchIndexer for OpenSearchIndexer {
    async fn index(&self, id: &str, document: &Document) -> PipelineResult<()> {
        let url = self.document_url(id)?;
        self.transport.send_json(Method::Put, &url, document).await?;
        debug!(index = %self.index, item_id = %id, "Indexed document");
        Ok(())
    }
}
