//! Ingestion run orchestration.
//!
//! A run lists the catalog, then for every item fetches its detail, builds
//! and persists a [`Post`], submits it for processing and does the same for
//! each of its children as [`Comment`]s. Failures are contained at the item
//! boundary and reported in [`PipelineRunStats`].

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::CatalogClient;
use crate::errors::{PipelineError, PipelineResult};
use crate::observability::{MetricsCollector, NoopMetricsCollector};
use crate::processing::ProcessingClient;
use crate::repository::ItemRepository;
use crate::types::{
    Comment, Document, Entity, ItemErrorStatus, ItemRef, ItemType, PipelineRunStats, Post,
};

/// Why an entity did not make it through persist and process.
struct StageFailure {
    status: ItemErrorStatus,
    reason: String,
}

impl StageFailure {
    fn new(status: ItemErrorStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    fn from_error(status: ItemErrorStatus, err: &PipelineError) -> Self {
        Self::new(status, format!("{}: {}", err.kind_name(), err))
    }
}

/// Drives one ingestion run over the catalog.
pub struct PipelineOrchestrator {
    catalog: Arc<dyn CatalogClient>,
    posts: Arc<dyn ItemRepository<Post>>,
    comments: Arc<dyn ItemRepository<Comment>>,
    processing: Arc<dyn ProcessingClient>,
    metrics: Arc<dyn MetricsCollector>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        posts: Arc<dyn ItemRepository<Post>>,
        comments: Arc<dyn ItemRepository<Comment>>,
        processing: Arc<dyn ProcessingClient>,
    ) -> Self {
        Self {
            catalog,
            posts,
            comments,
            processing,
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Sets the metrics collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runs the pipeline once.
    ///
    /// Only a failed catalog listing fails the run; every per-item failure
    /// is recorded in the returned statistics.
    #[instrument(skip(self))]
    pub async fn run(&self) -> PipelineResult<PipelineRunStats> {
        let items = self.catalog.list_items().await.map_err(|err| {
            warn!(kind = err.kind_name(), error = %err, "Catalog listing failed, aborting run");
            err
        })?;
        info!(count = items.len(), "Starting pipeline run");

        let mut stats = PipelineRunStats::new();
        for item in &items {
            self.process_item(item, &mut stats).await;
        }

        info!(
            posts_processed = stats.posts_processed,
            comments_processed = stats.comments_processed,
            post_errors = stats.post_errors.len(),
            comment_errors = stats.comment_errors.len(),
            "Pipeline run finished"
        );
        Ok(stats)
    }

    async fn process_item(&self, item: &ItemRef, stats: &mut PipelineRunStats) {
        let item_id = item.id.to_string();

        let detail = match self.catalog.get_item_detail(item.id).await {
            Ok(detail) => detail,
            Err(err) => {
                let failure = StageFailure::from_error(ItemErrorStatus::FetchFailed, &err);
                self.post_failed(stats, &item_id, failure);
                return;
            }
        };
        let post = match Post::from_detail(&detail) {
            Ok(post) => post,
            Err(err) => {
                let failure = StageFailure::from_error(ItemErrorStatus::Invalid, &err);
                self.post_failed(stats, &item_id, failure);
                return;
            }
        };

        match self.persist_and_process(self.posts.as_ref(), &post).await {
            Ok(()) => {
                stats.posts_processed += 1;
                self.metrics.record_item_processed(ItemType::Post);
            }
            Err(failure) => {
                let persisted = failure.status != ItemErrorStatus::PersistFailed;
                self.post_failed(stats, &item_id, failure);
                if !persisted {
                    return;
                }
            }
        }

        self.process_children(post.id, &detail, stats).await;
    }

    async fn process_children(
        &self,
        post_id: i64,
        detail: &Document,
        stats: &mut PipelineRunStats,
    ) {
        let children = match self.catalog.children_of(detail) {
            Ok(children) => children,
            Err(err) => {
                self.comment_failed(
                    stats,
                    &post_id.to_string(),
                    StageFailure::from_error(ItemErrorStatus::ChildrenFailed, &err),
                );
                return;
            }
        };

        for (index, child) in children.iter().enumerate() {
            let comment = match Comment::from_child(post_id, child) {
                Ok(comment) => comment,
                Err(err) => {
                    let child_id = child_label(post_id, index, child);
                    let failure = StageFailure::from_error(ItemErrorStatus::Invalid, &err);
                    self.comment_failed(stats, &child_id, failure);
                    continue;
                }
            };

            match self.persist_and_process(self.comments.as_ref(), &comment).await {
                Ok(()) => {
                    stats.comments_processed += 1;
                    self.metrics.record_item_processed(ItemType::Comment);
                }
                Err(failure) => self.comment_failed(stats, &comment.id, failure),
            }
        }
    }

    /// Saves an entity and, once stored, submits it for processing.
    ///
    /// An item that processing dead-lettered still counts as handled.
    async fn persist_and_process<T: Entity + 'static>(
        &self,
        repository: &dyn ItemRepository<T>,
        entity: &T,
    ) -> Result<(), StageFailure> {
        match repository.save(entity).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(StageFailure::new(
                    ItemErrorStatus::PersistFailed,
                    "repository refused the item",
                ))
            }
            Err(err) => {
                return Err(StageFailure::from_error(
                    ItemErrorStatus::PersistFailed,
                    &err,
                ))
            }
        }

        let document: Document = entity.to_document();
        self.processing
            .submit(entity.item_type(), &document)
            .await
            .map(|_| ())
            .map_err(|err| StageFailure::from_error(ItemErrorStatus::ProcessFailed, &err))
    }

    fn post_failed(&self, stats: &mut PipelineRunStats, item_id: &str, failure: StageFailure) {
        warn!(
            item_type = "post",
            item_id,
            status = ?failure.status,
            reason = %failure.reason,
            "Item failed"
        );
        self.metrics.record_item_error(ItemType::Post, failure.status);
        stats.post_error(item_id, failure.status, failure.reason);
    }

    fn comment_failed(&self, stats: &mut PipelineRunStats, item_id: &str, failure: StageFailure) {
        warn!(
            item_type = "comment",
            item_id,
            status = ?failure.status,
            reason = %failure.reason,
            "Item failed"
        );
        self.metrics.record_item_error(ItemType::Comment, failure.status);
        stats.comment_error(item_id, failure.status, failure.reason);
    }
}

fn child_label(post_id: i64, index: usize, child: &Document) -> String {
    child
        .id_string()
        .unwrap_or_else(|| format!("{}/{}", post_id, index))
}
