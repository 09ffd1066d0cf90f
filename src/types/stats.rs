//! Per-run pipeline statistics.

use serde::{Deserialize, Serialize};

/// Stage at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorStatus {
    /// The item's detail could not be fetched.
    FetchFailed,
    /// The fetched payload failed validation.
    Invalid,
    /// The repository refused or failed to store the item.
    PersistFailed,
    /// Processing failed and the item could not be dead-lettered.
    ProcessFailed,
    /// The item's children could not be fetched.
    ChildrenFailed,
}

/// A single item failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Identifier of the failed item.
    pub item_id: String,
    /// Stage at which it failed.
    pub status: ItemErrorStatus,
    /// Human-readable reason.
    pub reason: String,
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRunStats {
    /// Posts persisted and handed to processing.
    pub posts_processed: u64,
    /// Comments persisted and handed to processing.
    pub comments_processed: u64,
    /// Post failures, in encounter order.
    pub post_errors: Vec<ItemError>,
    /// Comment failures, in encounter order.
    pub comment_errors: Vec<ItemError>,
}

impl PipelineRunStats {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a post failure.
    pub fn post_error(
        &mut self,
        item_id: impl Into<String>,
        status: ItemErrorStatus,
        reason: impl Into<String>,
    ) {
        self.post_errors.push(ItemError {
            item_id: item_id.into(),
            status,
            reason: reason.into(),
        });
    }

    /// Records a comment failure.
    pub fn comment_error(
        &mut self,
        item_id: impl Into<String>,
        status: ItemErrorStatus,
        reason: impl Into<String>,
    ) {
        self.comment_errors.push(ItemError {
            item_id: item_id.into(),
            status,
            reason: reason.into(),
        });
    }

    /// Total number of recorded failures.
    pub fn error_count(&self) -> usize {
        self.post_errors.len() + self.comment_errors.len()
    }

    /// True when the run recorded no failures.
    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}
