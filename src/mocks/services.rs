//! In-process doubles for the pipeline's service traits.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use crate::catalog::CatalogClient;
use crate::errors::{PipelineError, PipelineResult};
use crate::processing::ProcessingClient;
use crate::repository::ItemRepository;
use crate::types::{Document, Entity, ItemRef, ItemType, Value};

/// A valid berry detail document with two flavors.
pub fn sample_detail(id: i64) -> Document {
    let flavor = |name: &str, potency: i64| {
        Value::Document(
            Document::new()
                .with("potency", potency)
                .with("flavor", Document::new().with("name", name)),
        )
    };
    Document::new()
        .with("id", id)
        .with("name", format!("berry-{}", id))
        .with("growth_time", 3)
        .with("max_harvest", 5)
        .with("natural_gift_power", 60)
        .with("size", 20)
        .with("smoothness", 25)
        .with("soil_dryness", 15)
        .with("flavors", vec![flavor("spicy", 10), flavor("dry", 0)])
}

/// The children embedded in a [`sample_detail`] document.
pub fn sample_children(detail: &Document) -> Vec<Document> {
    detail
        .get("flavors")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_document)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn unavailable(what: &str) -> PipelineError {
    PipelineError::ServiceUnavailable {
        message: format!("{} unavailable", what),
        retry_after: None,
    }
}

/// Catalog serving configured details.
///
/// Children default to the detail's `flavors` entries.
#[derive(Debug, Default)]
pub struct MockCatalog {
    items: Vec<ItemRef>,
    details: HashMap<i64, Document>,
    failing_details: HashSet<i64>,
    failing_children: HashSet<i64>,
    failing_listing: bool,
    detail_calls: Mutex<Vec<i64>>,
    children_calls: Mutex<Vec<i64>>,
}

impl MockCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog of [`sample_detail`] items.
    pub fn with_sample_items(ids: impl IntoIterator<Item = i64>) -> Self {
        ids.into_iter()
            .fold(Self::new(), |catalog, id| catalog.with_item(id, sample_detail(id)))
    }

    /// Adds an item with the given detail document.
    #[must_use]
    pub fn with_item(mut self, id: i64, detail: Document) -> Self {
        self.items.push(ItemRef {
            id,
            name: format!("berry-{}", id),
            url: format!("mock://catalog/berry/{}/", id),
        });
        self.details.insert(id, detail);
        self
    }

    /// Makes detail fetches for `id` fail.
    #[must_use]
    pub fn with_failing_detail(mut self, id: i64) -> Self {
        self.failing_details.insert(id);
        self
    }

    /// Makes child extraction for `id` fail.
    #[must_use]
    pub fn with_failing_children(mut self, id: i64) -> Self {
        self.failing_children.insert(id);
        self
    }

    /// Makes the listing fail.
    #[must_use]
    pub fn with_failing_listing(mut self) -> Self {
        self.failing_listing = true;
        self
    }

    /// Ids whose detail was requested, in order.
    pub fn detail_calls(&self) -> Vec<i64> {
        self.detail_calls.lock().clone()
    }

    /// Ids whose children were extracted, in order.
    pub fn children_calls(&self) -> Vec<i64> {
        self.children_calls.lock().clone()
    }
}

#[async_trait]
impl CatalogClient for MockCatalog {
    async fn list_items(&self) -> PipelineResult<Vec<ItemRef>> {
        if self.failing_listing {
            return Err(unavailable("catalog"));
        }
        Ok(self.items.clone())
    }

    async fn get_item_detail(&self, id: i64) -> PipelineResult<Document> {
        self.detail_calls.lock().push(id);
        if self.failing_details.contains(&id) {
            return Err(unavailable("catalog"));
        }
        self.details
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("berry", id.to_string()))
    }

    fn children_of(&self, detail: &Document) -> PipelineResult<Vec<Document>> {
        let id = detail.require_i64("id")?;
        self.children_calls.lock().push(id);
        if self.failing_children.contains(&id) {
            return Err(PipelineError::invalid_field("flavors", "expected an array"));
        }
        Ok(sample_children(detail))
    }
}

/// What a [`MockProcessingClient`] does for one item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingBehavior {
    /// Accept the item.
    Accept,
    /// Pretend the item was dead-lettered (`submit` yields `None`).
    DeadLetter,
    /// Fail as if dead-letter storage were lost (`submit` errors).
    Lose,
}

/// Processing client recording every submission and replay.
#[derive(Debug, Default)]
pub struct MockProcessingClient {
    behaviors: HashMap<String, ProcessingBehavior>,
    failing_replays: HashSet<String>,
    submitted: Mutex<Vec<(ItemType, String)>>,
    replayed: Mutex<Vec<(ItemType, String)>>,
}

impl MockProcessingClient {
    /// Creates a client accepting everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the submit behavior for an item id.
    #[must_use]
    pub fn with_behavior(mut self, item_id: impl Into<String>, behavior: ProcessingBehavior) -> Self {
        self.behaviors.insert(item_id.into(), behavior);
        self
    }

    /// Makes replays of an item id fail.
    #[must_use]
    pub fn with_failing_replay(mut self, item_id: impl Into<String>) -> Self {
        self.failing_replays.insert(item_id.into());
        self
    }

    /// Submitted items as `(type, id)`.
    pub fn submitted(&self) -> Vec<(ItemType, String)> {
        self.submitted.lock().clone()
    }

    /// Replayed items as `(type, id)`.
    pub fn replayed(&self) -> Vec<(ItemType, String)> {
        self.replayed.lock().clone()
    }
}

fn item_id(document: &Document) -> String {
    document.id_string().unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl ProcessingClient for MockProcessingClient {
    async fn submit(
        &self,
        item_type: ItemType,
        document: &Document,
    ) -> PipelineResult<Option<Document>> {
        let id = item_id(document);
        self.submitted.lock().push((item_type, id.clone()));

        match self.behaviors.get(&id).copied().unwrap_or(ProcessingBehavior::Accept) {
            ProcessingBehavior::Accept => Ok(Some(Document::new().with("json", document.clone()))),
            ProcessingBehavior::DeadLetter => Ok(None),
            ProcessingBehavior::Lose => Err(PipelineError::DeadLetterStorage {
                message: format!("{} {} lost", item_type, id),
            }),
        }
    }

    async fn replay(&self, item_type: ItemType, document: &Document) -> PipelineResult<Document> {
        let id = item_id(document);
        self.replayed.lock().push((item_type, id.clone()));

        if self.failing_replays.contains(&id) {
            return Err(unavailable("processing"));
        }
        Ok(Document::new().with("json", document.clone()))
    }
}

/// Repository recording saves, with per-id refusals and failures.
pub struct RecordingRepository<T> {
    saved: Mutex<Vec<Document>>,
    refused: HashSet<String>,
    failing: HashSet<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Default for RecordingRepository<T> {
    fn default() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            refused: HashSet::new(),
            failing: HashSet::new(),
            _entity: PhantomData,
        }
    }
}

impl<T> RecordingRepository<T> {
    /// Creates a repository accepting everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses saves of `id` with `Ok(false)`.
    #[must_use]
    pub fn refusing(mut self, id: impl Into<String>) -> Self {
        self.refused.insert(id.into());
        self
    }

    /// Fails saves of `id` with an error.
    #[must_use]
    pub fn failing(mut self, id: impl Into<String>) -> Self {
        self.failing.insert(id.into());
        self
    }

    /// Documents saved so far.
    pub fn saved(&self) -> Vec<Document> {
        self.saved.lock().clone()
    }

    /// Ids saved so far.
    pub fn saved_ids(&self) -> Vec<String> {
        self.saved.lock().iter().filter_map(Document::id_string).collect()
    }
}

#[async_trait]
impl<T: Entity + 'static> ItemRepository<T> for RecordingRepository<T> {
    async fn save(&self, item: &T) -> PipelineResult<bool> {
        let id = item.id();
        if self.failing.contains(&id) {
            return Err(PipelineError::Repository {
                message: format!("write of {} failed", id),
            });
        }
        if self.refused.contains(&id) {
            return Ok(false);
        }
        self.saved.lock().push(item.to_document());
        Ok(true)
    }
}
