//! Entity repositories.
//!
//! `save` distinguishes expected persistence failures (`Ok(false)`, e.g. a
//! rejected write) from unexpected ones (`Err`). The pipeline treats both as
//! a failed item.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::errors::PipelineResult;
use crate::types::{Document, Entity};

/// Storage for one entity type.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemRepository<T: Entity + 'static>: Send + Sync {
    /// Upserts `item`, returning whether it was stored.
    async fn save(&self, item: &T) -> PipelineResult<bool>;
}

/// Process-local repository keeping the latest document per id.
#[derive(Default)]
pub struct InMemoryRepository {
    documents: RwLock<BTreeMap<String, Document>>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored document for `id`.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents.read().get(id).cloned()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Stored ids in order.
    pub fn ids(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }
}

#[async_trait]
impl<T: Entity + 'static> ItemRepository<T> for InMemoryRepository {
    async fn save(&self, item: &T) -> PipelineResult<bool> {
        self.documents.write().insert(item.id(), item.to_document());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Post;
    use serde_json::json;

    fn post(id: i64) -> Post {
        Post::from_detail(
            &Document::from_json(json!({
                "id": id,
                "name": "cheri",
                "growth_time": 3,
                "max_harvest": 5,
                "natural_gift_power": 60,
                "size": 20,
                "smoothness": 25,
                "soil_dryness": 15
            }))
            .unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_upserts_by_id() {
        let repo = InMemoryRepository::new();
        assert!(repo.save(&post(1)).await.unwrap());
        assert!(repo.save(&post(1)).await.unwrap());
        assert!(repo.save(&post(2)).await.unwrap());

        assert_eq!(repo.len(), 2);
        assert_eq!(repo.ids(), vec!["1".to_string(), "2".to_string()]);
        assert_eq!(repo.get("1").unwrap().require_i64("id").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mock_repository_refusal() {
        let mut repo = MockItemRepository::<Post>::new();
        repo.expect_save().times(1).returning(|_| Ok(false));

        assert!(!repo.save(&post(3)).await.unwrap());
    }
}
