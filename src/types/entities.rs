//! Catalog entities: posts and their comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::document::{Document, Value};
use crate::errors::{PipelineError, PipelineResult};

/// Kind of item flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// A top-level catalog record.
    Post,
    /// A sub-record belonging to a post.
    Comment,
}

impl ItemType {
    /// Returns the wire name of the item type.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Post => "post",
            ItemType::Comment => "comment",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(ItemType::Post),
            "comment" => Ok(ItemType::Comment),
            other => Err(PipelineError::invalid_field(
                "type",
                format!("unknown item type '{}'", other),
            )),
        }
    }
}

/// Reference to a catalog item returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    /// Numeric catalog id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Resource URL the reference was read from.
    pub url: String,
}

impl ItemRef {
    /// Builds a reference from a listing entry, taking the id from the last
    /// path segment of the resource URL (`.../berry/7/`).
    pub fn from_resource(name: impl Into<String>, url: impl Into<String>) -> PipelineResult<Self> {
        let url = url.into();
        let id = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse::<i64>().ok())
            .ok_or_else(|| {
                PipelineError::invalid_field("url", format!("no numeric id in '{}'", url))
            })?;

        Ok(Self {
            id,
            name: name.into(),
            url,
        })
    }
}

/// An entity the repositories know how to store.
pub trait Entity: Send + Sync {
    /// The item type this entity represents.
    fn item_type(&self) -> ItemType;

    /// Primary key rendered as a string.
    fn id(&self) -> String;

    /// Full document representation.
    fn to_document(&self) -> Document;
}

/// A top-level catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Catalog id.
    pub id: i64,
    /// Name.
    pub name: String,
    /// Growth time.
    pub growth_time: i64,
    /// Maximum harvest.
    pub max_harvest: i64,
    /// Natural gift power.
    pub natural_gift_power: i64,
    /// Size.
    pub size: i64,
    /// Smoothness.
    pub smoothness: i64,
    /// Soil dryness.
    pub soil_dryness: i64,
    /// The detail document this post was built from.
    pub raw_data: Document,
    /// When the entity was created locally.
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Builds a post from a catalog detail document.
    pub fn from_detail(detail: &Document) -> PipelineResult<Self> {
        Ok(Self {
            id: detail.require_i64("id")?,
            name: detail.require_str("name")?.to_string(),
            growth_time: detail.require_i64("growth_time")?,
            max_harvest: detail.require_i64("max_harvest")?,
            natural_gift_power: detail.require_i64("natural_gift_power")?,
            size: detail.require_i64("size")?,
            smoothness: detail.require_i64("smoothness")?,
            soil_dryness: detail.require_i64("soil_dryness")?,
            raw_data: detail.clone(),
            created_at: Utc::now(),
        })
    }
}

impl Entity for Post {
    fn item_type(&self) -> ItemType {
        ItemType::Post
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn to_document(&self) -> Document {
        Document::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("growth_time", self.growth_time)
            .with("max_harvest", self.max_harvest)
            .with("natural_gift_power", self.natural_gift_power)
            .with("size", self.size)
            .with("smoothness", self.smoothness)
            .with("soil_dryness", self.soil_dryness)
            .with("raw_data", self.raw_data.clone())
            .with("created_at", self.created_at.to_rfc3339())
    }
}

/// A sub-record attached to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Locally generated id.
    pub id: String,
    /// Owning post id.
    pub post_id: i64,
    /// Flavor name.
    pub flavor: String,
    /// Potency.
    pub potency: i64,
    /// The child document this comment was built from.
    pub raw_data: Document,
    /// When the entity was created locally.
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Builds a comment from a child document of `{potency, flavor: {name}}`.
    pub fn from_child(post_id: i64, child: &Document) -> PipelineResult<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            post_id,
            flavor: child.require_document("flavor")?.require_str("name")?.to_string(),
            potency: child.require_i64("potency")?,
            raw_data: child.clone(),
            created_at: Utc::now(),
        })
    }
}

impl Entity for Comment {
    fn item_type(&self) -> ItemType {
        ItemType::Comment
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn to_document(&self) -> Document {
        Document::new()
            .with("id", self.id.as_str())
            .with("post_id", self.post_id)
            .with("flavor", self.flavor.as_str())
            .with("potency", self.potency)
            .with("raw_data", Value::Document(self.raw_data.clone()))
            .with("created_at", self.created_at.to_rfc3339())
    }
}
