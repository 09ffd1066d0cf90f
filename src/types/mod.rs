//! Type definitions for the catalog pipeline.

pub mod dlq;
pub mod document;
pub mod entities;
pub mod stats;

pub use dlq::DlqMessage;
pub use document::{Document, Value};
pub use entities::{Comment, Entity, ItemRef, ItemType, Post};
pub use stats::{ItemError, ItemErrorStatus, PipelineRunStats};
