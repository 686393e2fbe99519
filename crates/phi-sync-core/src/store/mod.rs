//! Collaborator abstractions for the sync pipeline.
//!
//! The orchestrator never talks to a cloud API directly. It reaches object
//! storage, the document-analysis service and the key-value store through
//! the three traits below, so the same pipeline runs against AWS (see the
//! `phi-sync` crate) or against the in-memory doubles in [`memory`].
//!
//! Implementations must be `Send + Sync`; all calls are suspension points.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{AnalyzedDocument, FeatureType, Item};

/// Lets [`RecordStore::put_if_absent`] replace an existing item whose
/// numeric `attribute` is below `cutoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredBefore {
    pub attribute: String,
    pub cutoff: i64,
}

/// Object storage (S3 or equivalent).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Top-level "folder" prefixes of a bucket, each ending in `/`.
    async fn list_top_level_prefixes(&self, bucket: &str) -> Result<Vec<String>>;

    /// Keys of every object below `prefix`, in listing order.
    ///
    /// Folder-marker keys (ending in `/`) are not returned.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Full content of one object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Document text-extraction service (Textract or equivalent).
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Analyze an image object in place and return its per-page text.
    async fn analyze(
        &self,
        bucket: &str,
        key: &str,
        features: &[FeatureType],
    ) -> Result<AnalyzedDocument>;
}

/// Key-value table store (DynamoDB or equivalent).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Items whose partition key `key_name` equals `key_value`.
    async fn query_partition(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Item>>;

    /// Insert an item, replacing any item with the same full key.
    async fn put(&self, table: &str, item: Item) -> Result<()>;

    /// Insert an item only if no item with the same `key_name` value exists,
    /// or, with `expired`, if the existing item is older than its cutoff.
    ///
    /// Returns `false` when the key is taken by a live item.
    async fn put_if_absent(
        &self,
        table: &str,
        item: Item,
        key_name: &str,
        expired: Option<ExpiredBefore>,
    ) -> Result<bool>;

    /// Delete the item identified by `key`.
    async fn delete(&self, table: &str, key: Item) -> Result<()>;
}
