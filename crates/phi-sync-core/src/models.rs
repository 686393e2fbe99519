//! Core data models that flow through the sync pipeline.
//!
//! Persisted records are converted to [`Item`]s, the schemaless attribute
//! map every [`RecordStore`](crate::store::RecordStore) accepts. String
//! values map to the store's string type and numbers to its number type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute map written to and read from a key-value table.
pub type Item = Map<String, Value>;

/// Partition key of the document table.
pub const FILE_NAME_KEY: &str = "fileName";
/// Sort key of the document table.
pub const INSERTION_TIME_KEY: &str = "insertionTime";

/// Reference to one object in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `s3://bucket/key` style locator, used in logs.
    pub fn locator(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// A logical document: every object below one top-level prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Group identifier, the prefix without its trailing `/`.
    pub id: String,
    /// Listing prefix including the trailing `/`.
    pub prefix: String,
}

impl Group {
    /// Build a group from a listed prefix such as `"patient123/"`.
    ///
    /// Returns `None` for an empty prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        let id = prefix.trim_end_matches('/');
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            prefix: format!("{}/", id),
        })
    }
}

/// Feature sets requested from the extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    Tables,
    Forms,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Tables => "TABLES",
            FeatureType::Forms => "FORMS",
        }
    }
}

/// Features requested for every image document.
pub const DOCUMENT_FEATURES: [FeatureType; 2] = [FeatureType::Tables, FeatureType::Forms];

/// Plain text recognized on one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number.
    pub page: u32,
    pub text: String,
}

/// Structured response of the extraction service for one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedDocument {
    pub page_count: u32,
    pub pages: Vec<PageText>,
}

/// Record persisted once per group in the document table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocumentRecord {
    /// Partition key: the group id.
    pub file_name: String,
    /// Sort key: milliseconds since the Unix epoch at insertion.
    pub insertion_time: i64,
    /// Cleaned text of every page in the group. Never empty when written.
    pub text: String,
}

impl ExtractedDocumentRecord {
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(FILE_NAME_KEY.into(), Value::from(self.file_name.clone()));
        item.insert(INSERTION_TIME_KEY.into(), Value::from(self.insertion_time));
        item.insert("text".into(), Value::from(self.text.clone()));
        item
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        serde_json::from_value(Value::Object(item.clone())).ok()
    }
}

/// One sample parsed from a wearable CSV export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WearableRecord {
    #[serde(rename = "startDate")]
    pub start_date: String,
    #[serde(rename = "endDate")]
    pub end_date: String,
    pub value: String,
}

/// Row persisted in a metric table, derived from a [`WearableRecord`].
///
/// `end_date` holds the *time* component of the source `endDate`; its date
/// component is dropped. Downstream readers rely on this layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WearableRow {
    #[serde(rename = "startDate")]
    pub start_date: String,
    #[serde(rename = "endDate")]
    pub end_date: String,
    pub value: String,
}

impl WearableRow {
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert("startDate".into(), Value::from(self.start_date.clone()));
        item.insert("endDate".into(), Value::from(self.end_date.clone()));
        item.insert("value".into(), Value::from(self.value.clone()));
        item
    }
}
