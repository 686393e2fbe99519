//! Error taxonomy for the sync pipeline.
//!
//! Only [`SyncError::StoreUnavailable`] and [`SyncError::Config`] abort a
//! run. The remaining kinds are contained at the object or record level
//! and surface through the [`RunReport`](crate::report::RunReport).

use thiserror::Error;

/// Errors raised while syncing a bucket.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Listing, tracker query or document write failed on a backing store.
    #[error("store unavailable during {operation}: {source:#}")]
    StoreUnavailable {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// The extraction service failed for one object.
    #[error("extraction failed for {key}: {source:#}")]
    ExtractionFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A wearable export could not be fetched or parsed.
    #[error("wearable import failed for {key}: {reason}")]
    ImportParseFailed { key: String, reason: String },

    /// A single wearable row could not be written.
    #[error("insert into {table} failed: {source:#}")]
    InsertFailed {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn store_unavailable(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::Config(_))
    }
}

/// Result type for pipeline operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        let e = SyncError::store_unavailable("list prefixes", anyhow::anyhow!("503"));
        assert!(e.is_fatal());
        assert!(SyncError::Config("bucket".into()).is_fatal());

        let e = SyncError::ImportParseFailed {
            key: "a/Steps_Count.csv".into(),
            reason: "bad row".into(),
        };
        assert!(!e.is_fatal());
    }

    #[test]
    fn display_includes_operation_and_cause() {
        let e = SyncError::store_unavailable("query EhrTable", anyhow::anyhow!("connection reset"));
        let msg = e.to_string();
        assert!(msg.contains("query EhrTable"));
        assert!(msg.contains("connection reset"));
    }
}
