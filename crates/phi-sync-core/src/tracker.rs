//! Processed-set tracker.
//!
//! A group counts as processed once the document table holds at least one
//! record under its `fileName`. The check and the final write are not
//! atomic; when a claims table is configured, [`ProcessedSetTracker::try_claim`]
//! narrows that window for concurrent runs.
//!
//! Claims are leases. A claim whose `claimedAt` is older than the claim TTL
//! can be taken over, so a run killed before releasing does not block its
//! group forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::models::{Item, FILE_NAME_KEY};
use crate::store::{ExpiredBefore, RecordStore};

/// Attribute holding the claim time, epoch milliseconds.
pub const CLAIMED_AT_KEY: &str = "claimedAt";

/// Default lease length of a group claim.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(15 * 60);

/// Answers "was this group already ingested?" against the document table.
#[derive(Clone)]
pub struct ProcessedSetTracker {
    records: Arc<dyn RecordStore>,
    document_table: String,
    claims_table: Option<String>,
    claim_ttl: Duration,
    owner: String,
}

/// A held claim on one group. Release it with [`ProcessedSetTracker::release`].
#[derive(Debug)]
pub struct GroupClaim {
    group_id: String,
}

impl ProcessedSetTracker {
    pub fn new(records: Arc<dyn RecordStore>, document_table: impl Into<String>) -> Self {
        Self {
            records,
            document_table: document_table.into(),
            claims_table: None,
            claim_ttl: DEFAULT_CLAIM_TTL,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Enable per-group claims stored in `table` (partition key `fileName`).
    pub fn with_claims_table(mut self, table: impl Into<String>) -> Self {
        self.claims_table = Some(table.into());
        self
    }

    /// Age after which another run may take over a claim.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn claims_enabled(&self) -> bool {
        self.claims_table.is_some()
    }

    /// Whether at least one record exists for `group_id`.
    ///
    /// # Errors
    ///
    /// [`SyncError::StoreUnavailable`] if the query fails.
    pub async fn is_processed(&self, group_id: &str) -> SyncResult<bool> {
        let rows = self
            .records
            .query_partition(&self.document_table, FILE_NAME_KEY, group_id, Some(1))
            .await
            .map_err(|e| {
                SyncError::store_unavailable(format!("query {}", self.document_table), e)
            })?;
        Ok(!rows.is_empty())
    }

    /// Try to take the claim for `group_id`.
    ///
    /// Returns `Ok(None)` when another run holds a claim younger than the
    /// TTL. Without a claims table every claim succeeds immediately.
    pub async fn try_claim(&self, group_id: &str) -> SyncResult<Option<GroupClaim>> {
        let Some(table) = &self.claims_table else {
            return Ok(Some(GroupClaim {
                group_id: group_id.to_string(),
            }));
        };
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(self.claim_ttl.as_millis()).unwrap_or(i64::MAX);
        let mut item = claim_key(group_id);
        item.insert("owner".into(), Value::from(self.owner.clone()));
        item.insert(CLAIMED_AT_KEY.into(), Value::from(now));
        let expired = ExpiredBefore {
            attribute: CLAIMED_AT_KEY.to_string(),
            cutoff: now.saturating_sub(ttl_ms),
        };

        let acquired = self
            .records
            .put_if_absent(table, item, FILE_NAME_KEY, Some(expired))
            .await
            .map_err(|e| SyncError::store_unavailable(format!("claim in {}", table), e))?;
        Ok(acquired.then(|| GroupClaim {
            group_id: group_id.to_string(),
        }))
    }

    /// Release a claim taken by [`try_claim`](Self::try_claim).
    pub async fn release(&self, claim: GroupClaim) -> SyncResult<()> {
        let Some(table) = &self.claims_table else {
            return Ok(());
        };
        self.records
            .delete(table, claim_key(&claim.group_id))
            .await
            .map_err(|e| SyncError::store_unavailable(format!("release claim in {}", table), e))
    }
}

fn claim_key(group_id: &str) -> Item {
    let mut item = Item::new();
    item.insert(FILE_NAME_KEY.into(), Value::from(group_id));
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedDocumentRecord;
    use crate::store::memory::InMemoryRecordStore;

    async fn seeded() -> Arc<InMemoryRecordStore> {
        let store = Arc::new(InMemoryRecordStore::new());
        let record = ExtractedDocumentRecord {
            file_name: "patient123".into(),
            insertion_time: 1,
            text: "x".into(),
        };
        store.put("EhrTable", record.to_item()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn existing_group_is_processed() {
        let tracker = ProcessedSetTracker::new(seeded().await, "EhrTable");
        assert!(tracker.is_processed("patient123").await.unwrap());
        assert!(!tracker.is_processed("patient456").await.unwrap());
    }

    #[tokio::test]
    async fn query_failure_is_store_unavailable() {
        let store = seeded().await;
        store.set_unavailable(true);
        let tracker = ProcessedSetTracker::new(store, "EhrTable");
        let err = tracker.is_processed("patient123").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn claims_are_exclusive_until_released() {
        let store = Arc::new(InMemoryRecordStore::new());
        let a = ProcessedSetTracker::new(store.clone(), "EhrTable").with_claims_table("Claims");
        let b = ProcessedSetTracker::new(store.clone(), "EhrTable").with_claims_table("Claims");

        let claim = a.try_claim("g1").await.unwrap().expect("first claim");
        assert!(b.try_claim("g1").await.unwrap().is_none());
        a.release(claim).await.unwrap();
        assert!(b.try_claim("g1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_claim_is_taken_over() {
        let store = Arc::new(InMemoryRecordStore::new());
        let mut dead = claim_key("g1");
        dead.insert("owner".into(), Value::from("dead-run"));
        dead.insert(CLAIMED_AT_KEY.into(), Value::from(0));
        store.put("Claims", dead).await.unwrap();

        let tracker = ProcessedSetTracker::new(store.clone(), "EhrTable")
            .with_claims_table("Claims")
            .with_claim_ttl(Duration::from_secs(60));
        assert!(tracker.try_claim("g1").await.unwrap().is_some());

        let claims = store.items("Claims");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0]["owner"], Value::from(tracker.owner.clone()));
    }

    #[tokio::test]
    async fn fresh_claim_is_not_taken_over() {
        let store = Arc::new(InMemoryRecordStore::new());
        let a = ProcessedSetTracker::new(store.clone(), "EhrTable")
            .with_claims_table("Claims")
            .with_claim_ttl(Duration::from_secs(3600));
        let b = ProcessedSetTracker::new(store.clone(), "EhrTable")
            .with_claims_table("Claims")
            .with_claim_ttl(Duration::from_secs(3600));
        let _held = a.try_claim("g1").await.unwrap().expect("first claim");
        assert!(b.try_claim("g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_disabled_always_succeed() {
        let store = Arc::new(InMemoryRecordStore::new());
        let tracker = ProcessedSetTracker::new(store.clone(), "EhrTable");
        assert!(!tracker.claims_enabled());
        let first = tracker.try_claim("g1").await.unwrap();
        assert!(first.is_some());
        assert!(tracker.try_claim("g1").await.unwrap().is_some());
        assert!(store.is_empty("Claims"));
    }
}
