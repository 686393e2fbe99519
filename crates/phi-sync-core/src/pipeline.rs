//! Ingestion orchestrator.
//!
//! One pass over a bucket:
//!
//! ```text
//! list prefixes ─▶ for each group:
//!                    processed? ──yes──▶ skip
//!                      │no
//!                    claim (optional) ─▶ list members ─▶ route each
//!                      image    ─▶ extract pages ─▶ append to group text
//!                      wearable ─▶ import CSV ─▶ insert rows into metric table
//!                      other    ─▶ ignore
//!                    text non-empty? ─▶ put document record
//! ```
//!
//! Store failures (listing, tracker query, document write) abort the run.
//! Extraction, import and row-insert failures are contained, logged and
//! reported. Groups already written stay valid when a run stops early.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::clean::push_page;
use crate::error::{SyncError, SyncResult};
use crate::extract::DocumentTextExtractor;
use crate::models::{ExtractedDocumentRecord, Group, ObjectRef};
use crate::report::{GroupOutcome, GroupReport, ObjectFailure, RoutedObject, RunReport};
use crate::route::{classify, MetricKind, ObjectKind};
use crate::store::{DocumentAnalyzer, ObjectStore, RecordStore};
use crate::tracker::{ProcessedSetTracker, DEFAULT_CLAIM_TTL};
use crate::wearable::{WearableImporter, WearableInserter};

/// Everything the orchestrator needs to know about its environment.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub bucket: String,
    pub document_table: String,
    /// Destination table per wearable metric.
    pub metric_tables: BTreeMap<MetricKind, String>,
    /// Claims table; `None` disables group claims.
    pub claims_table: Option<String>,
    /// Age after which a claim left by another run may be taken over.
    pub claim_ttl: Duration,
    /// Groups processed concurrently. `1` is strictly sequential.
    pub max_concurrent_groups: usize,
    /// Process at most this many groups, in listing order.
    pub limit: Option<usize>,
    /// Route and check only; no extraction, import or writes.
    pub dry_run: bool,
}

impl SyncSettings {
    /// Settings with every metric writing to the table named after its marker.
    pub fn new(bucket: impl Into<String>, document_table: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            document_table: document_table.into(),
            metric_tables: MetricKind::ALL
                .into_iter()
                .map(|m| (m, m.marker().to_string()))
                .collect(),
            claims_table: None,
            claim_ttl: DEFAULT_CLAIM_TTL,
            max_concurrent_groups: 1,
            limit: None,
            dry_run: false,
        }
    }

    pub fn table_for(&self, metric: MetricKind) -> &str {
        self.metric_tables
            .get(&metric)
            .map(String::as_str)
            .unwrap_or_else(|| metric.marker())
    }
}

/// Drives one sync pass over a bucket.
pub struct Orchestrator {
    settings: SyncSettings,
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    extractor: DocumentTextExtractor,
    importer: WearableImporter,
    inserter: WearableInserter,
    tracker: ProcessedSetTracker,
}

impl Orchestrator {
    pub fn new(
        settings: SyncSettings,
        objects: Arc<dyn ObjectStore>,
        analyzer: Arc<dyn DocumentAnalyzer>,
        records: Arc<dyn RecordStore>,
    ) -> SyncResult<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(SyncError::Config("bucket name is empty".into()));
        }
        if settings.document_table.trim().is_empty() {
            return Err(SyncError::Config("document table name is empty".into()));
        }

        let mut tracker = ProcessedSetTracker::new(records.clone(), settings.document_table.clone());
        if let Some(ref claims) = settings.claims_table {
            tracker = tracker
                .with_claims_table(claims.clone())
                .with_claim_ttl(settings.claim_ttl);
        }

        Ok(Self {
            extractor: DocumentTextExtractor::new(analyzer),
            importer: WearableImporter::new(objects.clone()),
            inserter: WearableInserter::new(records.clone()),
            tracker,
            settings,
            objects,
            records,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &ProcessedSetTracker {
        &self.tracker
    }

    /// List the groups of the configured bucket, honoring `limit`.
    ///
    /// # Errors
    ///
    /// [`SyncError::StoreUnavailable`] if the listing fails.
    pub async fn list_groups(&self) -> SyncResult<Vec<Group>> {
        let prefixes = self
            .objects
            .list_top_level_prefixes(&self.settings.bucket)
            .await
            .map_err(|e| {
                SyncError::store_unavailable(format!("list groups in {}", self.settings.bucket), e)
            })?;
        let mut groups: Vec<Group> = prefixes
            .iter()
            .filter_map(|p| Group::from_prefix(p))
            .collect();
        if let Some(limit) = self.settings.limit {
            groups.truncate(limit);
        }
        Ok(groups)
    }

    /// Run one pass over every group.
    ///
    /// Groups already in flight when a fatal error occurs are allowed to
    /// finish (and release their claims); groups not yet started are not
    /// processed.
    ///
    /// # Errors
    ///
    /// The first [`SyncError::StoreUnavailable`] encountered.
    pub async fn run(&self) -> SyncResult<RunReport> {
        let started_at = Utc::now();
        let groups = self.list_groups().await?;
        info!(
            bucket = %self.settings.bucket,
            groups = groups.len(),
            dry_run = self.settings.dry_run,
            "starting sync"
        );

        let aborted = AtomicBool::new(false);
        let concurrency = self.settings.max_concurrent_groups.max(1);
        let results: Vec<SyncResult<Option<GroupReport>>> = stream::iter(groups.iter())
            .map(|group| self.run_group(group, &aborted))
            .buffered(concurrency)
            .collect()
            .await;

        let mut reports = Vec::with_capacity(results.len());
        let mut fatal = None;
        for result in results {
            match result {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }
        if let Some(e) = fatal {
            error!(error = %e, completed = reports.len(), "sync aborted");
            return Err(e);
        }

        let report = RunReport {
            bucket: self.settings.bucket.clone(),
            started_at,
            finished_at: Utc::now(),
            dry_run: self.settings.dry_run,
            groups: reports,
        };
        info!(
            persisted = report.count(GroupOutcome::Persisted),
            already_processed = report.count(GroupOutcome::AlreadyProcessed),
            claimed = report.count(GroupOutcome::Claimed),
            empty = report.count(GroupOutcome::Empty),
            failures = report.failures().count(),
            "sync finished"
        );
        Ok(report)
    }

    async fn run_group(
        &self,
        group: &Group,
        aborted: &AtomicBool,
    ) -> SyncResult<Option<GroupReport>> {
        if aborted.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let result = self.sync_group(group).await;
        if result.is_err() {
            aborted.store(true, Ordering::SeqCst);
        }
        result.map(Some)
    }

    /// Process one group: tracker check, claim, routing, aggregation, write.
    pub async fn sync_group(&self, group: &Group) -> SyncResult<GroupReport> {
        if self.tracker.is_processed(&group.id).await? {
            info!(group = %group.id, "already processed, skipping");
            return Ok(GroupReport::skipped(&group.id, GroupOutcome::AlreadyProcessed));
        }
        if self.settings.dry_run {
            return self.plan_group(group).await;
        }

        let Some(claim) = self.tracker.try_claim(&group.id).await? else {
            info!(group = %group.id, "claimed by another run, skipping");
            return Ok(GroupReport::skipped(&group.id, GroupOutcome::Claimed));
        };
        let result = self.ingest_claimed(group).await;
        let released = self.tracker.release(claim).await;
        let report = result?;
        released?;
        Ok(report)
    }

    async fn ingest_claimed(&self, group: &Group) -> SyncResult<GroupReport> {
        // Another run may have finished the group between the first check
        // and the claim.
        if self.tracker.claims_enabled() && self.tracker.is_processed(&group.id).await? {
            return Ok(GroupReport::skipped(&group.id, GroupOutcome::AlreadyProcessed));
        }
        self.ingest_group(group).await
    }

    async fn list_members(&self, group: &Group) -> SyncResult<Vec<String>> {
        self.objects
            .list_objects(&self.settings.bucket, &group.prefix)
            .await
            .map_err(|e| SyncError::store_unavailable(format!("list objects in {}", group.prefix), e))
    }

    async fn plan_group(&self, group: &Group) -> SyncResult<GroupReport> {
        let mut report = GroupReport::skipped(&group.id, GroupOutcome::Planned);
        for key in self.list_members(group).await? {
            let kind = classify(&key);
            report.objects.push(RoutedObject { key, kind });
        }
        Ok(report)
    }

    async fn ingest_group(&self, group: &Group) -> SyncResult<GroupReport> {
        info!(group = %group.id, "processing group");
        let mut report = GroupReport::skipped(&group.id, GroupOutcome::Empty);
        let mut buffer = String::new();

        for key in self.list_members(group).await? {
            let kind = classify(&key);
            let object = ObjectRef::new(self.settings.bucket.clone(), key.clone());
            match kind {
                ObjectKind::ImageDocument => match self.extractor.extract(&object).await {
                    Ok(pages) => {
                        for page in &pages {
                            push_page(&mut buffer, page);
                        }
                        report.documents_extracted += 1;
                    }
                    Err(e) => {
                        warn!(group = %group.id, key = %key, error = %e, "skipping document");
                        report.failures.extend(ObjectFailure::from_error(&group.id, &key, &e));
                    }
                },
                ObjectKind::WearableMetric(metric) => match self.importer.import_csv(&object).await {
                    Ok(records) => {
                        let table = self.settings.table_for(metric);
                        let summary = self.inserter.insert_all(&records, table).await;
                        info!(
                            group = %group.id,
                            key = %key,
                            table,
                            inserted = summary.inserted,
                            failed = summary.failures.len(),
                            "imported wearable export"
                        );
                        report.wearable_rows_inserted += summary.inserted;
                        report.failures.extend(
                            summary
                                .failures
                                .iter()
                                .filter_map(|e| ObjectFailure::from_error(&group.id, &key, e)),
                        );
                    }
                    Err(e) => {
                        warn!(group = %group.id, key = %key, error = %e, "skipping wearable export");
                        report.failures.extend(ObjectFailure::from_error(&group.id, &key, &e));
                    }
                },
                ObjectKind::Unrecognized => {
                    debug!(group = %group.id, key = %key, "ignoring object");
                }
            }
            report.objects.push(RoutedObject { key, kind });
        }

        let text = buffer.trim();
        if text.is_empty() {
            info!(group = %group.id, "no text recognized, nothing written");
            return Ok(report);
        }

        let record = ExtractedDocumentRecord {
            file_name: group.id.clone(),
            insertion_time: Utc::now().timestamp_millis(),
            text: text.to_string(),
        };
        self.records
            .put(&self.settings.document_table, record.to_item())
            .await
            .map_err(|e| {
                SyncError::store_unavailable(format!("put into {}", self.settings.document_table), e)
            })?;

        report.outcome = GroupOutcome::Persisted;
        report.text_chars = record.text.chars().count();
        info!(group = %group.id, chars = report.text_chars, "document record written");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{CannedAnalyzer, InMemoryObjectStore, InMemoryRecordStore};

    #[test]
    fn default_metric_tables_use_markers() {
        let settings = SyncSettings::new("bucket", "EhrTable");
        assert_eq!(settings.table_for(MetricKind::HeartRate), "HeartRate_CountPerMin");
        assert_eq!(settings.metric_tables.len(), MetricKind::ALL.len());
    }

    #[test]
    fn empty_bucket_name_is_rejected() {
        let result = Orchestrator::new(
            SyncSettings::new(" ", "EhrTable"),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(CannedAnalyzer::new()),
            Arc::new(InMemoryRecordStore::new()),
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn limit_truncates_groups() {
        let objects = Arc::new(InMemoryObjectStore::new());
        for g in ["a", "b", "c"] {
            objects.insert("bucket", &format!("{}/p.png", g), "x");
        }
        let mut settings = SyncSettings::new("bucket", "EhrTable");
        settings.limit = Some(2);
        let orchestrator = Orchestrator::new(
            settings,
            objects,
            Arc::new(CannedAnalyzer::new()),
            Arc::new(InMemoryRecordStore::new()),
        )
        .unwrap();
        let groups = orchestrator.list_groups().await.unwrap();
        let ids: Vec<_> = groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
