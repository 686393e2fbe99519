//! Per-run ingestion report.
//!
//! Contained failures never abort a run; they are collected here so the
//! caller can log, print or alert on them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncError;
use crate::route::ObjectKind;

/// What happened to one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOutcome {
    /// A document record was written.
    Persisted,
    /// The document table already held a record for the group.
    AlreadyProcessed,
    /// Another run holds the group's claim.
    Claimed,
    /// No text was recognized; nothing was written.
    Empty,
    /// Dry run: routing was computed, nothing was called or written.
    Planned,
}

/// Category of a contained failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Extraction,
    ImportParse,
    Insert,
}

/// A contained per-object or per-row failure.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectFailure {
    pub group_id: String,
    pub key: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ObjectFailure {
    /// Build a failure record. Returns `None` for fatal error kinds, which
    /// are never contained.
    pub fn from_error(group_id: &str, key: &str, err: &SyncError) -> Option<Self> {
        let kind = match err {
            SyncError::ExtractionFailed { .. } => FailureKind::Extraction,
            SyncError::ImportParseFailed { .. } => FailureKind::ImportParse,
            SyncError::InsertFailed { .. } => FailureKind::Insert,
            SyncError::StoreUnavailable { .. } | SyncError::Config(_) => return None,
        };
        Some(Self {
            group_id: group_id.to_string(),
            key: key.to_string(),
            kind,
            message: err.to_string(),
        })
    }
}

/// Routing decision recorded for one member object.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedObject {
    pub key: String,
    #[serde(serialize_with = "serialize_kind")]
    pub kind: ObjectKind,
}

fn serialize_kind<S: serde::Serializer>(kind: &ObjectKind, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(kind)
}

/// Result of processing one group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group_id: String,
    pub outcome: GroupOutcome,
    /// Member objects and where they were routed. Empty for skipped groups.
    pub objects: Vec<RoutedObject>,
    /// Image objects whose text was extracted.
    pub documents_extracted: usize,
    pub wearable_rows_inserted: usize,
    /// Length in characters of the persisted text.
    pub text_chars: usize,
    pub failures: Vec<ObjectFailure>,
}

impl GroupReport {
    pub fn skipped(group_id: &str, outcome: GroupOutcome) -> Self {
        Self {
            group_id: group_id.to_string(),
            outcome,
            objects: Vec::new(),
            documents_extracted: 0,
            wearable_rows_inserted: 0,
            text_chars: 0,
            failures: Vec::new(),
        }
    }
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub bucket: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub groups: Vec<GroupReport>,
}

impl RunReport {
    pub fn count(&self, outcome: GroupOutcome) -> usize {
        self.groups.iter().filter(|g| g.outcome == outcome).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ObjectFailure> {
        self.groups.iter().flat_map(|g| g.failures.iter())
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures().filter(|f| f.kind == kind).count()
    }

    pub fn documents_extracted(&self) -> usize {
        self.groups.iter().map(|g| g.documents_extracted).sum()
    }

    pub fn wearable_rows_inserted(&self) -> usize {
        self.groups.iter().map(|g| g.wearable_rows_inserted).sum()
    }

    pub fn ignored_objects(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.objects.iter())
            .filter(|o| o.kind == ObjectKind::Unrecognized)
            .count()
    }

    pub fn group(&self, group_id: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.group_id == group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_not_contained() {
        let err = SyncError::store_unavailable("put", anyhow::anyhow!("down"));
        assert!(ObjectFailure::from_error("g", "k", &err).is_none());

        let err = SyncError::ExtractionFailed {
            key: "g/a.png".into(),
            source: anyhow::anyhow!("bad image"),
        };
        let failure = ObjectFailure::from_error("g", "g/a.png", &err).unwrap();
        assert_eq!(failure.kind, FailureKind::Extraction);
        assert!(failure.message.contains("bad image"));
    }

    #[test]
    fn routed_object_serializes_kind_as_text() {
        let routed = RoutedObject {
            key: "g/a.png".into(),
            kind: ObjectKind::ImageDocument,
        };
        let json = serde_json::to_value(&routed).unwrap();
        assert_eq!(json["kind"], "image");
    }
}
