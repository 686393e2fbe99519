//! Command implementations behind the `phi-sync` CLI.
//!
//! `sync` builds the AWS-backed collaborators, runs one orchestrator pass
//! and prints a summary; `status` asks the tracker about one group;
//! `classify` shows how keys would be routed, offline.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use phi_sync_core::pipeline::{Orchestrator, SyncSettings};
use phi_sync_core::report::{FailureKind, GroupOutcome, RunReport};
use phi_sync_core::route::classify;
use phi_sync_core::store::{DocumentAnalyzer, ObjectStore, RecordStore};
use phi_sync_core::tracker::ProcessedSetTracker;

use crate::aws::AwsClient;
use crate::config::Config;
use crate::dynamodb::DynamoRecordStore;
use crate::s3::S3ObjectStore;
use crate::sigv4::AwsCredentials;
use crate::textract::TextractAnalyzer;

/// The three collaborators an orchestrator runs against.
pub struct Backends {
    pub objects: Arc<dyn ObjectStore>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub records: Arc<dyn RecordStore>,
}

impl Backends {
    /// AWS-backed collaborators sharing one signing client.
    pub fn aws(config: &Config) -> Result<Self> {
        let credentials = AwsCredentials::from_env()?;
        let client = Arc::new(AwsClient::new(
            &config.aws,
            &config.retry,
            Duration::from_secs(config.sync.request_timeout_secs),
            credentials,
        )?);
        info!(region = client.region(), endpoint = ?config.aws.endpoint_url, "AWS client ready");

        Ok(Self {
            objects: Arc::new(S3ObjectStore::new(client.clone())),
            analyzer: Arc::new(TextractAnalyzer::new(client.clone())),
            records: Arc::new(DynamoRecordStore::new(client)),
        })
    }
}

/// Run one sync pass against AWS and print its report.
pub async fn run_sync(
    config: &Config,
    dry_run: bool,
    limit: Option<usize>,
    json: bool,
) -> Result<RunReport> {
    let settings = config.sync_settings(limit, dry_run)?;
    let backends = Backends::aws(config)?;
    let report = sync_with(settings, backends).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }
    Ok(report)
}

/// Run one pass over arbitrary collaborators.
pub async fn sync_with(
    settings: SyncSettings,
    backends: Backends,
) -> Result<RunReport> {
    let orchestrator = Orchestrator::new(
        settings,
        backends.objects,
        backends.analyzer,
        backends.records,
    )?;
    let report = orchestrator.run().await?;
    Ok(report)
}

/// Human-readable run summary.
pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { " (dry-run)" } else { "" };
    let _ = writeln!(out, "sync s3://{}{}", report.bucket, mode);
    let _ = writeln!(out, "  groups listed: {}", report.groups.len());

    if report.dry_run {
        let _ = writeln!(out, "  would process: {}", report.count(GroupOutcome::Planned));
        let _ = writeln!(out, "  already processed: {}", report.count(GroupOutcome::AlreadyProcessed));
        for group in report.groups.iter().filter(|g| g.outcome == GroupOutcome::Planned) {
            let _ = writeln!(out, "    {}", group.group_id);
            for object in &group.objects {
                let _ = writeln!(out, "      {:<10} {}", object.kind.to_string(), object.key);
            }
        }
        let _ = writeln!(out, "ok");
        return out;
    }

    let _ = writeln!(out, "  persisted: {}", report.count(GroupOutcome::Persisted));
    let _ = writeln!(out, "  already processed: {}", report.count(GroupOutcome::AlreadyProcessed));
    let _ = writeln!(out, "  empty: {}", report.count(GroupOutcome::Empty));
    let claimed = report.count(GroupOutcome::Claimed);
    if claimed > 0 {
        let _ = writeln!(out, "  claimed elsewhere: {}", claimed);
    }
    let _ = writeln!(out, "  documents extracted: {}", report.documents_extracted());
    let _ = writeln!(out, "  wearable rows inserted: {}", report.wearable_rows_inserted());
    let _ = writeln!(out, "  ignored objects: {}", report.ignored_objects());

    let failures: Vec<_> = report.failures().collect();
    if failures.is_empty() {
        let _ = writeln!(out, "ok");
    } else {
        let _ = writeln!(
            out,
            "  failures: {} (extraction {}, import {}, insert {})",
            failures.len(),
            report.failure_count(FailureKind::Extraction),
            report.failure_count(FailureKind::ImportParse),
            report.failure_count(FailureKind::Insert),
        );
        for failure in failures {
            let _ = writeln!(out, "    {}: {}", failure.key, failure.message);
        }
        let _ = writeln!(out, "completed with failures");
    }
    out
}

/// Print whether a group has a document record.
pub async fn run_status(config: &Config, group: &str) -> Result<bool> {
    if group.trim().is_empty() || group.contains('/') {
        bail!("Invalid group id '{}': expected a top-level prefix without '/'", group);
    }
    let backends = Backends::aws(config)?;
    let tracker = ProcessedSetTracker::new(backends.records, config.tables.ehr.clone());
    let processed = tracker
        .is_processed(group)
        .await
        .with_context(|| format!("Failed to check group '{}'", group))?;

    if processed {
        println!("{}: processed ({})", group, config.tables.ehr);
    } else {
        println!("{}: pending", group);
    }
    Ok(processed)
}

/// Print the route each key would take.
pub fn run_classify(keys: &[String]) {
    for key in keys {
        println!("{:<10} {}", classify(key).to_string(), key);
    }
}
