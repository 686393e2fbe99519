//! Tests driving the `phi-sync` binary and the library entry points that
//! need no AWS access.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use phi_sync::config::load_config_with;
use phi_sync::sync_cmd::{format_report, sync_with, Backends};
use phi_sync_core::report::GroupOutcome;
use phi_sync_core::store::memory::{CannedAnalyzer, InMemoryObjectStore, InMemoryRecordStore};
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "S3_BUCKET_NAME",
    "EHR_TABLE_NAME",
    "CLAIMS_TABLE_NAME",
    "AWS_REGION",
    "AWS_DEFAULT_REGION",
    "AWS_ENDPOINT_URL",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
];

fn phi_sync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_phi-sync"))
}

fn run_phi_sync(config: Option<&Path>, args: &[&str]) -> (String, String, bool) {
    let mut cmd = Command::new(phi_sync_binary());
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    if let Some(path) = config {
        cmd.arg("--config").arg(path);
    }
    let output = cmd.args(args).output().expect("failed to run phi-sync");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("phi-sync.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_classify_routes_keys() {
    let (stdout, _, ok) = run_phi_sync(
        None,
        &[
            "classify",
            "patient123/page1.PNG",
            "patient123/HeartRate_CounterPerMin.csv",
            "patient123/Steps_Count/photo.jpg",
            "patient123/notes.pdf",
        ],
    );
    assert!(ok);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("image"));
    assert!(lines[1].starts_with("wearable:HeartRate_CountPerMin"));
    assert!(lines[2].starts_with("image"));
    assert!(lines[3].starts_with("ignored"));
    assert!(lines[3].ends_with("patient123/notes.pdf"));
}

#[test]
fn test_classify_requires_keys() {
    let (_, _, ok) = run_phi_sync(None, &["classify"]);
    assert!(!ok);
}

#[test]
fn test_sync_without_bucket_fails() {
    let (_, stderr, ok) = run_phi_sync(None, &["sync", "--dry-run"]);
    assert!(!ok);
    assert!(stderr.contains("No bucket configured"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "[sync]\nmax_concurrent_groups = 0\n");
    let (_, stderr, ok) = run_phi_sync(Some(&path), &["classify", "a/b.png"]);
    assert!(!ok);
    assert!(stderr.contains("max_concurrent_groups"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("absent.toml");
    let (_, stderr, ok) = run_phi_sync(Some(&path), &["status", "patient123"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_status_rejects_empty_group() {
    let (_, stderr, ok) = run_phi_sync(None, &["status", ""]);
    assert!(!ok);
    assert!(stderr.contains("Invalid group id"), "stderr: {}", stderr);
}

#[test]
fn test_env_lookup_overrides_file() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "[storage]\nbucket = \"from-file\"\n");
    let config = load_config_with(&path, |name| {
        (name == "S3_BUCKET_NAME").then(|| "from-env".to_string())
    })
    .unwrap();
    assert_eq!(config.storage.bucket, "from-env");
    assert_eq!(config.tables.ehr, "EhrTable");
}

#[test]
fn test_load_config_from_file() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        &tmp,
        r#"
[aws]
region = "eu-central-1"
endpoint_url = "http://localhost:4566"

[storage]
bucket = "ehr-uploads"

[tables]
ehr = "EhrTable"
claims = "EhrClaims"

[tables.metrics]
distance = "DistanceKm"

[sync]
max_concurrent_groups = 4
"#,
    );
    let config = load_config_with(&path, |_| None).unwrap();
    let settings = config.sync_settings(None, false).unwrap();
    assert_eq!(settings.max_concurrent_groups, 4);
    assert_eq!(settings.claims_table.as_deref(), Some("EhrClaims"));
    assert_eq!(
        settings.table_for(phi_sync_core::route::MetricKind::Distance),
        "DistanceKm"
    );
}

#[tokio::test]
async fn test_sync_with_in_memory_backends() {
    let objects = Arc::new(InMemoryObjectStore::new());
    objects.insert("ehr-uploads", "patient123/page1.png", "png");
    objects.insert("ehr-uploads", "patient123/page2.jpg", "jpg");
    let analyzer = CannedAnalyzer::new()
        .with_pages("patient123/page1.png", &["Blood   Pressure:  120/80"])
        .with_pages("patient123/page2.jpg", &["- Notes -"]);
    let records = Arc::new(InMemoryRecordStore::new());

    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "[storage]\nbucket = \"ehr-uploads\"\n");
    let config = load_config_with(&path, |_| None).unwrap();
    let settings = config.sync_settings(None, false).unwrap();

    let report = sync_with(
        settings,
        Backends {
            objects,
            analyzer: Arc::new(analyzer),
            records: records.clone(),
        },
    )
    .await
    .unwrap();

    assert_eq!(report.count(GroupOutcome::Persisted), 1);
    let items = records.items("EhrTable");
    assert_eq!(items[0]["text"], "Blood Pressure: 120/80 Notes");
    assert!(format_report(&report).ends_with("ok\n"));
}
