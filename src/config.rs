//! Configuration loading.
//!
//! Values come from an optional TOML file, then environment variables
//! override them. Without a file, [`Config::from_env`] starts from the
//! defaults, which is how scheduled deployments run.
//!
//! ```toml
//! [aws]
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:4566"
//!
//! [storage]
//! bucket = "ehr-uploads"
//!
//! [tables]
//! ehr = "EhrTable"
//! # claims = "EhrClaims"
//!
//! [tables.metrics]
//! heart_rate = "HeartRate_CountPerMin"
//!
//! [sync]
//! max_concurrent_groups = 4
//! claim_ttl_secs = 900
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 500
//!
//! [logging]
//! format = "json"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use phi_sync_core::pipeline::SyncSettings;
use phi_sync_core::route::MetricKind;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Override for every service endpoint (LocalStack, VPC endpoints).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TablesConfig {
    #[serde(default = "default_ehr_table")]
    pub ehr: String,
    #[serde(default)]
    pub claims: Option<String>,
    /// Metric config key (`heart_rate`, `steps`, ...) to table name.
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            ehr: default_ehr_table(),
            claims: None,
            metrics: BTreeMap::new(),
        }
    }
}

fn default_ehr_table() -> String {
    "EhrTable".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Age after which a claim left by a dead run may be taken over.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_groups: default_max_concurrent_groups(),
            request_timeout_secs: default_timeout_secs(),
            claim_ttl_secs: default_claim_ttl_secs(),
        }
    }
}

fn default_max_concurrent_groups() -> usize {
    1
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_claim_ttl_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults plus environment overrides, no file.
    pub fn from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply the deployment environment variables through `lookup`.
    ///
    /// Empty values are ignored so an unset-but-exported variable does
    /// not blank out a file setting.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(bucket) = get("S3_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Some(table) = get("EHR_TABLE_NAME") {
            self.tables.ehr = table;
        }
        if let Some(table) = get("CLAIMS_TABLE_NAME") {
            self.tables.claims = Some(table);
        }
        if let Some(region) = get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION")) {
            self.aws.region = region;
        }
        if let Some(endpoint) = get("AWS_ENDPOINT_URL") {
            self.aws.endpoint_url = Some(endpoint);
        }
    }

    /// Reject settings no run could succeed with. The bucket is checked
    /// later, by [`Config::sync_settings`], since `status` does not need it.
    pub fn validate(&self) -> Result<()> {
        if self.aws.region.trim().is_empty() {
            bail!("aws.region must not be empty");
        }
        if let Some(ref endpoint) = self.aws.endpoint_url {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                bail!("aws.endpoint_url must start with http:// or https://, got '{}'", endpoint);
            }
        }
        if self.tables.ehr.trim().is_empty() {
            bail!("tables.ehr must not be empty");
        }
        if matches!(self.tables.claims.as_deref(), Some(c) if c.trim().is_empty()) {
            bail!("tables.claims must not be empty when set");
        }
        for (key, table) in &self.tables.metrics {
            if MetricKind::from_config_key(key).is_none() {
                let known: Vec<&str> = MetricKind::ALL.iter().map(|m| m.config_key()).collect();
                bail!(
                    "Unknown metric '{}' in [tables.metrics]. Must be one of: {}",
                    key,
                    known.join(", ")
                );
            }
            if table.trim().is_empty() {
                bail!("tables.metrics.{} must not be empty", key);
            }
        }
        if self.sync.max_concurrent_groups == 0 {
            bail!("sync.max_concurrent_groups must be >= 1");
        }
        if self.sync.request_timeout_secs == 0 {
            bail!("sync.request_timeout_secs must be > 0");
        }
        if self.sync.claim_ttl_secs == 0 {
            bail!("sync.claim_ttl_secs must be > 0");
        }
        Ok(())
    }

    /// Settings for one orchestrator run.
    pub fn sync_settings(&self, limit: Option<usize>, dry_run: bool) -> Result<SyncSettings> {
        if self.storage.bucket.trim().is_empty() {
            bail!("No bucket configured. Set storage.bucket or S3_BUCKET_NAME.");
        }

        let mut settings = SyncSettings::new(self.storage.bucket.clone(), self.tables.ehr.clone());
        for (key, table) in &self.tables.metrics {
            let metric = MetricKind::from_config_key(key)
                .with_context(|| format!("Unknown metric '{}' in [tables.metrics]", key))?;
            settings.metric_tables.insert(metric, table.clone());
        }
        settings.claims_table = self.tables.claims.clone();
        settings.claim_ttl = Duration::from_secs(self.sync.claim_ttl_secs);
        settings.max_concurrent_groups = self.sync.max_concurrent_groups;
        settings.limit = limit;
        settings.dry_run = dry_run;
        Ok(settings)
    }
}

/// Read `path`, apply environment overrides, validate.
pub fn load_config(path: &Path) -> Result<Config> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// [`load_config`] with overrides read through `lookup` instead of the
/// process environment.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env(lookup);
    config.validate()?;
    Ok(config)
}

/// Parse TOML without consulting the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}
