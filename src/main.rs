//! # phi-sync CLI
//!
//! ```bash
//! # Scheduled run, configured entirely from the environment
//! S3_BUCKET_NAME=ehr-uploads EHR_TABLE_NAME=EhrTable phi-sync sync
//!
//! # Show what would be processed
//! phi-sync --config ./config/phi-sync.toml sync --dry-run
//!
//! # Has a group been ingested?
//! phi-sync status patient123
//!
//! # How would these keys be routed?
//! phi-sync classify patient123/page1.png patient123/HeartRate_CountPerMin.csv
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use phi_sync::config::{self, Config, LoggingConfig};
use phi_sync::{logging, sync_cmd};

/// Ingest scanned EHR pages and wearable exports from S3 into DynamoDB.
#[derive(Parser)]
#[command(name = "phi-sync", version)]
struct Cli {
    /// Path to a TOML configuration file.
    ///
    /// Without it, defaults plus environment variables are used
    /// (`S3_BUCKET_NAME`, `EHR_TABLE_NAME`, `AWS_REGION`, ...).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass over the bucket.
    ///
    /// Exits non-zero if a store becomes unavailable. Per-object
    /// extraction and import failures are reported but do not fail the run.
    Sync {
        /// Route and check only; no Textract calls and no writes.
        #[arg(long)]
        dry_run: bool,

        /// Process at most this many groups.
        #[arg(long)]
        limit: Option<usize>,

        /// Print the run report as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Show whether a group already has a document record.
    Status {
        /// Group identifier (top-level prefix without `/`).
        group: String,
    },

    /// Show how object keys would be routed. Needs no AWS access.
    Classify {
        /// Object keys.
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match load(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            logging::init_tracing(&LoggingConfig::default());
            report_error(&err);
            return ExitCode::FAILURE;
        }
    };
    logging::init_tracing(&cfg.logging);

    match run(cli.command, &cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn load(cli: &Cli) -> Result<Config> {
    match cli.config {
        Some(ref path) => config::load_config(path),
        None => Config::from_env(),
    }
}

async fn run(command: Commands, cfg: &Config) -> Result<()> {
    match command {
        Commands::Sync {
            dry_run,
            limit,
            json,
        } => {
            sync_cmd::run_sync(cfg, dry_run, limit, json).await?;
        }
        Commands::Status { group } => {
            sync_cmd::run_status(cfg, &group).await?;
        }
        Commands::Classify { keys } => {
            sync_cmd::run_classify(&keys);
        }
    }
    Ok(())
}

/// Log an error with the causes its message does not already include.
fn report_error(err: &anyhow::Error) {
    let mut message = err.to_string();
    for cause in err.chain().skip(1) {
        let cause = cause.to_string();
        if !message.contains(&cause) {
            message.push_str(": ");
            message.push_str(&cause);
        }
    }
    error!("{}", message);
}
