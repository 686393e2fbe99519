//! # phi-sync
//!
//! Scheduled ingestion of patient uploads from S3 into DynamoDB.
//!
//! Each top-level prefix of the upload bucket is one *group* (one patient
//! or upload batch). A sync pass skips groups that already have a record
//! in the document table, OCRs every scanned page in the rest with
//! Textract, imports wearable CSV exports into per-metric tables, and
//! writes one cleaned text record per group.
//!
//! The pipeline itself lives in [`phi_sync_core`], which knows nothing
//! about AWS. This crate supplies the AWS-backed collaborators, the
//! configuration layer and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`sigv4`] | AWS Signature V4 signing |
//! | [`aws`] | Signed HTTP transport with retry/backoff |
//! | [`s3`] | [`ObjectStore`](phi_sync_core::store::ObjectStore) over S3 |
//! | [`textract`] | [`DocumentAnalyzer`](phi_sync_core::store::DocumentAnalyzer) over Textract |
//! | [`dynamodb`] | [`RecordStore`](phi_sync_core::store::RecordStore) over DynamoDB |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`sync_cmd`] | `sync`, `status` and `classify` commands |

pub mod aws;
pub mod config;
pub mod dynamodb;
pub mod logging;
pub mod s3;
pub mod sigv4;
pub mod sync_cmd;
pub mod textract;

pub use phi_sync_core;
