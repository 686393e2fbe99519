//! # phi-sync core
//!
//! Storage-agnostic logic for the health-record sync pipeline: data models,
//! object routing, OCR text cleanup, wearable CSV import, the processed-set
//! tracker and the ingestion orchestrator.
//!
//! This crate contains no tokio, HTTP or cloud-SDK dependencies. Every
//! external service is reached through the traits in [`store`]; concrete
//! AWS implementations live in the `phi-sync` crate and in-memory ones in
//! [`store::memory`].
//!
//! ```text
//! ObjectStore ──▶ classify ──┬──▶ DocumentTextExtractor ──▶ aggregate ──▶ RecordStore (EHR table)
//!  (prefixes)                ├──▶ WearableImporter ──▶ WearableInserter ──▶ RecordStore (metric tables)
//!                            └──▶ ignored
//! ```

pub mod clean;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod route;
pub mod store;
pub mod tracker;
pub mod wearable;
