//! Wearable CSV import and metric-table insertion.
//!
//! Exports are CSV files with at least `startDate`, `endDate` and `value`
//! columns (extra columns are ignored). Dates are not validated here. Each
//! row becomes one item in the metric's table; nothing is deduplicated, so
//! importing the same file twice writes every row twice.

use std::sync::Arc;

use tracing::warn;

use crate::error::{SyncError, SyncResult};
use crate::models::{ObjectRef, WearableRecord, WearableRow};
use crate::store::{ObjectStore, RecordStore};

/// Parse a wearable export, preserving row order.
///
/// # Errors
///
/// The first malformed row (wrong field count, missing column, invalid
/// UTF-8) aborts the whole file.
pub fn parse_wearable_csv(bytes: &[u8]) -> Result<Vec<WearableRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);
    reader.deserialize().collect()
}

/// Split `"2024-03-01 07:15:00 -0800"` into `("2024-03-01", "07:15:00 -0800")`
/// at the first space. A value without a space is all date, no time.
pub fn split_date_time(value: &str) -> (&str, &str) {
    value.split_once(' ').unwrap_or((value, ""))
}

impl WearableRecord {
    /// Persisted row: date of `startDate`, *time* of `endDate`, `value`.
    pub fn to_row(&self) -> WearableRow {
        let (start_date, _) = split_date_time(&self.start_date);
        let (_, end_time) = split_date_time(&self.end_date);
        WearableRow {
            start_date: start_date.to_string(),
            end_date: end_time.to_string(),
            value: self.value.clone(),
        }
    }
}

/// Fetches and parses wearable exports.
#[derive(Clone)]
pub struct WearableImporter {
    objects: Arc<dyn ObjectStore>,
}

impl WearableImporter {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    /// Download `object` and parse it into records.
    ///
    /// # Errors
    ///
    /// [`SyncError::ImportParseFailed`] if the object cannot be read or
    /// any row is malformed.
    pub async fn import_csv(&self, object: &ObjectRef) -> SyncResult<Vec<WearableRecord>> {
        let bytes = self
            .objects
            .get_object(&object.bucket, &object.key)
            .await
            .map_err(|e| SyncError::ImportParseFailed {
                key: object.key.clone(),
                reason: format!("{:#}", e),
            })?;
        parse_wearable_csv(&bytes).map_err(|e| SyncError::ImportParseFailed {
            key: object.key.clone(),
            reason: e.to_string(),
        })
    }
}

/// Outcome of inserting one batch of wearable records.
#[derive(Debug, Default)]
pub struct InsertSummary {
    pub inserted: usize,
    pub failures: Vec<SyncError>,
}

/// Writes wearable rows to metric tables, one independent put per record.
#[derive(Clone)]
pub struct WearableInserter {
    records: Arc<dyn RecordStore>,
}

impl WearableInserter {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Insert every record into `table`. A failed put is logged and
    /// recorded; the remaining records are still attempted.
    pub async fn insert_all(&self, records: &[WearableRecord], table: &str) -> InsertSummary {
        let mut summary = InsertSummary::default();
        for record in records {
            let row = record.to_row();
            match self.records.put(table, row.to_item()).await {
                Ok(()) => summary.inserted += 1,
                Err(source) => {
                    let err = SyncError::InsertFailed {
                        table: table.to_string(),
                        source,
                    };
                    warn!(error = %err, start_date = %record.start_date, "wearable row not written");
                    summary.failures.push(err);
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryObjectStore, InMemoryRecordStore};

    const STEPS_CSV: &str = "\
startDate,endDate,value
2024-03-01 07:15:00 -0800,2024-03-01 07:20:00 -0800,412
2024-03-01 08:00:00 -0800,2024-03-02 00:05:00 -0800,88
";

    #[test]
    fn parses_rows_in_order() {
        let records = parse_wearable_csv(STEPS_CSV.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, "412");
        assert_eq!(records[1].start_date, "2024-03-01 08:00:00 -0800");
    }

    #[test]
    fn extra_columns_are_ignored() {
        let csv = "sourceName,startDate,endDate,value,unit\nWatch,2024-01-01 1:00,2024-01-01 2:00,7,count\n";
        let records = parse_wearable_csv(csv.as_bytes()).unwrap();
        assert_eq!(records[0].value, "7");
    }

    #[test]
    fn malformed_row_is_an_error() {
        let csv = "startDate,endDate,value\n2024-01-01 1:00,2024-01-01 2:00\n";
        assert!(parse_wearable_csv(csv.as_bytes()).is_err());
    }

    #[test]
    fn missing_column_is_an_error() {
        let csv = "startDate,value\n2024-01-01 1:00,3\n";
        assert!(parse_wearable_csv(csv.as_bytes()).is_err());
    }

    #[test]
    fn row_keeps_start_date_and_end_time() {
        // The persisted `endDate` holds the time of day of the source
        // `endDate`; its date is dropped even when it differs from the start.
        let records = parse_wearable_csv(STEPS_CSV.as_bytes()).unwrap();
        let row = records[1].to_row();
        assert_eq!(row.start_date, "2024-03-01");
        assert_eq!(row.end_date, "00:05:00 -0800");
        assert_eq!(row.value, "88");
    }

    #[test]
    fn date_without_time() {
        assert_eq!(split_date_time("2024-03-01"), ("2024-03-01", ""));
    }

    #[tokio::test]
    async fn importing_twice_doubles_rows() {
        let objects = Arc::new(InMemoryObjectStore::new());
        objects.insert("b", "w/Steps_Count.csv", STEPS_CSV);
        let records = Arc::new(InMemoryRecordStore::new());
        let importer = WearableImporter::new(objects);
        let inserter = WearableInserter::new(records.clone());

        let object = ObjectRef::new("b", "w/Steps_Count.csv");
        for _ in 0..2 {
            let parsed = importer.import_csv(&object).await.unwrap();
            inserter.insert_all(&parsed, "Steps_Count").await;
        }
        assert_eq!(records.len("Steps_Count"), 4);
    }

    #[tokio::test]
    async fn failed_put_does_not_stop_the_batch() {
        let records = Arc::new(InMemoryRecordStore::new());
        records.fail_puts_when(|_, item| item["value"] == "412");
        let inserter = WearableInserter::new(records.clone());

        let parsed = parse_wearable_csv(STEPS_CSV.as_bytes()).unwrap();
        let summary = inserter.insert_all(&parsed, "Steps_Count").await;
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(matches!(summary.failures[0], SyncError::InsertFailed { .. }));
        assert_eq!(records.len("Steps_Count"), 1);
    }

    #[tokio::test]
    async fn unreadable_object_is_import_failure() {
        let objects = Arc::new(InMemoryObjectStore::new());
        let importer = WearableImporter::new(objects);
        let err = importer
            .import_csv(&ObjectRef::new("b", "w/Steps_Count.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ImportParseFailed { .. }));
    }
}
