//! In-memory collaborators for tests and offline runs.
//!
//! Uses `BTreeMap`/`HashMap` behind `std::sync::RwLock`. Each double can be
//! switched into a failing mode to exercise the pipeline's error handling.
//! [`InMemoryRecordStore::put`] appends without a key schema, so repeated
//! puts of identical items are all kept.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{AnalyzedDocument, FeatureType, Item, PageText};

use super::{DocumentAnalyzer, ExpiredBefore, ObjectStore, RecordStore};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ═══════════════════════════════════════════════════════════════════════
// Object store
// ═══════════════════════════════════════════════════════════════════════

/// In-memory bucket contents, listed in lexicographic key order.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
    unavailable: AtomicBool,
    unreadable: RwLock<BTreeSet<String>>,
    unlistable: RwLock<BTreeSet<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        write(&self.objects).insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Make every call fail, as during a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `get_object` fail for one key.
    pub fn set_unreadable(&self, key: &str) {
        write(&self.unreadable).insert(key.to_string());
    }

    /// Make `list_objects` fail for one prefix.
    pub fn set_unlistable(&self, prefix: &str) {
        write(&self.unlistable).insert(prefix.to_string());
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("object store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_top_level_prefixes(&self, bucket: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let objects = read(&self.objects);
        let prefixes: BTreeSet<String> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .filter_map(|(_, key)| key.split_once('/').map(|(head, _)| format!("{}/", head)))
            .collect();
        Ok(prefixes.into_iter().collect())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        if read(&self.unlistable).contains(prefix) {
            bail!("access denied listing s3://{}/{}", bucket, prefix);
        }
        let objects = read(&self.objects);
        Ok(objects
            .keys()
            .filter(|(b, key)| b == bucket && key.starts_with(prefix) && !key.ends_with('/'))
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        if read(&self.unreadable).contains(key) {
            bail!("access denied for s3://{}/{}", bucket, key);
        }
        read(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("no such key: s3://{}/{}", bucket, key))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Document analyzer
// ═══════════════════════════════════════════════════════════════════════

/// Analyzer returning fixed page texts per object key.
#[derive(Default)]
pub struct CannedAnalyzer {
    responses: RwLock<HashMap<String, std::result::Result<Vec<String>, String>>>,
    calls: AtomicUsize,
}

impl CannedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the raw page texts returned for `key`, page 1 first.
    pub fn with_pages(self, key: &str, pages: &[&str]) -> Self {
        write(&self.responses).insert(
            key.to_string(),
            Ok(pages.iter().map(|p| p.to_string()).collect()),
        );
        self
    }

    /// Make analysis of `key` fail with `message`.
    pub fn failing(self, key: &str, message: &str) -> Self {
        write(&self.responses).insert(key.to_string(), Err(message.to_string()));
        self
    }

    /// Number of `analyze` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentAnalyzer for CannedAnalyzer {
    async fn analyze(
        &self,
        _bucket: &str,
        key: &str,
        _features: &[FeatureType],
    ) -> Result<AnalyzedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match read(&self.responses).get(key) {
            Some(Ok(pages)) => Ok(AnalyzedDocument {
                page_count: pages.len() as u32,
                pages: pages
                    .iter()
                    .enumerate()
                    .map(|(i, text)| PageText {
                        page: i as u32 + 1,
                        text: text.clone(),
                    })
                    .collect(),
            }),
            Some(Err(message)) => Err(anyhow!("{}", message)),
            None => Err(anyhow!("unsupported document format: {}", key)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Record store
// ═══════════════════════════════════════════════════════════════════════

type PutFailure = Box<dyn Fn(&str, &Item) -> bool + Send + Sync>;

/// Append-only in-memory tables.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<String, Vec<Item>>>,
    unavailable: AtomicBool,
    put_failure: RwLock<Option<PutFailure>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as during a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail `put` calls for which `predicate(table, item)` holds.
    pub fn fail_puts_when<F>(&self, predicate: F)
    where
        F: Fn(&str, &Item) -> bool + Send + Sync + 'static,
    {
        *write(&self.put_failure) = Some(Box::new(predicate));
    }

    /// Snapshot of a table's items in insertion order.
    pub fn items(&self, table: &str) -> Vec<Item> {
        read(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn len(&self, table: &str) -> usize {
        read(&self.tables).get(table).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("record store unavailable");
        }
        Ok(())
    }
}

fn key_matches(item: &Item, key_name: &str, key_value: &str) -> bool {
    match item.get(key_name) {
        Some(Value::String(s)) => s == key_value,
        Some(other) => other.to_string() == key_value,
        None => false,
    }
}

fn is_expired(item: &Item, expired: Option<&ExpiredBefore>) -> bool {
    expired.is_some_and(|e| {
        item.get(&e.attribute)
            .and_then(Value::as_i64)
            .is_some_and(|t| t < e.cutoff)
    })
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn query_partition(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Item>> {
        self.check_available()?;
        let tables = read(&self.tables);
        let matching = tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|item| key_matches(item, key_name, key_value))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }

    async fn put(&self, table: &str, item: Item) -> Result<()> {
        self.check_available()?;
        if let Some(predicate) = read(&self.put_failure).as_ref() {
            if predicate(table, &item) {
                bail!("put rejected for table {}", table);
            }
        }
        write(&self.tables)
            .entry(table.to_string())
            .or_default()
            .push(item);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        table: &str,
        item: Item,
        key_name: &str,
        expired: Option<ExpiredBefore>,
    ) -> Result<bool> {
        self.check_available()?;
        let key_value = match item.get(key_name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => bail!("item has no {} attribute", key_name),
        };
        let mut tables = write(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        let taken = rows.iter().any(|row| {
            key_matches(row, key_name, &key_value) && !is_expired(row, expired.as_ref())
        });
        if taken {
            return Ok(false);
        }
        rows.retain(|row| !key_matches(row, key_name, &key_value));
        rows.push(item);
        Ok(true)
    }

    async fn delete(&self, table: &str, key: Item) -> Result<()> {
        self.check_available()?;
        if let Some(rows) = write(&self.tables).get_mut(table) {
            rows.retain(|row| !key.iter().all(|(k, v)| row.get(k) == Some(v)));
        }
        Ok(())
    }
}
