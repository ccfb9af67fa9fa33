//! In-memory [`RecordStore`] implementation for tests and embedding.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Records keep
//! insertion order, which doubles as storage order for queries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::filter::FilterSpec;
use crate::models::{
    Activity, CanonicalRecord, ExportSnapshot, StoredRecord, UploadReport, UpsertOutcome,
};

use super::RecordStore;

#[derive(Default, Clone)]
struct Records {
    rows: Vec<StoredRecord>,
    by_key: HashMap<String, String>,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    records: RwLock<Records>,
    reports: RwLock<HashMap<String, UploadReport>>,
    snapshots: RwLock<Vec<ExportSnapshot>>,
    activities: RwLock<Vec<Activity>>,
    fail_audit_writes: AtomicBool,
    fail_key_lookups: AtomicBool,
    /// Batch position at which `bulk_upsert` fails; `usize::MAX` disables.
    fail_upsert_at: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            reports: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(Vec::new()),
            activities: RwLock::new(Vec::new()),
            fail_audit_writes: AtomicBool::new(false),
            fail_key_lookups: AtomicBool::new(false),
            fail_upsert_at: AtomicUsize::new(usize::MAX),
        }
    }

    /// Make report, snapshot and activity writes fail with a storage error.
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `existing_keys` fail with a storage error.
    pub fn set_fail_key_lookups(&self, fail: bool) {
        self.fail_key_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make `bulk_upsert` fail when it reaches the row at `position`.
    /// Rows before it are rolled back.
    pub fn set_fail_upsert_at(&self, position: Option<usize>) {
        self.fail_upsert_at
            .store(position.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// Delete a record out from under the pipeline, as an external writer would.
    pub fn remove_record(&self, id: &str) -> bool {
        let mut records = self.records.write().unwrap();
        let before = records.rows.len();
        records.rows.retain(|r| r.id != id);
        records.by_key.retain(|_, v| v != id);
        records.rows.len() != before
    }

    /// Reverse storage order, to prove callers never rely on it.
    pub fn reverse_storage_order(&self) {
        self.records.write().unwrap().rows.reverse();
    }

    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().rows.len()
    }

    pub fn find_by_key(&self, key: &str) -> Option<StoredRecord> {
        let records = self.records.read().unwrap();
        let id = records.by_key.get(key)?;
        records.rows.iter().find(|r| &r.id == id).cloned()
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.activities.read().unwrap().clone()
    }

    pub fn report_count(&self) -> usize {
        self.reports.read().unwrap().len()
    }

    fn check_audit_write(&self) -> Result<()> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("audit store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn existing_keys(&self, keys: &[String]) -> Result<Vec<String>> {
        if self.fail_key_lookups.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("key lookup failed".to_string()));
        }
        let records = self.records.read().unwrap();
        Ok(keys
            .iter()
            .filter(|k| records.by_key.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn bulk_upsert(&self, batch: &[CanonicalRecord]) -> Result<Vec<UpsertOutcome>> {
        let now = chrono::Utc::now().timestamp();
        let fail_at = self.fail_upsert_at.load(Ordering::SeqCst);
        let mut guard = self.records.write().unwrap();
        // Work on a copy so a failed batch leaves nothing behind.
        let mut records = guard.clone();
        let mut outcomes = Vec::with_capacity(batch.len());

        for (position, record) in batch.iter().enumerate() {
            if position == fail_at {
                return Err(LedgerError::Storage(format!(
                    "upsert failed at row {}",
                    position
                )));
            }
            let existing = record
                .natural_key()
                .and_then(|k| records.by_key.get(k).cloned());

            match existing {
                Some(id) => {
                    if let Some(stored) = records.rows.iter_mut().find(|r| r.id == id) {
                        stored.record = record.clone();
                        stored.updated_at = now;
                    }
                    outcomes.push(UpsertOutcome::Updated { id });
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    if let Some(key) = record.natural_key() {
                        records.by_key.insert(key.to_string(), id.clone());
                    }
                    records.rows.push(StoredRecord {
                        id: id.clone(),
                        record: record.clone(),
                        created_at: now,
                        updated_at: now,
                    });
                    outcomes.push(UpsertOutcome::Inserted {
                        id,
                        keyless: record.natural_key().is_none(),
                    });
                }
            }
        }

        *guard = records;
        Ok(outcomes)
    }

    async fn query_records(&self, filter: &FilterSpec) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .rows
            .iter()
            .filter(|r| filter.matches(&r.record))
            .cloned()
            .collect())
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<StoredRecord>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let records = self.records.read().unwrap();
        Ok(records
            .rows
            .iter()
            .filter(|r| wanted.contains(r.id.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_upload_report(&self, report: &UploadReport) -> Result<()> {
        self.check_audit_write()?;
        self.reports
            .write()
            .unwrap()
            .insert(report.id.clone(), report.clone());
        Ok(())
    }

    async fn get_upload_report(&self, id: &str) -> Result<Option<UploadReport>> {
        Ok(self.reports.read().unwrap().get(id).cloned())
    }

    async fn insert_snapshot(&self, snapshot: &ExportSnapshot) -> Result<()> {
        self.check_audit_write()?;
        self.snapshots.write().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<ExportSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn list_snapshots(
        &self,
        username: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<ExportSnapshot>, u64)> {
        let snapshots = self.snapshots.read().unwrap();
        let matching: Vec<&ExportSnapshot> = snapshots
            .iter()
            .rev()
            .filter(|s| username.map_or(true, |u| s.actor.username == u))
            .collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn record_activity(&self, activity: &Activity) -> Result<()> {
        self.check_audit_write()?;
        self.activities.write().unwrap().push(activity.clone());
        Ok(())
    }
}
