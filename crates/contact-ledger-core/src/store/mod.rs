//! Storage abstraction for Contact Ledger.
//!
//! The [`RecordStore`] trait defines every storage operation the ingestion
//! and export engines need, so the engines run unchanged against SQLite or
//! the in-memory store used in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::FilterSpec;
use crate::models::{
    Activity, CanonicalRecord, ExportSnapshot, StoredRecord, UploadReport, UpsertOutcome,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`existing_keys`](RecordStore::existing_keys) | Which natural keys are already stored |
/// | [`bulk_upsert`](RecordStore::bulk_upsert) | Apply a batch atomically, tagging each row |
/// | [`query_records`](RecordStore::query_records) | Records matching a filter, in storage order |
/// | [`fetch_records`](RecordStore::fetch_records) | Records by id, in no particular order |
/// | [`insert_upload_report`](RecordStore::insert_upload_report) | Persist an upload report |
/// | [`get_upload_report`](RecordStore::get_upload_report) | Read an upload report |
/// | [`insert_snapshot`](RecordStore::insert_snapshot) | Persist an export snapshot |
/// | [`get_snapshot`](RecordStore::get_snapshot) | Read an export snapshot |
/// | [`list_snapshots`](RecordStore::list_snapshots) | Page through snapshots, newest first |
/// | [`record_activity`](RecordStore::record_activity) | Append an audit event |
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Subset of `keys` already present in the store. Order not significant.
    async fn existing_keys(&self, keys: &[String]) -> Result<Vec<String>>;

    /// Apply `batch` as one all-or-nothing unit, in batch order.
    ///
    /// A row whose non-empty natural key matches a stored record overwrites
    /// every canonical field of that record; any other row, keyless rows
    /// always included, is inserted. Returns one outcome per input row.
    async fn bulk_upsert(&self, batch: &[CanonicalRecord]) -> Result<Vec<UpsertOutcome>>;

    async fn query_records(&self, filter: &FilterSpec) -> Result<Vec<StoredRecord>>;

    /// Records for the ids that still exist. Ids that are gone are skipped.
    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<StoredRecord>>;

    async fn insert_upload_report(&self, report: &UploadReport) -> Result<()>;

    async fn get_upload_report(&self, id: &str) -> Result<Option<UploadReport>>;

    async fn insert_snapshot(&self, snapshot: &ExportSnapshot) -> Result<()>;

    async fn get_snapshot(&self, id: &str) -> Result<Option<ExportSnapshot>>;

    /// One page of snapshots (newest first) plus the total matching count.
    async fn list_snapshots(
        &self,
        username: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<ExportSnapshot>, u64)>;

    async fn record_activity(&self, activity: &Activity) -> Result<()>;
}
