//! Batch ingestion: normalize, detect duplicates, upsert, report.
//!
//! ```text
//! raw rows ─▶ normalize ─▶ detect duplicates ─▶ bulk upsert ─▶ upload report
//!                              (before write)     (atomic)      (best-effort)
//! ```
//!
//! Duplicate detection runs against the store as it was before the batch,
//! so `duplicatesExistingCount` never counts keys the batch itself added.

use serde::Serialize;

use crate::dedup::detect_duplicates;
use crate::error::Result;
use crate::models::{RawRow, UpsertSummary};
use crate::normalize::normalize_rows;
use crate::report::{record_upload, RunStats, UploadSource};
use crate::store::RecordStore;

/// Result of one ingestion run, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub keyless: u64,
    /// `None` when the report could not be persisted.
    pub report_id: Option<String>,
    pub duplicates_in_file_count: u64,
    pub duplicates_existing_count: u64,
}

pub async fn ingest_rows(
    store: &dyn RecordStore,
    rows: &[RawRow],
    source: &UploadSource,
) -> Result<IngestSummary> {
    let batch = normalize_rows(rows);
    let duplicates = detect_duplicates(store, &batch).await?;

    let outcomes = store.bulk_upsert(&batch).await?;
    let summary = UpsertSummary::from_outcomes(&outcomes);
    tracing::info!(
        filename = %source.filename,
        processed = summary.processed,
        inserted = summary.inserted,
        updated = summary.updated,
        keyless = summary.keyless,
        "batch applied"
    );

    let stats = RunStats {
        summary,
        duplicates,
    };
    let report_id = record_upload(store, &stats, source).await;

    Ok(IngestSummary {
        processed: summary.processed,
        inserted: summary.inserted,
        updated: summary.updated,
        keyless: summary.keyless,
        report_id,
        duplicates_in_file_count: stats.duplicates.in_file.len() as u64,
        duplicates_existing_count: stats.duplicates.existing.len() as u64,
    })
}
