//! Upload reports and audit activities.
//!
//! Both are written after the data has been committed, and neither write
//! can fail the run that produced it: a failed report degrades to a `None`
//! report id, a failed activity is only logged.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::dedup::DuplicateReport;
use crate::error::{LedgerError, Result};
use crate::models::{Activity, ActivityKind, Actor, UploadReport, UpsertSummary};
use crate::store::RecordStore;

/// Where an ingested batch came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub actor: Actor,
    /// Original filename as supplied by the caller.
    pub filename: String,
    /// Hex SHA-256 of the uploaded bytes.
    pub source_sha256: String,
}

/// Everything one ingestion run learned about its batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub summary: UpsertSummary,
    pub duplicates: DuplicateReport,
}

/// Persist one [`UploadReport`] for the run, then one `UPLOAD_FILE` activity.
///
/// Returns the report id, or `None` when the report could not be stored.
pub async fn record_upload(
    store: &dyn RecordStore,
    stats: &RunStats,
    source: &UploadSource,
) -> Option<String> {
    let report = UploadReport {
        id: Uuid::new_v4().to_string(),
        actor: source.actor.clone(),
        filename: source.filename.clone(),
        source_sha256: source.source_sha256.clone(),
        processed: stats.summary.processed,
        inserted: stats.summary.inserted,
        updated: stats.summary.updated,
        keyless: stats.summary.keyless,
        duplicates_in_file: stats.duplicates.in_file.clone(),
        duplicates_existing: stats.duplicates.existing.clone(),
        created_at: Utc::now(),
    };

    let report_id = match store.insert_upload_report(&report).await {
        Ok(()) => Some(report.id.clone()),
        Err(e) => {
            tracing::warn!(filename = %source.filename, error = %e, "failed to persist upload report");
            None
        }
    };

    log_activity(
        store,
        &source.actor,
        ActivityKind::UploadFile,
        serde_json::json!({
            "filename": source.filename,
            "reportId": report_id,
            "processed": stats.summary.processed,
            "inserted": stats.summary.inserted,
            "updated": stats.summary.updated,
        }),
    )
    .await;

    report_id
}

/// Append an activity. Failures are logged and swallowed.
pub async fn log_activity(store: &dyn RecordStore, actor: &Actor, action: ActivityKind, meta: Value) {
    let activity = Activity {
        id: Uuid::new_v4().to_string(),
        actor: actor.clone(),
        action,
        meta,
        created_at: Utc::now(),
    };
    if let Err(e) = store.record_activity(&activity).await {
        tracing::warn!(action = action.as_str(), error = %e, "failed to record activity");
    }
}

pub async fn get_report(store: &dyn RecordStore, id: &str) -> Result<UploadReport> {
    store
        .get_upload_report(id)
        .await?
        .ok_or_else(|| LedgerError::ReportNotFound(id.to_string()))
}
