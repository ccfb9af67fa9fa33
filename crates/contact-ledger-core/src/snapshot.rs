//! Export snapshots: capture at export time, paginated replay later.
//!
//! A snapshot freezes the ordered list of record ids an export produced and
//! the field list it was projected with. Replay re-reads those records and
//! returns them in the frozen order, masked with [`RedactionContext::View`].
//! Records deleted since the export are absent from replay pages; `total`
//! always reports the size of the original export.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::filter::FilterSpec;
use crate::models::{
    ActivityKind, Actor, ExportFormat, ExportSnapshot, ProjectedRecord, StoredRecord,
};
use crate::redact::{Redact, RedactionContext};
use crate::report::log_activity;
use crate::schema::{default_export_fields, field_names, ExportField};
use crate::store::RecordStore;

/// Inputs for [`capture_snapshot`].
pub struct SnapshotCapture<'a> {
    pub actor: Actor,
    pub format: ExportFormat,
    /// Resolved projection, in output order.
    pub fields: &'a [ExportField],
    pub filter: &'a FilterSpec,
    /// Records in the order the export emitted them.
    pub records: &'a [StoredRecord],
}

/// 1-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Reject `page < 1` / `limit < 1` and cap `limit` at `max_limit`.
    pub fn validate(self, max_limit: u64) -> Result<PageRequest> {
        if self.page < 1 {
            return Err(LedgerError::invalid("page must be >= 1"));
        }
        if self.limit < 1 {
            return Err(LedgerError::invalid("limit must be >= 1"));
        }
        Ok(PageRequest {
            page: self.page,
            limit: self.limit.min(max_limit.max(1)),
        })
    }

    fn offset(self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPage {
    pub snapshot_id: String,
    pub fields: Vec<String>,
    pub total: u64,
    pub page: u64,
    pub items: Vec<ProjectedRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotList {
    pub items: Vec<ExportSnapshot>,
    pub total: u64,
    pub page: u64,
    pub pages: u64,
}

/// Persist a snapshot of an export. The caller decides whether a failure
/// here matters; exports treat it as non-fatal.
pub async fn capture_snapshot(
    store: &dyn RecordStore,
    capture: SnapshotCapture<'_>,
) -> Result<ExportSnapshot> {
    let item_ids: Vec<String> = capture.records.iter().map(|r| r.id.clone()).collect();
    let snapshot = ExportSnapshot {
        id: Uuid::new_v4().to_string(),
        actor: capture.actor,
        format: capture.format,
        fields: field_names(capture.fields),
        filters: serde_json::to_value(capture.filter)?,
        total: item_ids.len() as u64,
        item_ids,
        created_at: Utc::now(),
    };
    store.insert_snapshot(&snapshot).await?;
    tracing::debug!(snapshot_id = %snapshot.id, total = snapshot.total, "snapshot captured");
    Ok(snapshot)
}

/// Capture a snapshot and log the `EXPORT_RECORDS` activity.
///
/// Returns the snapshot id, or `None` if the snapshot could not be stored.
pub async fn record_export(store: &dyn RecordStore, capture: SnapshotCapture<'_>) -> Option<String> {
    let actor = capture.actor.clone();
    let format = capture.format;
    let total = capture.records.len() as u64;

    let snapshot_id = match capture_snapshot(store, capture).await {
        Ok(snapshot) => Some(snapshot.id),
        Err(e) => {
            tracing::warn!(error = %e, "failed to capture export snapshot");
            None
        }
    };

    log_activity(
        store,
        &actor,
        ActivityKind::ExportRecords,
        serde_json::json!({
            "snapshotId": snapshot_id,
            "format": format.as_str(),
            "total": total,
        }),
    )
    .await;

    snapshot_id
}

pub async fn get_snapshot(store: &dyn RecordStore, id: &str) -> Result<ExportSnapshot> {
    store
        .get_snapshot(id)
        .await?
        .ok_or_else(|| LedgerError::SnapshotNotFound(id.to_string()))
}

/// One page of a snapshot's records, in captured order, redacted for viewing.
pub async fn replay_snapshot(
    store: &dyn RecordStore,
    id: &str,
    request: PageRequest,
    max_limit: u64,
) -> Result<SnapshotPage> {
    let request = request.validate(max_limit)?;
    let snapshot = get_snapshot(store, id).await?;

    let start = usize::try_from(request.offset())
        .unwrap_or(usize::MAX)
        .min(snapshot.item_ids.len());
    let end = start
        .saturating_add(request.limit as usize)
        .min(snapshot.item_ids.len());
    let page_ids = &snapshot.item_ids[start..end];

    let fetched = if page_ids.is_empty() {
        Vec::new()
    } else {
        store.fetch_records(page_ids).await?
    };
    let mut by_id: HashMap<String, StoredRecord> =
        fetched.into_iter().map(|r| (r.id.clone(), r)).collect();

    let fields = if snapshot.fields.is_empty() {
        field_names(&default_export_fields())
    } else {
        snapshot.fields.clone()
    };

    let items: Vec<ProjectedRecord> = page_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|record| project_named(&record, &fields).redact(RedactionContext::View))
        .collect();

    if items.len() < page_ids.len() {
        tracing::debug!(
            snapshot_id = %snapshot.id,
            missing = page_ids.len() - items.len(),
            "snapshot page has records that no longer exist"
        );
    }

    Ok(SnapshotPage {
        snapshot_id: snapshot.id,
        fields,
        total: snapshot.total,
        page: request.page,
        items,
    })
}

/// Snapshots newest first, optionally only those taken by `username`.
pub async fn list_snapshots(
    store: &dyn RecordStore,
    username: Option<&str>,
    request: PageRequest,
    max_limit: u64,
) -> Result<SnapshotList> {
    let request = request.validate(max_limit)?;
    let username = username.map(str::trim).filter(|u| !u.is_empty());
    let (items, total) = store
        .list_snapshots(username, request.offset(), request.limit)
        .await?;
    Ok(SnapshotList {
        items,
        total,
        page: request.page,
        pages: total.div_ceil(request.limit),
    })
}

/// Project by stored field names. Names this build no longer knows become "".
fn project_named(record: &StoredRecord, names: &[String]) -> ProjectedRecord {
    let values = names
        .iter()
        .map(|name| {
            let value = ExportField::parse(name)
                .map(|f| record.value(f))
                .unwrap_or_default();
            (name.clone(), value)
        })
        .collect();
    ProjectedRecord { values }
}
