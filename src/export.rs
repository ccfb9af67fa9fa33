//! Filtered record export to CSV or XLSX.
//!
//! Export rows are projected in [`RedactionContext::Export`], so sensitive
//! fields leave verbatim. After the file is rendered a snapshot of the
//! exported ids is captured; a failed capture is logged and the export
//! still succeeds.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;

use contact_ledger_core::error::{LedgerError, Result};
use contact_ledger_core::filter::FilterSpec;
use contact_ledger_core::models::{Actor, ExportFormat, ProjectedRecord};
use contact_ledger_core::redact::{Redact, RedactionContext};
use contact_ledger_core::schema::{field_names, resolve_export_fields};
use contact_ledger_core::snapshot::{record_export, SnapshotCapture};
use contact_ledger_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::render::{content_type, render};
use crate::sqlite_store::SqliteStore;

/// Loosely typed export request, as received from the CLI or HTTP query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub search: Option<String>,
    /// `csv` (default) or `xlsx`.
    #[serde(default)]
    pub format: Option<String>,
    /// Explicit column list; `None` or empty selects the default projection.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Field filters as `(field, value)` pairs.
    #[serde(default)]
    pub filters: Vec<(String, String)>,
}

pub struct ExportOutput {
    pub format: ExportFormat,
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub total: u64,
    pub snapshot_id: Option<String>,
}

pub async fn export_records(
    store: &dyn RecordStore,
    request: &ExportRequest,
    actor: Actor,
) -> Result<ExportOutput> {
    let format = match request.format.as_deref().map(str::trim) {
        None | Some("") => ExportFormat::Csv,
        Some(raw) => ExportFormat::parse(raw)
            .ok_or_else(|| LedgerError::invalid(format!("unknown export format: '{}'", raw)))?,
    };
    let filter = FilterSpec::from_params(request.search.as_deref(), request.filters.iter().cloned())?;
    let fields = resolve_export_fields(request.fields.as_deref())?;
    let header = field_names(&fields);

    let records = store.query_records(&filter).await?;
    let rows: Vec<ProjectedRecord> = records
        .iter()
        .map(|r| r.project(&fields).redact(RedactionContext::Export))
        .collect();
    let bytes = render(format, &header, &rows)?;

    let snapshot_id = record_export(
        store,
        SnapshotCapture {
            actor,
            format,
            fields: &fields,
            filter: &filter,
            records: &records,
        },
    )
    .await;

    tracing::info!(
        total = records.len(),
        format = format.as_str(),
        snapshot_id = snapshot_id.as_deref().unwrap_or("-"),
        "export complete"
    );

    Ok(ExportOutput {
        format,
        content_type: content_type(format),
        filename: format!(
            "records-{}.{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            format.as_str()
        ),
        bytes,
        total: records.len() as u64,
        snapshot_id,
    })
}

/// Run the export command: write the file to `output` (or the generated
/// name in the current directory) and print a summary.
pub async fn run_export(
    config: &Config,
    request: &ExportRequest,
    actor: Actor,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let out = export_records(&store, request, actor).await?;

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&out.filename));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&path, &out.bytes)
        .with_context(|| format!("Failed to write export file: {}", path.display()))?;

    println!("export {}", path.display());
    println!("  format: {}", out.format.as_str());
    println!("  records: {}", out.total);
    println!(
        "  snapshot: {}",
        out.snapshot_id.as_deref().unwrap_or("(not recorded)")
    );
    println!("ok");

    store.pool().close().await;
    Ok(())
}
