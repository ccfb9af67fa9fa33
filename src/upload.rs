//! Upload staging and file ingestion.
//!
//! Every upload is first written to a [`StagedUpload`], a temp file that is
//! deleted when the guard drops. The guard lives for the whole run, so the
//! on-disk copy is gone afterwards whether the run succeeded or failed.
//! Rows are decoded from the in-memory bytes the copy was written from.

use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use contact_ledger_core::error::{LedgerError, Result};
use contact_ledger_core::ingest::{ingest_rows, IngestSummary};
use contact_ledger_core::models::Actor;
use contact_ledger_core::report::UploadSource;
use contact_ledger_core::store::RecordStore;

use crate::config::{Config, IngestConfig};
use crate::db;
use crate::sqlite_store::SqliteStore;
use crate::tabular::{read_rows, SourceFormat};

/// An uploaded file held on disk for the duration of one ingestion run.
pub struct StagedUpload {
    file: NamedTempFile,
    original_name: String,
    sha256: String,
}

impl StagedUpload {
    /// Write `bytes` to a new temp file in `dir` (system temp dir if `None`).
    pub fn stage(dir: Option<&Path>, original_name: &str, bytes: &[u8]) -> Result<StagedUpload> {
        let mut file = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(LedgerError::storage)?;
                NamedTempFile::new_in(dir)
            }
            None => NamedTempFile::new(),
        }
        .map_err(LedgerError::storage)?;
        file.write_all(bytes).map_err(LedgerError::storage)?;
        file.flush().map_err(LedgerError::storage)?;

        let sha256 = format!("{:x}", Sha256::digest(bytes));
        tracing::debug!(
            path = %file.path().display(),
            bytes = bytes.len(),
            "upload staged"
        );
        Ok(StagedUpload {
            file,
            original_name: original_name.to_string(),
            sha256,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        tracing::debug!(path = %self.file.path().display(), "staged upload removed");
    }
}

/// Ingest an uploaded file.
///
/// The extension is checked before anything is staged or stored. Oversized
/// uploads are refused with `InvalidRequest`.
pub async fn ingest_upload(
    store: &dyn RecordStore,
    limits: &IngestConfig,
    filename: &str,
    bytes: &[u8],
    actor: Actor,
) -> Result<IngestSummary> {
    let format = SourceFormat::from_filename(filename)?;
    if bytes.len() as u64 > limits.max_upload_bytes {
        return Err(LedgerError::invalid(format!(
            "upload is {} bytes; the limit is {}",
            bytes.len(),
            limits.max_upload_bytes
        )));
    }

    let staged = StagedUpload::stage(limits.staging_dir.as_deref(), filename, bytes)?;
    let rows = read_rows(bytes, format, limits.max_rows)?;

    let source = UploadSource {
        actor,
        filename: staged.original_name().to_string(),
        source_sha256: staged.sha256().to_string(),
    };
    ingest_rows(store, &rows, &source).await
}

/// Ingest a file from the local filesystem, e.g. for `cledger import`.
pub async fn ingest_file(
    store: &dyn RecordStore,
    limits: &IngestConfig,
    path: &Path,
    actor: Actor,
) -> anyhow::Result<IngestSummary> {
    use anyhow::Context;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());
    // Extension check comes before touching the file.
    SourceFormat::from_filename(&filename)?;

    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    Ok(ingest_upload(store, limits, &filename, &bytes, actor).await?)
}

/// Run the import command and print the ingestion summary.
pub async fn run_import(config: &Config, path: &Path, actor: Actor, json: bool) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let summary = ingest_file(&store, &config.ingest, path, actor).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("import {}", path.display());
        println!("  processed: {}", summary.processed);
        println!("  inserted: {}", summary.inserted);
        println!("  updated: {}", summary.updated);
        println!("  keyless: {}", summary.keyless);
        println!("  duplicates in file: {}", summary.duplicates_in_file_count);
        println!("  already stored: {}", summary.duplicates_existing_count);
        println!(
            "  report: {}",
            summary.report_id.as_deref().unwrap_or("(not recorded)")
        );
        println!("ok");
    }

    store.pool().close().await;
    Ok(())
}
