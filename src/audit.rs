//! CLI views over the audit trail: upload reports and export snapshots.
//!
//! Snapshot items are replayed with the same redaction as the HTTP API.

use anyhow::Result;

use contact_ledger_core::models::{ExportSnapshot, UploadReport};
use contact_ledger_core::report::get_report;
use contact_ledger_core::snapshot::{get_snapshot, list_snapshots, replay_snapshot, PageRequest};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

pub async fn run_report(config: &Config, id: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let report = get_report(&store, id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    store.pool().close().await;
    Ok(())
}

fn print_report(report: &UploadReport) {
    println!("report {}", report.id);
    println!("  file: {} (sha256 {})", report.filename, report.source_sha256);
    println!("  by: {}", report.actor.username);
    println!("  at: {}", report.created_at.to_rfc3339());
    println!(
        "  processed: {}  inserted: {}  updated: {}  keyless: {}",
        report.processed, report.inserted, report.updated, report.keyless
    );
    if !report.duplicates_in_file.is_empty() {
        println!("  duplicates in file:");
        for d in &report.duplicates_in_file {
            println!("    {} x{}", d.email_id, d.count);
        }
    }
    if !report.duplicates_existing.is_empty() {
        println!("  already stored: {}", report.duplicates_existing.len());
    }
}

pub async fn run_snapshot_list(
    config: &Config,
    username: Option<&str>,
    page: u64,
    limit: Option<u64>,
    json: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let request = PageRequest {
        page,
        limit: limit.unwrap_or(config.export.default_page_size),
    };
    let list = list_snapshots(&store, username, request, config.export.max_page_size).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        println!(
            "  {:<36} {:<16} {:<6} {:>8}   {}",
            "SNAPSHOT", "USER", "FORMAT", "TOTAL", "CREATED"
        );
        println!("  {}", "-".repeat(90));
        for s in &list.items {
            println!(
                "  {:<36} {:<16} {:<6} {:>8}   {}",
                s.id,
                s.actor.username,
                s.format.as_str(),
                s.total,
                s.created_at.format("%Y-%m-%d %H:%M")
            );
        }
        println!();
        println!("  page {} of {} ({} total)", list.page, list.pages, list.total);
    }
    store.pool().close().await;
    Ok(())
}

pub async fn run_snapshot_show(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let snapshot: ExportSnapshot = get_snapshot(&store, id).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    store.pool().close().await;
    Ok(())
}

pub async fn run_snapshot_items(
    config: &Config,
    id: &str,
    page: u64,
    limit: Option<u64>,
) -> Result<()> {
    let store = open_store(config).await?;
    let request = PageRequest {
        page,
        limit: limit.unwrap_or(config.export.default_page_size),
    };
    let page = replay_snapshot(&store, id, request, config.export.max_page_size).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    store.pool().close().await;
    Ok(())
}
