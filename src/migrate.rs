use anyhow::Result;
use contact_ledger_core::schema::CanonicalField;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Records table: one TEXT column per canonical field
    let columns: String = CanonicalField::ALL
        .iter()
        .filter(|f| **f != CanonicalField::EmailId)
        .map(|f| format!("            {} TEXT NOT NULL DEFAULT '',\n", f.column()))
        .collect();
    let create_records = format!(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            email_id TEXT UNIQUE,
{}            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        columns
    );
    sqlx::query(&create_records).execute(pool).await?;

    // Upload reports
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_reports (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            username TEXT NOT NULL,
            filename TEXT NOT NULL,
            source_sha256 TEXT NOT NULL,
            processed INTEGER NOT NULL,
            inserted INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            keyless INTEGER NOT NULL,
            duplicates_in_file_json TEXT NOT NULL DEFAULT '[]',
            duplicates_existing_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Export snapshots
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS export_snapshots (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            username TEXT NOT NULL,
            format TEXT NOT NULL,
            fields_json TEXT NOT NULL,
            filters_json TEXT NOT NULL DEFAULT '{}',
            total INTEGER NOT NULL,
            item_ids_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Activities
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            username TEXT NOT NULL,
            action TEXT NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_username ON export_snapshots(username, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_created_at ON export_snapshots(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_activities_action ON activities(action)")
        .execute(pool)
        .await?;

    Ok(())
}
