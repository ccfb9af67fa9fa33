//! SQLite-backed [`RecordStore`] implementation.
//!
//! Column names in every generated statement come from
//! [`CanonicalField::column`], never from request input; filter values are
//! always bound as parameters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Arguments, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use contact_ledger_core::error::{LedgerError, Result};
use contact_ledger_core::filter::{FilterSpec, MatchOp};
use contact_ledger_core::models::{
    Activity, Actor, CanonicalRecord, ExportFormat, ExportSnapshot, StoredRecord, UploadReport,
    UpsertOutcome,
};
use contact_ledger_core::schema::{CanonicalField, SEARCHABLE_FIELDS};
use contact_ledger_core::store::RecordStore;

/// Keys or ids bound per `IN (...)` statement.
const LOOKUP_CHUNK: usize = 500;

/// SQLite implementation of the [`RecordStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> LedgerError {
    LedgerError::storage(e)
}

/// SQL expression for a field's value, with keyless rows reading as `""`.
fn value_expr(field: CanonicalField) -> String {
    if field == CanonicalField::EmailId {
        "COALESCE(email_id, '')".to_string()
    } else {
        field.column().to_string()
    }
}

fn record_columns() -> String {
    CanonicalField::ALL
        .iter()
        .map(|f| f.column())
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn add<'q, T>(args: &mut SqliteArguments<'q>, value: T) -> Result<()>
where
    T: 'q + sqlx::Encode<'q, Sqlite> + sqlx::Type<Sqlite>,
{
    args.add(value).map_err(LedgerError::storage)
}

/// Translate a [`FilterSpec`] into a `WHERE` clause (possibly empty) and its
/// bound arguments.
fn filter_clause(filter: &FilterSpec) -> Result<(String, SqliteArguments<'static>)> {
    let mut clauses: Vec<String> = Vec::new();
    let mut args = SqliteArguments::default();

    if let Some(term) = &filter.search {
        let pattern = escape_like(&term.to_ascii_lowercase());
        let ors: Vec<String> = SEARCHABLE_FIELDS
            .iter()
            .map(|f| format!("lower({}) LIKE ? ESCAPE '\\'", value_expr(*f)))
            .collect();
        for _ in SEARCHABLE_FIELDS {
            add(&mut args, pattern.clone())?;
        }
        clauses.push(format!("({})", ors.join(" OR ")));
    }

    for ff in &filter.fields {
        let expr = value_expr(ff.field);
        match &ff.op {
            MatchOp::Equals(v) => {
                clauses.push(format!("{} = ?", expr));
                add(&mut args, v.clone())?;
            }
            MatchOp::Contains(v) => {
                clauses.push(format!("lower({}) LIKE ? ESCAPE '\\'", expr));
                add(&mut args, escape_like(&v.to_ascii_lowercase()))?;
            }
            MatchOp::OneOf(vs) => {
                clauses.push(format!("lower({}) IN ({})", expr, placeholders(vs.len())));
                for v in vs {
                    add(&mut args, v.to_ascii_lowercase())?;
                }
            }
        }
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    Ok((clause, args))
}

fn row_to_record(row: &SqliteRow) -> Result<StoredRecord> {
    let mut record = CanonicalRecord::default();
    for field in CanonicalField::ALL {
        let value = if *field == CanonicalField::EmailId {
            row.try_get::<Option<String>, _>(field.column())
                .map_err(db_err)?
                .unwrap_or_default()
        } else {
            row.try_get::<String, _>(field.column()).map_err(db_err)?
        };
        *record.get_mut(*field) = value;
    }
    Ok(StoredRecord {
        id: row.try_get("id").map_err(db_err)?,
        record,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn actor_from_row(row: &SqliteRow) -> Result<Actor> {
    Ok(Actor {
        id: row.try_get("user_id").map_err(db_err)?,
        username: row.try_get("username").map_err(db_err)?,
    })
}

fn row_to_snapshot(row: &SqliteRow) -> Result<ExportSnapshot> {
    let format: String = row.try_get("format").map_err(db_err)?;
    let fields_json: String = row.try_get("fields_json").map_err(db_err)?;
    let filters_json: String = row.try_get("filters_json").map_err(db_err)?;
    let ids_json: String = row.try_get("item_ids_json").map_err(db_err)?;
    Ok(ExportSnapshot {
        id: row.try_get("id").map_err(db_err)?,
        actor: actor_from_row(row)?,
        format: ExportFormat::parse(&format)
            .ok_or_else(|| LedgerError::Storage(format!("unknown stored format '{}'", format)))?,
        fields: serde_json::from_str(&fields_json)?,
        filters: serde_json::from_str(&filters_json)?,
        total: row.try_get::<i64, _>("total").map_err(db_err)? as u64,
        item_ids: serde_json::from_str(&ids_json)?,
        created_at: from_millis(row.try_get("created_at").map_err(db_err)?),
    })
}

/// Apply `batch` row by row on a connection that holds an open transaction.
async fn upsert_rows(
    conn: &mut SqliteConnection,
    batch: &[CanonicalRecord],
) -> Result<Vec<UpsertOutcome>> {
    let now = Utc::now().timestamp();
    let columns = record_columns();
    let insert_sql = format!(
        "INSERT INTO records (id, {}, created_at, updated_at) VALUES (?, {}, ?, ?)",
        columns,
        placeholders(CanonicalField::ALL.len())
    );
    let update_sql = format!(
        "UPDATE records SET {}, updated_at = ? WHERE id = ?",
        CanonicalField::ALL
            .iter()
            .map(|f| format!("{} = ?", f.column()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut outcomes = Vec::with_capacity(batch.len());

    for record in batch {
        let key = record.natural_key().map(str::to_string);

        // Check if the key is already stored (including earlier rows of this batch)
        let existing_id: Option<String> = match &key {
            Some(k) => sqlx::query_scalar("SELECT id FROM records WHERE email_id = ?")
                .bind(k)
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_err)?,
            None => None,
        };

        match existing_id {
            Some(id) => {
                let mut query = sqlx::query(&update_sql);
                for field in CanonicalField::ALL {
                    query = if *field == CanonicalField::EmailId {
                        query.bind(key.clone())
                    } else {
                        query.bind(record.get(*field).to_string())
                    };
                }
                query
                    .bind(now)
                    .bind(&id)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
                outcomes.push(UpsertOutcome::Updated { id });
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let mut query = sqlx::query(&insert_sql).bind(&id);
                for field in CanonicalField::ALL {
                    query = if *field == CanonicalField::EmailId {
                        query.bind(key.clone())
                    } else {
                        query.bind(record.get(*field).to_string())
                    };
                }
                query
                    .bind(now)
                    .bind(now)
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
                outcomes.push(UpsertOutcome::Inserted {
                    id,
                    keyless: key.is_none(),
                });
            }
        }
    }

    Ok(outcomes)
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn existing_keys(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT email_id FROM records WHERE email_id IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query_scalar::<_, String>(&sql);
            for key in chunk {
                query = query.bind(key);
            }
            found.extend(query.fetch_all(&self.pool).await.map_err(db_err)?);
        }
        Ok(found)
    }

    async fn bulk_upsert(&self, batch: &[CanonicalRecord]) -> Result<Vec<UpsertOutcome>> {
        // IMMEDIATE takes the write lock up front, so overlapping imports
        // wait on the busy timeout instead of failing on a stale snapshot.
        // Dropping the transaction on any error path rolls it back.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(db_err)?;
        let outcomes = upsert_rows(&mut *tx, batch).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(outcomes)
    }

    async fn query_records(&self, filter: &FilterSpec) -> Result<Vec<StoredRecord>> {
        let (clause, args) = filter_clause(filter)?;
        let sql = format!(
            "SELECT id, {}, created_at, updated_at FROM records {} ORDER BY rowid ASC",
            record_columns(),
            clause
        );
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT id, {}, created_at, updated_at FROM records WHERE id IN ({})",
                record_columns(),
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
            for row in &rows {
                records.push(row_to_record(row)?);
            }
        }
        Ok(records)
    }

    async fn insert_upload_report(&self, report: &UploadReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_reports (id, user_id, username, filename, source_sha256,
                                        processed, inserted, updated, keyless,
                                        duplicates_in_file_json, duplicates_existing_json,
                                        created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.actor.id)
        .bind(&report.actor.username)
        .bind(&report.filename)
        .bind(&report.source_sha256)
        .bind(report.processed as i64)
        .bind(report.inserted as i64)
        .bind(report.updated as i64)
        .bind(report.keyless as i64)
        .bind(serde_json::to_string(&report.duplicates_in_file)?)
        .bind(serde_json::to_string(&report.duplicates_existing)?)
        .bind(report.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_upload_report(&self, id: &str) -> Result<Option<UploadReport>> {
        let row = sqlx::query("SELECT * FROM upload_reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let in_file: String = row.try_get("duplicates_in_file_json").map_err(db_err)?;
        let existing: String = row.try_get("duplicates_existing_json").map_err(db_err)?;
        Ok(Some(UploadReport {
            id: row.try_get("id").map_err(db_err)?,
            actor: actor_from_row(&row)?,
            filename: row.try_get("filename").map_err(db_err)?,
            source_sha256: row.try_get("source_sha256").map_err(db_err)?,
            processed: row.try_get::<i64, _>("processed").map_err(db_err)? as u64,
            inserted: row.try_get::<i64, _>("inserted").map_err(db_err)? as u64,
            updated: row.try_get::<i64, _>("updated").map_err(db_err)? as u64,
            keyless: row.try_get::<i64, _>("keyless").map_err(db_err)? as u64,
            duplicates_in_file: serde_json::from_str(&in_file)?,
            duplicates_existing: serde_json::from_str(&existing)?,
            created_at: from_millis(row.try_get("created_at").map_err(db_err)?),
        }))
    }

    async fn insert_snapshot(&self, snapshot: &ExportSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO export_snapshots (id, user_id, username, format, fields_json,
                                          filters_json, total, item_ids_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.actor.id)
        .bind(&snapshot.actor.username)
        .bind(snapshot.format.as_str())
        .bind(serde_json::to_string(&snapshot.fields)?)
        .bind(serde_json::to_string(&snapshot.filters)?)
        .bind(snapshot.total as i64)
        .bind(serde_json::to_string(&snapshot.item_ids)?)
        .bind(snapshot.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_snapshot(&self, id: &str) -> Result<Option<ExportSnapshot>> {
        let row = sqlx::query("SELECT * FROM export_snapshots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_snapshot).transpose()
    }

    async fn list_snapshots(
        &self,
        username: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<ExportSnapshot>, u64)> {
        let (clause, total) = match username {
            Some(u) => (
                "WHERE username = ?",
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM export_snapshots WHERE username = ?",
                )
                .bind(u)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?,
            ),
            None => (
                "",
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM export_snapshots")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_err)?,
            ),
        };

        let sql = format!(
            "SELECT * FROM export_snapshots {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            clause
        );
        let mut query = sqlx::query(&sql);
        if let Some(u) = username {
            query = query.bind(u);
        }
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let items = rows
            .iter()
            .map(row_to_snapshot)
            .collect::<Result<Vec<_>>>()?;
        Ok((items, total as u64))
    }

    async fn record_activity(&self, activity: &Activity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, user_id, username, action, meta_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&activity.id)
        .bind(&activity.actor.id)
        .bind(&activity.actor.username)
        .bind(activity.action.as_str())
        .bind(serde_json::to_string(&activity.meta)?)
        .bind(activity.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
