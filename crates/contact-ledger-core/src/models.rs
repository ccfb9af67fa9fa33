//! Core data models for the ingestion and export pipelines.
//!
//! [`CanonicalRecord`] itself is generated in [`crate::schema`]; this module
//! holds everything built around it: stored records, upsert outcomes,
//! upload reports, export snapshots, activity events and projected rows.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

pub use crate::schema::{CanonicalField, CanonicalRecord, ExportField};

/// Raw header → value mapping for one input row, in source column order.
pub type RawRow = Vec<(String, String)>;

/// Who triggered an ingestion or export. Anonymous callers are recorded as
/// `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "userId")]
    pub id: Option<String>,
    pub username: String,
}

impl Actor {
    pub fn new(id: Option<String>, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            id: None,
            username: "unknown".to_string(),
        }
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// A canonical record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub record: CanonicalRecord,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredRecord {
    /// Project onto `fields`, in that order. Timestamps render as ISO-8601.
    pub fn project(&self, fields: &[ExportField]) -> ProjectedRecord {
        let values = fields
            .iter()
            .map(|f| (f.name().to_string(), self.value(*f)))
            .collect();
        ProjectedRecord { values }
    }

    pub fn value(&self, field: ExportField) -> String {
        match field {
            ExportField::Id => self.id.clone(),
            ExportField::Field(c) => self.record.get(c).to_string(),
            ExportField::CreatedAt => format_ts_iso(self.created_at),
            ExportField::UpdatedAt => format_ts_iso(self.updated_at),
        }
    }
}

/// An ordered `name → value` row. Serializes as a JSON object whose keys
/// keep projection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectedRecord {
    pub values: Vec<(String, String)>,
}

impl ProjectedRecord {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut String> {
        self.values
            .iter_mut()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn cells(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(_, v)| v.as_str())
    }
}

impl Serialize for ProjectedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (k, v) in &self.values {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Per-row result of the bulk upsert, tagged by what the store actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted { id: String, keyless: bool },
    Updated { id: String },
}

/// Counts derived from tagged [`UpsertOutcome`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Inserted rows that carried no natural key. Included in `inserted`.
    pub keyless: u64,
}

impl UpsertSummary {
    pub fn from_outcomes(outcomes: &[UpsertOutcome]) -> Self {
        let mut summary = UpsertSummary {
            processed: outcomes.len() as u64,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                UpsertOutcome::Inserted { keyless, .. } => {
                    summary.inserted += 1;
                    if *keyless {
                        summary.keyless += 1;
                    }
                }
                UpsertOutcome::Updated { .. } => summary.updated += 1,
            }
        }
        summary
    }
}

/// A natural key that occurs more than once in one uploaded batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFileDuplicate {
    #[serde(rename = "EmailID")]
    pub email_id: String,
    pub count: u64,
}

/// Immutable audit record of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub id: String,
    #[serde(flatten)]
    pub actor: Actor,
    pub filename: String,
    pub source_sha256: String,
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub keyless: u64,
    pub duplicates_in_file: Vec<InFileDuplicate>,
    pub duplicates_existing: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Declared output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<ExportFormat> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "xlsx" => Some(ExportFormat::Xlsx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// Frozen description of one export. `item_ids` is the source of truth for
/// what the export contained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    pub id: String,
    #[serde(flatten)]
    pub actor: Actor,
    pub format: ExportFormat,
    pub fields: Vec<String>,
    pub filters: serde_json::Value,
    pub total: u64,
    pub item_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// What an [`Activity`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    UploadFile,
    ExportRecords,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::UploadFile => "UPLOAD_FILE",
            ActivityKind::ExportRecords => "EXPORT_RECORDS",
        }
    }
}

/// Append-only audit event. Written best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(flatten)]
    pub actor: Actor,
    pub action: ActivityKind,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_tagged_outcomes() {
        let outcomes = vec![
            UpsertOutcome::Inserted {
                id: "1".into(),
                keyless: false,
            },
            UpsertOutcome::Inserted {
                id: "2".into(),
                keyless: true,
            },
            UpsertOutcome::Updated { id: "3".into() },
        ];
        let summary = UpsertSummary::from_outcomes(&outcomes);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.keyless, 1);
    }

    #[test]
    fn projected_record_serializes_in_projection_order() {
        let row = ProjectedRecord {
            values: vec![
                ("LastName".into(), "Lovelace".into()),
                ("FirstName".into(), "Ada".into()),
            ],
        };
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"LastName":"Lovelace","FirstName":"Ada"}"#);
    }

    #[test]
    fn projection_renders_pseudo_fields() {
        let stored = StoredRecord {
            id: "abc".into(),
            record: CanonicalRecord {
                city: "Paris".into(),
                ..Default::default()
            },
            created_at: 0,
            updated_at: 86_400,
        };
        let row = stored.project(&[
            ExportField::Id,
            ExportField::Field(CanonicalField::City),
            ExportField::UpdatedAt,
        ]);
        assert_eq!(row.get("_id"), Some("abc"));
        assert_eq!(row.get("City"), Some("Paris"));
        assert_eq!(row.get("updatedAt"), Some("1970-01-02T00:00:00Z"));
    }

    #[test]
    fn export_format_parses_case_insensitively() {
        assert_eq!(ExportFormat::parse("XLSX"), Some(ExportFormat::Xlsx));
        assert_eq!(ExportFormat::parse("json"), None);
    }
}
