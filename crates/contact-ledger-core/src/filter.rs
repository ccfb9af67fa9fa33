//! Typed filter specification for record queries.
//!
//! Filters name fields through the closed [`CanonicalField`] enum and use one
//! of three operators, so a request can never reach an arbitrary column.
//! Stores translate a [`FilterSpec`] into their own query language; the
//! in-memory store evaluates [`FilterSpec::matches`] directly.
//!
//! All string comparison is ASCII case-insensitive except [`MatchOp::Equals`],
//! which is exact.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::CanonicalRecord;
use crate::schema::{CanonicalField, SEARCHABLE_FIELDS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "camelCase")]
pub enum MatchOp {
    /// Exact, case-sensitive equality.
    Equals(String),
    /// Case-insensitive substring.
    Contains(String),
    /// Case-insensitive equality with any of the values.
    OneOf(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: CanonicalField,
    pub op: MatchOp,
}

/// A validated query: optional free-text search AND every field filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldFilter>,
}

impl FilterSpec {
    /// Build from loosely typed request parameters.
    ///
    /// Value syntax: `=v` is [`MatchOp::Equals`], `a,b` is [`MatchOp::OneOf`],
    /// anything else is [`MatchOp::Contains`]. Blank values are skipped.
    /// Unknown field names are rejected.
    pub fn from_params<I, K, V>(search: Option<&str>, params: I) -> Result<FilterSpec>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut fields = Vec::new();
        for (key, value) in params {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            if value.is_empty() {
                continue;
            }
            let field = CanonicalField::parse(key)
                .ok_or_else(|| LedgerError::invalid(format!("unknown filter field: '{}'", key)))?;
            fields.push(FieldFilter {
                field,
                op: parse_op(value)?,
            });
        }

        Ok(FilterSpec { search, fields })
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.fields.is_empty()
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        if let Some(term) = &self.search {
            let term = term.to_ascii_lowercase();
            let hit = SEARCHABLE_FIELDS
                .iter()
                .any(|f| record.get(*f).to_ascii_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        self.fields.iter().all(|f| f.matches(record))
    }
}

impl FieldFilter {
    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        let value = record.get(self.field);
        match &self.op {
            MatchOp::Equals(v) => value == v,
            MatchOp::Contains(v) => value
                .to_ascii_lowercase()
                .contains(&v.to_ascii_lowercase()),
            MatchOp::OneOf(vs) => vs.iter().any(|v| value.eq_ignore_ascii_case(v)),
        }
    }
}

fn parse_op(value: &str) -> Result<MatchOp> {
    if let Some(exact) = value.strip_prefix('=') {
        return Ok(MatchOp::Equals(exact.to_string()));
    }
    if value.contains(',') {
        let values: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if values.is_empty() {
            return Err(LedgerError::invalid(format!(
                "filter value '{}' has no alternatives",
                value
            )));
        }
        return Ok(MatchOp::OneOf(values));
    }
    Ok(MatchOp::Contains(value.to_string()))
}
