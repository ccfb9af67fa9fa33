//! Context-sensitive redaction of sensitive contact fields.
//!
//! | Context | EmailID | DirectNumber | CompanyNumber |
//! |---------|---------|--------------|---------------|
//! | [`Export`](RedactionContext::Export) | verbatim | verbatim | verbatim |
//! | [`View`](RedactionContext::View) | `NA` | `NA` | `NA` |
//!
//! Every read path that serves a non-export consumer, snapshot replay
//! included, must go through [`Redact::redact`].

use crate::models::{CanonicalRecord, ProjectedRecord};
use crate::schema::SENSITIVE_FIELDS;

/// Value substituted for sensitive fields outside of export context.
pub const REDACTED_SENTINEL: &str = "NA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionContext {
    /// File export: data is returned as stored.
    Export,
    /// Interactive views and snapshot replay.
    View,
}

pub trait Redact: Sized {
    fn redact(self, ctx: RedactionContext) -> Self;
}

impl Redact for CanonicalRecord {
    fn redact(mut self, ctx: RedactionContext) -> Self {
        if ctx == RedactionContext::View {
            for field in SENSITIVE_FIELDS {
                *self.get_mut(*field) = REDACTED_SENTINEL.to_string();
            }
        }
        self
    }
}

impl Redact for ProjectedRecord {
    /// Only fields present in the projection are touched.
    fn redact(mut self, ctx: RedactionContext) -> Self {
        if ctx == RedactionContext::View {
            for field in SENSITIVE_FIELDS {
                if let Some(v) = self.get_mut(field.name()) {
                    *v = REDACTED_SENTINEL.to_string();
                }
            }
        }
        self
    }
}
