//! The canonical contact schema.
//!
//! Every stored record has the same fixed set of string attributes. The
//! `canonical_fields!` table below is the single source of truth for:
//!
//! - the wire name of each field (CSV/XLSX headers, JSON keys),
//! - the SQLite column name,
//! - the human-readable header aliases accepted on ingest, in priority order.
//!
//! Projection for export and snapshot replay works in terms of
//! [`ExportField`], which adds the three store-managed pseudo-fields
//! (`_id`, `createdAt`, `updatedAt`) to the canonical set.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

macro_rules! canonical_fields {
    ($( $variant:ident => $field:ident, $wire:literal, [$($alias:literal),*]; )+) => {
        /// One attribute of the canonical schema. The set is closed: filters,
        /// projections and SQL column names can only ever name these.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum CanonicalField {
            $( #[serde(rename = $wire)] $variant, )+
        }

        impl CanonicalField {
            /// All fields in declaration (storage) order.
            pub const ALL: &'static [CanonicalField] = &[$( CanonicalField::$variant, )+];

            /// Wire name, e.g. `"EmailID"`.
            pub fn name(self) -> &'static str {
                match self {
                    $( CanonicalField::$variant => $wire, )+
                }
            }

            /// SQLite column name, e.g. `"email_id"`.
            pub fn column(self) -> &'static str {
                match self {
                    $( CanonicalField::$variant => stringify!($field), )+
                }
            }

            /// Human-readable header spellings accepted after the wire name.
            pub fn aliases(self) -> &'static [&'static str] {
                match self {
                    $( CanonicalField::$variant => &[$( $alias ),*], )+
                }
            }
        }

        /// A contact entity. Every attribute is a possibly-empty string;
        /// absence is always represented as `""`.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct CanonicalRecord {
            $( #[serde(rename = $wire, default)] pub $field: String, )+
        }

        impl CanonicalRecord {
            pub fn get(&self, field: CanonicalField) -> &str {
                match field {
                    $( CanonicalField::$variant => &self.$field, )+
                }
            }

            pub fn get_mut(&mut self, field: CanonicalField) -> &mut String {
                match field {
                    $( CanonicalField::$variant => &mut self.$field, )+
                }
            }
        }
    };
}

canonical_fields! {
    FirstName => first_name, "FirstName", ["First Name"];
    LastName => last_name, "LastName", ["Last Name"];
    JobTitle => job_title, "JobTitle", ["Job Title"];
    JobFunction => job_function, "JobFunction", ["Job Function"];
    Level => level, "Level", [];
    Dept => dept, "Dept", ["Department"];
    EmailId => email_id, "EmailID", ["Email ID"];
    CompanyNumber => company_number, "CompanyNumber", ["Company Number"];
    DirectNumber => direct_number, "DirectNumber", ["Direct Number"];
    CompanyName => company_name, "CompanyName", ["Company Name"];
    Address1 => address1, "Address1", ["Address 1"];
    Address2 => address2, "Address2", ["Address 2"];
    City => city, "City", [];
    State => state, "State", [];
    PostalCode => postal_code, "PostalCode", ["Postal Code"];
    Country => country, "Country", [];
    ActiveEmployeeSize => active_employee_size, "ActiveEmployeeSize", ["Active Employee Size"];
    EmployeeSize => employee_size, "EmployeeSize", ["Employee Size"];
    Industry => industry, "Industry", [];
    MainIndustry => main_industry, "MainIndustry", ["Main Industry"];
    SubIndustry => sub_industry, "SubIndustry", ["Sub Industry"];
    WebsiteLink => website_link, "WebsiteLink", ["Website Link"];
    RevenueSize => revenue_size, "RevenueSize", ["Revenue Size"];
    EmployeeLink => employee_link, "EmployeeLink", ["Employee Link"];
    CompanyLink => company_link, "CompanyLink", ["Company Link"];
}

impl CanonicalField {
    /// Parse a wire name. Case-sensitive, like the headers themselves.
    pub fn parse(name: &str) -> Option<CanonicalField> {
        CanonicalField::ALL.iter().copied().find(|f| f.name() == name)
    }
}

impl CanonicalRecord {
    /// The natural key, or `None` for keyless records.
    pub fn natural_key(&self) -> Option<&str> {
        if self.email_id.is_empty() {
            None
        } else {
            Some(&self.email_id)
        }
    }
}

/// Fields replaced by the sentinel outside of export context.
pub const SENSITIVE_FIELDS: &[CanonicalField] = &[
    CanonicalField::EmailId,
    CanonicalField::DirectNumber,
    CanonicalField::CompanyNumber,
];

/// Fields the free-text search term is matched against.
pub const SEARCHABLE_FIELDS: &[CanonicalField] = &[
    CanonicalField::FirstName,
    CanonicalField::LastName,
    CanonicalField::EmailId,
    CanonicalField::CompanyName,
    CanonicalField::JobTitle,
    CanonicalField::JobFunction,
];

/// Column order of a default export, between `_id` and the timestamps.
pub const EXPORT_FIELD_ORDER: &[CanonicalField] = &[
    CanonicalField::FirstName,
    CanonicalField::LastName,
    CanonicalField::EmailId,
    CanonicalField::JobTitle,
    CanonicalField::Level,
    CanonicalField::JobFunction,
    CanonicalField::Dept,
    CanonicalField::CompanyNumber,
    CanonicalField::DirectNumber,
    CanonicalField::CompanyName,
    CanonicalField::Address1,
    CanonicalField::Address2,
    CanonicalField::City,
    CanonicalField::State,
    CanonicalField::PostalCode,
    CanonicalField::Country,
    CanonicalField::ActiveEmployeeSize,
    CanonicalField::EmployeeSize,
    CanonicalField::Industry,
    CanonicalField::MainIndustry,
    CanonicalField::SubIndustry,
    CanonicalField::WebsiteLink,
    CanonicalField::RevenueSize,
    CanonicalField::EmployeeLink,
    CanonicalField::CompanyLink,
];

/// A projectable column: a canonical field or a store-managed pseudo-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportField {
    Id,
    Field(CanonicalField),
    CreatedAt,
    UpdatedAt,
}

impl ExportField {
    pub fn name(self) -> &'static str {
        match self {
            ExportField::Id => "_id",
            ExportField::Field(f) => f.name(),
            ExportField::CreatedAt => "createdAt",
            ExportField::UpdatedAt => "updatedAt",
        }
    }

    pub fn parse(name: &str) -> Option<ExportField> {
        match name {
            "_id" => Some(ExportField::Id),
            "createdAt" => Some(ExportField::CreatedAt),
            "updatedAt" => Some(ExportField::UpdatedAt),
            other => CanonicalField::parse(other).map(ExportField::Field),
        }
    }
}

/// `_id`, the canonical export ordering, then `createdAt` and `updatedAt`.
pub fn default_export_fields() -> Vec<ExportField> {
    let mut fields = Vec::with_capacity(EXPORT_FIELD_ORDER.len() + 3);
    fields.push(ExportField::Id);
    fields.extend(EXPORT_FIELD_ORDER.iter().copied().map(ExportField::Field));
    fields.push(ExportField::CreatedAt);
    fields.push(ExportField::UpdatedAt);
    fields
}

/// Resolve a caller's field list into a projection.
///
/// `None` or an all-blank list yields [`default_export_fields`]. An explicit
/// list is kept exactly as given (order preserved, repeated names collapsed
/// to their first occurrence); unknown names are rejected.
pub fn resolve_export_fields(requested: Option<&[String]>) -> Result<Vec<ExportField>> {
    let names: Vec<&str> = requested
        .unwrap_or(&[])
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if names.is_empty() {
        return Ok(default_export_fields());
    }

    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        let field = ExportField::parse(name)
            .ok_or_else(|| LedgerError::invalid(format!("unknown export field: '{}'", name)))?;
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    Ok(fields)
}

/// Split a comma-separated field list as it arrives from a query string or CLI flag.
pub fn split_field_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn field_names(fields: &[ExportField]) -> Vec<String> {
    fields.iter().map(|f| f.name().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_parse() {
        for field in CanonicalField::ALL {
            assert_eq!(CanonicalField::parse(field.name()), Some(*field));
        }
        assert_eq!(CanonicalField::ALL.len(), 25);
    }

    #[test]
    fn export_order_covers_every_canonical_field_once() {
        let mut sorted = EXPORT_FIELD_ORDER.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), CanonicalField::ALL.len());
    }

    #[test]
    fn default_fields_put_id_first_and_timestamps_last() {
        let names = field_names(&default_export_fields());
        assert_eq!(names.first().map(String::as_str), Some("_id"));
        assert_eq!(&names[names.len() - 2..], &["createdAt", "updatedAt"]);
    }

    #[test]
    fn explicit_fields_are_kept_verbatim() {
        let requested = vec!["LastName".to_string(), "City".to_string()];
        let fields = resolve_export_fields(Some(&requested)).unwrap();
        assert_eq!(field_names(&fields), vec!["LastName", "City"]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let requested = vec!["Password".to_string()];
        let err = resolve_export_fields(Some(&requested)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRequest(_)));
    }

    #[test]
    fn blank_field_list_falls_back_to_default() {
        let requested = vec![" ".to_string(), String::new()];
        let fields = resolve_export_fields(Some(&requested)).unwrap();
        assert_eq!(fields, default_export_fields());
    }

    #[test]
    fn record_serializes_with_wire_names() {
        let record = CanonicalRecord {
            email_id: "a@x.io".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["EmailID"], "a@x.io");
        assert_eq!(json["Address1"], "");
    }
}
