//! Row normalization: arbitrary source headers → [`CanonicalRecord`].
//!
//! For each canonical field the wire name and then its aliases are tried in
//! order; the first header that is present with a non-blank value wins.
//! Values are trimmed. Anything unmatched becomes `""`. Unrecognized columns
//! are ignored. Normalization never fails.

use std::collections::HashMap;

use crate::models::RawRow;
use crate::schema::{CanonicalField, CanonicalRecord};

const BOM: char = '\u{feff}';

/// Normalize one raw row.
pub fn normalize_row(row: &RawRow) -> CanonicalRecord {
    let mut by_header: HashMap<&str, &str> = HashMap::with_capacity(row.len());
    for (header, value) in row {
        let header = header.trim_start_matches(BOM).trim();
        // Repeated headers: the leftmost column wins.
        by_header.entry(header).or_insert(value.as_str());
    }

    let mut record = CanonicalRecord::default();
    for field in CanonicalField::ALL {
        if let Some(value) = lookup(&by_header, *field) {
            *record.get_mut(*field) = value.to_string();
        }
    }
    record
}

/// Normalize a whole batch, preserving row order.
pub fn normalize_rows(rows: &[RawRow]) -> Vec<CanonicalRecord> {
    rows.iter().map(normalize_row).collect()
}

fn lookup<'a>(by_header: &HashMap<&str, &'a str>, field: CanonicalField) -> Option<&'a str> {
    std::iter::once(field.name())
        .chain(field.aliases().iter().copied())
        .filter_map(|name| by_header.get(name))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_headers_map_directly() {
        let r = normalize_row(&row(&[("FirstName", "Ada"), ("EmailID", "ada@x.io")]));
        assert_eq!(r.first_name, "Ada");
        assert_eq!(r.email_id, "ada@x.io");
        assert_eq!(r.city, "");
    }

    #[test]
    fn aliases_are_accepted() {
        let r = normalize_row(&row(&[
            ("First Name", "Grace"),
            ("Department", "Engineering"),
            ("Main Industry", "Software"),
            ("Employee Size", "51-200"),
        ]));
        assert_eq!(r.first_name, "Grace");
        assert_eq!(r.dept, "Engineering");
        assert_eq!(r.main_industry, "Software");
        assert_eq!(r.employee_size, "51-200");
    }

    #[test]
    fn canonical_name_takes_priority_over_alias() {
        let r = normalize_row(&row(&[("Job Title", "alias"), ("JobTitle", "canonical")]));
        assert_eq!(r.job_title, "canonical");
    }

    #[test]
    fn empty_canonical_value_falls_through_to_alias() {
        let r = normalize_row(&row(&[("LastName", "  "), ("Last Name", "Hopper")]));
        assert_eq!(r.last_name, "Hopper");
    }

    #[test]
    fn unknown_columns_are_ignored() {
        let r = normalize_row(&row(&[("Favourite Colour", "green"), ("City", "Oslo")]));
        assert_eq!(r.city, "Oslo");
        assert_eq!(
            r,
            CanonicalRecord {
                city: "Oslo".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn bom_and_padding_on_headers_are_stripped() {
        let r = normalize_row(&row(&[("\u{feff}EmailID", " a@b.c "), (" Country ", "NO")]));
        assert_eq!(r.email_id, "a@b.c");
        assert_eq!(r.country, "NO");
    }

    #[test]
    fn empty_row_yields_all_empty_strings() {
        let r = normalize_row(&Vec::new());
        for field in CanonicalField::ALL {
            assert_eq!(r.get(*field), "");
        }
    }
}
