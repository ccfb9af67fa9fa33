//! Duplicate detection over a normalized batch.
//!
//! Both outputs are informational: neither blocks ingestion. Keyless rows
//! take no part in any of the accounting.

use std::collections::HashMap;

use crate::error::Result;
use crate::models::{CanonicalRecord, InFileDuplicate};
use crate::store::RecordStore;

/// Result of duplicate detection for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateReport {
    /// Keys occurring more than once in the batch, in first-seen order.
    pub in_file: Vec<InFileDuplicate>,
    /// Keys that were already stored before the batch was applied.
    pub existing: Vec<String>,
}

/// Distinct non-empty natural keys in first-seen order, with their counts.
fn key_counts(batch: &[CanonicalRecord]) -> Vec<(&str, u64)> {
    let mut order: Vec<(&str, u64)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for record in batch {
        let Some(key) = record.natural_key() else {
            continue;
        };
        match index.get(key) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(key, order.len());
                order.push((key, 1));
            }
        }
    }
    order
}

pub fn distinct_keys(batch: &[CanonicalRecord]) -> Vec<String> {
    key_counts(batch)
        .into_iter()
        .map(|(k, _)| k.to_string())
        .collect()
}

pub fn find_in_batch_duplicates(batch: &[CanonicalRecord]) -> Vec<InFileDuplicate> {
    key_counts(batch)
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, count)| InFileDuplicate {
            email_id: key.to_string(),
            count,
        })
        .collect()
}

/// Compute both duplicate lists. Must run before the batch is upserted.
///
/// A failed existence lookup is returned as an error: the report depends on
/// it, so ingestion does not proceed without it.
pub async fn detect_duplicates(
    store: &dyn RecordStore,
    batch: &[CanonicalRecord],
) -> Result<DuplicateReport> {
    let in_file = find_in_batch_duplicates(batch);
    let keys = distinct_keys(batch);
    let existing = if keys.is_empty() {
        Vec::new()
    } else {
        store.existing_keys(&keys).await?
    };
    tracing::debug!(
        distinct = keys.len(),
        in_file = in_file.len(),
        existing = existing.len(),
        "duplicate detection complete"
    );
    Ok(DuplicateReport { in_file, existing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn rec(email: &str) -> CanonicalRecord {
        CanonicalRecord {
            email_id: email.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn reports_repeated_keys_in_first_seen_order() {
        let batch = vec![rec("b"), rec("a"), rec("b"), rec("a"), rec("a"), rec("c")];
        let dups = find_in_batch_duplicates(&batch);
        assert_eq!(
            dups,
            vec![
                InFileDuplicate {
                    email_id: "b".into(),
                    count: 2
                },
                InFileDuplicate {
                    email_id: "a".into(),
                    count: 3
                },
            ]
        );
    }

    #[test]
    fn keyless_rows_are_not_duplicates() {
        let batch = vec![rec(""), rec(""), rec("x")];
        assert!(find_in_batch_duplicates(&batch).is_empty());
        assert_eq!(distinct_keys(&batch), vec!["x".to_string()]);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let batch = vec![rec("A@x.io"), rec("a@x.io")];
        assert!(find_in_batch_duplicates(&batch).is_empty());
    }

    #[tokio::test]
    async fn existing_keys_come_from_the_store() {
        let store = InMemoryStore::new();
        store.bulk_upsert(&[rec("a")]).await.unwrap();

        let batch = vec![rec("a"), rec("a"), rec("b")];
        let report = detect_duplicates(&store, &batch).await.unwrap();
        assert_eq!(report.in_file.len(), 1);
        assert_eq!(report.in_file[0].email_id, "a");
        assert_eq!(report.in_file[0].count, 2);
        assert_eq!(report.existing, vec!["a".to_string()]);
    }
}
