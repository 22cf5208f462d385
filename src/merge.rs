//! Deduplication keys and the duplicate-safe merge of export records into the ledger.
//!
//! The ledger is the sole source of truth for already-known transactions. The merge never
//! writes anything; it only decides which incoming records qualify for append, preserving
//! their source order, and the caller performs the append.

use crate::error::SyncError;
use crate::model::{Mapping, Record};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Which fields identify a transaction for deduplication.
///
/// `ExternalId` is exact. `Composite` is best-effort: it cannot distinguish two genuinely
/// distinct transactions that share date, amount and description. The policy is chosen
/// deliberately per data source; when unspecified it resolves to `ExternalId` whenever the
/// source carries an identifier column, never silently falling back to the weaker composite.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Use the source's unique transaction identifier column.
    #[default]
    ExternalId,
    /// Use the (date, amount-as-original-text, description) tuple.
    Composite,
}

serde_plain::derive_display_from_serialize!(KeyPolicy);
serde_plain::derive_fromstr_from_deserialize!(KeyPolicy);

/// The derived value used to decide whether two records represent the same transaction.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum DedupKey {
    Id(String),
    Composite {
        date: String,
        amount: String,
        description: String,
    },
}

/// Derives [`DedupKey`]s from records, given the column positions of one particular header
/// mapping. Construction fails up front when the mapping lacks the columns the policy needs,
/// so a format change surfaces before any merge is attempted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KeyExtractor {
    policy: KeyPolicy,
    fields: KeyFields,
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum KeyFields {
    Id(usize),
    Composite {
        date: usize,
        amount: usize,
        description: usize,
    },
}

impl KeyExtractor {
    /// Creates an extractor for `mapping`. `policy` pins the key policy; `None` resolves it
    /// from the mapping, preferring the identifier column when one exists.
    pub fn new(mapping: &Mapping, policy: Option<KeyPolicy>) -> Result<Self> {
        let policy = match policy {
            Some(p) => p,
            None => {
                if mapping.id_index().is_some() {
                    KeyPolicy::ExternalId
                } else {
                    KeyPolicy::Composite
                }
            }
        };

        let fields = match policy {
            KeyPolicy::ExternalId => {
                let id = mapping.id_index().ok_or_else(|| {
                    SyncError::MissingKeyFields(String::from(
                        "the external_id key policy requires an identifier column \
                        ('Id' or 'Transaction ID')",
                    ))
                })?;
                KeyFields::Id(id)
            }
            KeyPolicy::Composite => {
                let mut missing = Vec::new();
                let date = mapping.date_index();
                let amount = mapping.amount_index();
                let description = mapping.description_index();
                if date.is_none() {
                    missing.push("a date column ('Date')");
                }
                if amount.is_none() {
                    missing.push("an amount column ('Amount')");
                }
                if description.is_none() {
                    missing.push("a description column ('Description' or 'Name')");
                }
                if !missing.is_empty() {
                    return Err(SyncError::MissingKeyFields(format!(
                        "the composite key policy requires {}",
                        missing.join(", ")
                    ))
                    .into());
                }
                KeyFields::Composite {
                    date: date.unwrap(),
                    amount: amount.unwrap(),
                    description: description.unwrap(),
                }
            }
        };

        Ok(Self { policy, fields })
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Derives the key for `record`, or `None` when any key component is empty for that row.
    /// Such rows are excluded from the merge entirely: neither new nor duplicate.
    pub fn extract(&self, record: &Record) -> Option<DedupKey> {
        match &self.fields {
            KeyFields::Id(ix) => {
                let id = record.text(*ix);
                if id.trim().is_empty() {
                    return None;
                }
                Some(DedupKey::Id(id.to_string()))
            }
            KeyFields::Composite {
                date,
                amount,
                description,
            } => {
                let date = record.text(*date);
                let amount = record.text(*amount);
                let description = record.text(*description);
                if date.trim().is_empty()
                    || amount.trim().is_empty()
                    || description.trim().is_empty()
                {
                    return None;
                }
                Some(DedupKey::Composite {
                    date: date.to_string(),
                    amount: amount.to_string(),
                    description: description.to_string(),
                })
            }
        }
    }
}

/// The outcome of a merge: the records that qualify for append, in source order, plus counts of
/// what was filtered out.
#[derive(Default, Debug, Clone, Eq, PartialEq)]
pub struct Merge {
    pub new_records: Vec<Record>,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Collects the keys of the records already in the ledger. Rows whose key components are
/// incomplete are left out of the set; they can never match an incoming record anyway.
pub fn existing_keys(extractor: &KeyExtractor, records: &[Record]) -> HashSet<DedupKey> {
    records
        .iter()
        .filter_map(|r| extractor.extract(r))
        .collect()
}

/// Computes the subset of `incoming` that is genuinely new with respect to `existing`.
///
/// Records are visited in source order. A record is emitted only when its key is in neither
/// `existing` nor the set of keys already emitted from this same batch, which guards against
/// duplicates inside one export and makes the merge idempotent: running it again over the same
/// batch emits nothing.
pub fn merge(existing: HashSet<DedupKey>, extractor: &KeyExtractor, incoming: &[Record]) -> Merge {
    let mut seen = existing;
    let mut out = Merge::default();

    for record in incoming {
        let key = match extractor.extract(record) {
            Some(key) => key,
            None => {
                info!("Skipping a row with empty key fields: {record:?}");
                out.skipped += 1;
                continue;
            }
        };

        if seen.contains(&key) {
            debug!("Skipping duplicate transaction: {key:?}");
            out.duplicates += 1;
            continue;
        }

        seen.insert(key);
        out.new_records.push(record.clone());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Export;

    fn export(rows: Vec<Vec<&str>>) -> Export {
        Export::from_rows(rows).unwrap()
    }

    fn composite_extractor(export: &Export) -> KeyExtractor {
        KeyExtractor::new(export.mapping(), Some(KeyPolicy::Composite)).unwrap()
    }

    #[test]
    fn test_policy_resolution_prefers_id() {
        let e = export(vec![vec!["Date", "Amount", "Description", "Id"]]);
        let extractor = KeyExtractor::new(e.mapping(), None).unwrap();
        assert_eq!(extractor.policy(), KeyPolicy::ExternalId);
    }

    #[test]
    fn test_policy_resolution_falls_back_to_composite() {
        let e = export(vec![vec!["Date", "Amount", "Description"]]);
        let extractor = KeyExtractor::new(e.mapping(), None).unwrap();
        assert_eq!(extractor.policy(), KeyPolicy::Composite);
    }

    #[test]
    fn test_missing_key_fields_is_fatal_up_front() {
        let e = export(vec![vec!["Date", "Category"]]);
        let err = KeyExtractor::new(e.mapping(), Some(KeyPolicy::Composite)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MissingKeyFields(_))
        ));
    }

    #[test]
    fn test_missing_id_column_is_fatal() {
        let e = export(vec![vec!["Date", "Amount", "Description"]]);
        assert!(KeyExtractor::new(e.mapping(), Some(KeyPolicy::ExternalId)).is_err());
    }

    #[test]
    fn test_merge_against_existing_composite_key() {
        let e = export(vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-01", "12.50", "Piano Lesson"],
            vec!["2024-01-02", "15.00", "Piano Lesson"],
        ]);
        let extractor = composite_extractor(&e);
        let existing = HashSet::from([DedupKey::Composite {
            date: String::from("2024-01-01"),
            amount: String::from("12.50"),
            description: String::from("Piano Lesson"),
        }]);

        let result = merge(existing, &extractor, e.records());
        assert_eq!(result.new_records.len(), 1);
        assert_eq!(result.new_records[0].text(0), "2024-01-02");
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let e = export(vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-01", "12.50", "Piano Lesson"],
            vec!["2024-01-02", "15.00", "Recital Fee"],
        ]);
        let extractor = composite_extractor(&e);

        let first = merge(HashSet::new(), &extractor, e.records());
        assert_eq!(first.new_records.len(), 2);

        let after_first = existing_keys(&extractor, &first.new_records);
        let second = merge(after_first, &extractor, e.records());
        assert!(second.new_records.is_empty());
        assert_eq!(second.duplicates, 2);
    }

    #[test]
    fn test_merge_self_dedups_within_a_batch() {
        let e = export(vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-01", "12.50", "Piano Lesson"],
            vec!["2024-01-01", "12.50", "Piano Lesson"],
        ]);
        let extractor = composite_extractor(&e);

        let result = merge(HashSet::new(), &extractor, e.records());
        assert_eq!(result.new_records.len(), 1);
        assert_eq!(result.duplicates, 1);
    }

    #[test]
    fn test_merge_preserves_source_order() {
        let e = export(vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-03", "3.00", "C"],
            vec!["2024-01-01", "1.00", "A"],
            vec!["2024-01-02", "2.00", "B"],
        ]);
        let extractor = composite_extractor(&e);

        let result = merge(HashSet::new(), &extractor, e.records());
        let dates: Vec<&str> = result.new_records.iter().map(|r| r.text(0)).collect();
        assert_eq!(dates, vec!["2024-01-03", "2024-01-01", "2024-01-02"]);
    }

    #[test]
    fn test_merge_excludes_rows_with_empty_key_fields() {
        let e = export(vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-01", "", "Piano Lesson"],
            vec!["2024-01-02", "15.00", "Piano Lesson"],
        ]);
        let extractor = composite_extractor(&e);

        let result = merge(HashSet::new(), &extractor, e.records());
        assert_eq!(result.new_records.len(), 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.duplicates, 0);
    }

    #[test]
    fn test_merge_by_external_id() {
        let e = export(vec![
            vec!["Date", "Amount", "Name", "Id"],
            vec!["2024-01-01", "12.50", "Piano Lesson", "tx001"],
            vec!["2024-01-01", "12.50", "Piano Lesson", "tx002"],
        ]);
        let extractor = KeyExtractor::new(e.mapping(), Some(KeyPolicy::ExternalId)).unwrap();

        // Same date/amount/description but distinct ids: both are genuinely new.
        let result = merge(HashSet::new(), &extractor, e.records());
        assert_eq!(result.new_records.len(), 2);
        assert_eq!(result.duplicates, 0);
    }

    #[test]
    fn test_existing_keys_ignores_incomplete_ledger_rows() {
        let e = export(vec![
            vec!["Date", "Amount", "Description"],
            vec!["2024-01-01", "12.50", ""],
            vec!["2024-01-02", "15.00", "Piano Lesson"],
        ]);
        let extractor = composite_extractor(&e);
        let keys = existing_keys(&extractor, e.records());
        assert_eq!(keys.len(), 1);
    }
}
