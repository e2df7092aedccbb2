//! Classification of parsed records against the persisted baseline.
//!
//! Pure computation over already-fetched data: no I/O, no clocks. Given the
//! same batch and baseline, the output is always the same, which is what
//! makes re-running a pipeline against unchanged content a provable no-op.

use std::collections::HashMap;

use obetl_core::{DatasetDelta, Delta, Dataset, RecordBatch, RecordIdentity};

use crate::error::PipelineError;

/// Classifies a typed batch against the baseline.
///
/// Deletions are computed only when `document_is_full`: a baseline key
/// missing from a truncated or partially-fetched file must never be treated
/// as a real-world deletion.
#[must_use]
pub fn reconcile_batch(
    batch: RecordBatch,
    baseline: &HashMap<String, String>,
    document_is_full: bool,
) -> DatasetDelta {
    match batch {
        RecordBatch::Products(rows) => {
            DatasetDelta::Products(reconcile(rows, baseline, document_is_full))
        }
        RecordBatch::Patents(rows) => {
            DatasetDelta::Patents(reconcile(rows, baseline, document_is_full))
        }
        RecordBatch::Exclusivity(rows) => {
            DatasetDelta::Exclusivity(reconcile(rows, baseline, document_is_full))
        }
    }
}

/// Classifies one record type: absent key → insert, differing hash →
/// update, matching hash → unchanged.
///
/// The parser guarantees in-batch key uniqueness, but a duplicate that
/// slips through is handled defensively: the later occurrence wins and the
/// earlier is counted as superseded.
pub fn reconcile<T: RecordIdentity>(
    records: Vec<T>,
    baseline: &HashMap<String, String>,
    document_is_full: bool,
) -> Delta<T> {
    let mut delta = Delta::default();

    // Later-wins dedup, preserving first-seen order for stable output.
    let mut by_key: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut deduped: Vec<Option<(String, T)>> = Vec::with_capacity(records.len());
    for record in records {
        let key = record.natural_key();
        if let Some(&slot) = by_key.get(&key) {
            tracing::warn!(natural_key = %key, "duplicate key in batch — earlier record superseded");
            delta.superseded += 1;
            deduped[slot] = Some((key, record));
        } else {
            by_key.insert(key.clone(), deduped.len());
            deduped.push(Some((key, record)));
        }
    }

    for (key, record) in deduped.into_iter().flatten() {
        match baseline.get(&key) {
            None => delta.inserts.push(record),
            Some(previous_hash) => {
                if *previous_hash == record.content_hash() {
                    delta.unchanged += 1;
                } else {
                    delta.updates.push(record);
                }
            }
        }
    }

    if document_is_full {
        delta.deletions = baseline
            .keys()
            .filter(|key| !by_key.contains_key(*key))
            .cloned()
            .collect();
        // Stable output regardless of map iteration order.
        delta.deletions.sort_unstable();
    }

    delta
}

/// Refuses deltas whose deletion share of the baseline exceeds the catalog
/// threshold. A spike like that is upstream flakiness or format drift, not
/// thousands of genuine delistings in one day.
///
/// # Errors
///
/// Returns [`PipelineError::DeletionSpike`] when the ratio is exceeded.
pub fn enforce_deletion_guard(
    dataset: Dataset,
    delta: &DatasetDelta,
    baseline_len: usize,
    max_ratio: f64,
) -> Result<(), PipelineError> {
    let deletions = delta.deleted();
    if deletions == 0 || baseline_len == 0 {
        return Ok(());
    }

    #[allow(clippy::cast_precision_loss)]
    let ratio = deletions as f64 / baseline_len as f64;
    if ratio > max_ratio {
        return Err(PipelineError::DeletionSpike {
            dataset,
            deletions,
            baseline: baseline_len,
            max_ratio,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use obetl_core::ExclusivityRecord;

    fn record(appl: &str, prod: &str, code: &str, year: i32) -> ExclusivityRecord {
        ExclusivityRecord {
            application_number: appl.to_string(),
            product_number: prod.to_string(),
            exclusivity_code: code.to_string(),
            application_type: Some("N".to_string()),
            exclusivity_end_date: chrono::NaiveDate::from_ymd_opt(year, 10, 2),
        }
    }

    fn baseline_of(records: &[ExclusivityRecord]) -> HashMap<String, String> {
        records
            .iter()
            .map(|r| (r.natural_key(), r.content_hash()))
            .collect()
    }

    #[test]
    fn empty_baseline_classifies_everything_as_insert() {
        let records = vec![
            record("021324", "001", "NCE", 2026),
            record("021324", "002", "NCE", 2026),
        ];
        let delta = reconcile(records, &HashMap::new(), true);

        assert_eq!(delta.inserts.len(), 2);
        assert!(delta.updates.is_empty());
        assert_eq!(delta.unchanged, 0);
        assert!(delta.deletions.is_empty());
    }

    #[test]
    fn matching_hash_is_unchanged_and_differing_hash_is_update() {
        let old = vec![
            record("021324", "001", "NCE", 2026),
            record("021324", "002", "NCE", 2026),
        ];
        let baseline = baseline_of(&old);

        // One row's expiration date moved; the other is byte-identical.
        let incoming = vec![
            record("021324", "001", "NCE", 2026),
            record("021324", "002", "NCE", 2027),
        ];
        let delta = reconcile(incoming, &baseline, true);

        assert!(delta.inserts.is_empty());
        assert_eq!(delta.updates.len(), 1);
        assert_eq!(delta.updates[0].natural_key(), "021324:002:NCE");
        assert_eq!(delta.unchanged, 1);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let records = vec![
            record("021324", "001", "NCE", 2026),
            record("021324", "002", "NCE", 2026),
        ];
        // Baseline as it would stand after loading those records.
        let baseline = baseline_of(&records);

        let delta = reconcile(records, &baseline, true);
        assert!(delta.inserts.is_empty());
        assert!(delta.updates.is_empty());
        assert!(delta.deletions.is_empty());
        assert_eq!(delta.unchanged, 2);
    }

    #[test]
    fn full_document_produces_deletions_for_vanished_keys() {
        let old = vec![
            record("021324", "001", "NCE", 2026),
            record("021324", "002", "NCE", 2026),
        ];
        let baseline = baseline_of(&old);

        let incoming = vec![record("021324", "001", "NCE", 2026)];
        let delta = reconcile(incoming, &baseline, true);

        assert_eq!(delta.deletions, vec!["021324:002:NCE".to_string()]);
    }

    #[test]
    fn partial_document_never_produces_deletions() {
        let old = vec![
            record("021324", "001", "NCE", 2026),
            record("021324", "002", "NCE", 2026),
        ];
        let baseline = baseline_of(&old);

        // Truncated file: only one row survived the fetch.
        let incoming = vec![record("021324", "001", "NCE", 2026)];
        let delta = reconcile(incoming, &baseline, false);

        assert!(delta.deletions.is_empty());
        assert_eq!(delta.unchanged, 1);
    }

    #[test]
    fn duplicate_key_later_record_wins() {
        let incoming = vec![
            record("021324", "001", "NCE", 2026),
            record("021324", "001", "NCE", 2030),
        ];
        let delta = reconcile(incoming, &HashMap::new(), true);

        assert_eq!(delta.inserts.len(), 1);
        assert_eq!(delta.superseded, 1);
        assert_eq!(
            delta.inserts[0].exclusivity_end_date,
            chrono::NaiveDate::from_ymd_opt(2030, 10, 2)
        );
    }

    #[test]
    fn duplicate_key_does_not_count_as_deletion_shadow() {
        let old = vec![record("021324", "001", "NCE", 2026)];
        let baseline = baseline_of(&old);

        let incoming = vec![
            record("021324", "001", "NCE", 2027),
            record("021324", "001", "NCE", 2028),
        ];
        let delta = reconcile(incoming, &baseline, true);

        assert_eq!(delta.updates.len(), 1);
        assert!(delta.deletions.is_empty());
    }

    #[test]
    fn deletion_guard_allows_small_ratios() {
        let old: Vec<ExclusivityRecord> = (0..100)
            .map(|i| record("021324", &format!("{i:03}"), "NCE", 2026))
            .collect();
        let baseline = baseline_of(&old);
        let incoming: Vec<ExclusivityRecord> = old[..95].to_vec();

        let delta = DatasetDelta::Exclusivity(reconcile(incoming, &baseline, true));
        assert_eq!(delta.deleted(), 5);
        assert!(
            enforce_deletion_guard(Dataset::Exclusivity, &delta, baseline.len(), 0.10).is_ok()
        );
    }

    #[test]
    fn deletion_guard_rejects_spikes() {
        let old: Vec<ExclusivityRecord> = (0..100)
            .map(|i| record("021324", &format!("{i:03}"), "NCE", 2026))
            .collect();
        let baseline = baseline_of(&old);
        let incoming: Vec<ExclusivityRecord> = old[..50].to_vec();

        let delta = DatasetDelta::Exclusivity(reconcile(incoming, &baseline, true));
        let result = enforce_deletion_guard(Dataset::Exclusivity, &delta, baseline.len(), 0.25);
        assert!(
            matches!(
                result,
                Err(PipelineError::DeletionSpike { deletions: 50, baseline: 100, .. })
            ),
            "expected DeletionSpike, got: {result:?}"
        );
    }

    #[test]
    fn deletion_guard_is_quiet_on_empty_baseline() {
        let delta = DatasetDelta::Exclusivity(reconcile(
            vec![record("021324", "001", "NCE", 2026)],
            &HashMap::new(),
            true,
        ));
        assert!(enforce_deletion_guard(Dataset::Exclusivity, &delta, 0, 0.25).is_ok());
    }
}
