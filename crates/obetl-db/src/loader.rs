//! Transactional application of a reconciled delta to the destination.
//!
//! Everything for one dataset happens inside a single transaction: record
//! upserts, soft deletes, the baseline rewrite, and the audit row. If any
//! write fails the whole transaction rolls back and the baseline stays at
//! its prior value, so a retried run reprocesses the same delta instead of
//! silently losing it.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use obetl_core::{DatasetDelta, Delta, RecordIdentity};

use crate::load_runs::{insert_succeeded_run, LoadCounts, LoadRunRow};
use crate::{exclusivity, load_state, patents, products, DbError};

/// Applies one dataset's classified changes as an all-or-nothing unit and
/// appends the succeeded audit row.
///
/// A Postgres advisory transaction lock keyed on the dataset name serializes
/// loads for the same dataset across concurrent runs; independent datasets
/// do not contend. Unchanged records are not written at all.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; the transaction is
/// rolled back and no partial state is observable.
pub async fn apply_delta(
    pool: &PgPool,
    delta: &DatasetDelta,
    source_checksum: &str,
    rejected: usize,
    started_at: DateTime<Utc>,
) -> Result<LoadRunRow, DbError> {
    let dataset = delta.dataset();
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(dataset.as_str())
        .execute(&mut *tx)
        .await?;

    let (pairs, deletions) = match delta {
        DatasetDelta::Products(d) => {
            for record in d.inserts.iter().chain(d.updates.iter()) {
                products::upsert_product(&mut tx, record).await?;
            }
            if !d.deletions.is_empty() {
                products::soft_delete_products(&mut tx, &d.deletions).await?;
            }
            (state_pairs(d), d.deletions.as_slice())
        }
        DatasetDelta::Patents(d) => {
            for record in d.inserts.iter().chain(d.updates.iter()) {
                patents::upsert_patent(&mut tx, record).await?;
            }
            if !d.deletions.is_empty() {
                patents::soft_delete_patents(&mut tx, &d.deletions).await?;
            }
            (state_pairs(d), d.deletions.as_slice())
        }
        DatasetDelta::Exclusivity(d) => {
            for record in d.inserts.iter().chain(d.updates.iter()) {
                exclusivity::upsert_exclusivity(&mut tx, record).await?;
            }
            if !d.deletions.is_empty() {
                exclusivity::soft_delete_exclusivity(&mut tx, &d.deletions).await?;
            }
            (state_pairs(d), d.deletions.as_slice())
        }
    };

    for (natural_key, content_hash) in &pairs {
        load_state::upsert_entry(&mut tx, dataset, natural_key, content_hash).await?;
    }
    if !deletions.is_empty() {
        load_state::delete_entries(&mut tx, dataset, deletions).await?;
    }

    let counts = LoadCounts {
        inserted: clamp_count(delta.inserted()),
        updated: clamp_count(delta.updated()),
        unchanged: clamp_count(delta.unchanged()),
        deleted: clamp_count(delta.deleted()),
        rejected: clamp_count(rejected),
    };
    let run = insert_succeeded_run(&mut tx, dataset, source_checksum, counts, started_at).await?;

    tx.commit().await?;

    tracing::info!(
        dataset = %dataset,
        inserted = counts.inserted,
        updated = counts.updated,
        unchanged = counts.unchanged,
        deleted = counts.deleted,
        rejected = counts.rejected,
        "load committed"
    );

    Ok(run)
}

fn state_pairs<T: RecordIdentity>(delta: &Delta<T>) -> Vec<(String, String)> {
    delta
        .inserts
        .iter()
        .chain(delta.updates.iter())
        .map(|record| (record.natural_key(), record.content_hash()))
        .collect()
}

fn clamp_count(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
