//! Database operations for the `load_runs` audit table.
//!
//! Rows are append-only: each is inserted already in its terminal state and
//! never updated. The most recent succeeded run's checksum is what the
//! fetcher compares fresh downloads against.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use obetl_core::Dataset;

use crate::DbError;

/// A row from the `load_runs` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LoadRunRow {
    pub id: i64,
    pub public_id: Uuid,
    pub dataset: String,
    /// `None` when the run failed before a checksum could be computed.
    pub source_checksum: Option<String>,
    pub status: String,
    pub inserted: i32,
    pub updated: i32,
    pub unchanged: i32,
    pub deleted: i32,
    pub rejected: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Final record counts for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadCounts {
    pub inserted: i32,
    pub updated: i32,
    pub unchanged: i32,
    pub deleted: i32,
    pub rejected: i32,
}

const RETURNING: &str = "RETURNING id, public_id, dataset, source_checksum, status, \
              inserted, updated, unchanged, deleted, rejected, \
              started_at, completed_at, error_message, created_at";

/// Appends a succeeded run. Only called inside the loader transaction so a
/// rolled-back load leaves no audit row behind.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub(crate) async fn insert_succeeded_run(
    conn: &mut PgConnection,
    dataset: Dataset,
    source_checksum: &str,
    counts: LoadCounts,
    started_at: DateTime<Utc>,
) -> Result<LoadRunRow, DbError> {
    let sql = format!(
        "INSERT INTO load_runs \
             (public_id, dataset, source_checksum, status, \
              inserted, updated, unchanged, deleted, rejected, started_at) \
         VALUES ($1, $2, $3, 'succeeded', $4, $5, $6, $7, $8, $9) \
         {RETURNING}"
    );
    let row = sqlx::query_as::<_, LoadRunRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(dataset.as_str())
        .bind(source_checksum)
        .bind(counts.inserted)
        .bind(counts.updated)
        .bind(counts.unchanged)
        .bind(counts.deleted)
        .bind(counts.rejected)
        .bind(started_at)
        .fetch_one(conn)
        .await?;

    Ok(row)
}

/// Appends a failed run with its error message.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_failed_run(
    pool: &PgPool,
    dataset: Dataset,
    source_checksum: Option<&str>,
    error_message: &str,
    started_at: DateTime<Utc>,
) -> Result<LoadRunRow, DbError> {
    let sql = format!(
        "INSERT INTO load_runs \
             (public_id, dataset, source_checksum, status, error_message, started_at) \
         VALUES ($1, $2, $3, 'failed', $4, $5) \
         {RETURNING}"
    );
    let row = sqlx::query_as::<_, LoadRunRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(dataset.as_str())
        .bind(source_checksum)
        .bind(error_message)
        .bind(started_at)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

/// Checksum of the most recent succeeded run for a dataset, if any.
///
/// This is the fetcher's comparison point for unchanged-content detection —
/// persisted state, not an in-process global, so it survives restarts.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn last_successful_checksum(
    pool: &PgPool,
    dataset: Dataset,
) -> Result<Option<String>, DbError> {
    let checksum = sqlx::query_scalar::<_, Option<String>>(
        "SELECT source_checksum FROM load_runs \
         WHERE dataset = $1 AND status = 'succeeded' \
         ORDER BY completed_at DESC, id DESC \
         LIMIT 1",
    )
    .bind(dataset.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(checksum.flatten())
}

/// Returns the most recent `limit` runs across all datasets, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<LoadRunRow>, DbError> {
    let rows = sqlx::query_as::<_, LoadRunRow>(
        "SELECT id, public_id, dataset, source_checksum, status, \
                inserted, updated, unchanged, deleted, rejected, \
                started_at, completed_at, error_message, created_at \
         FROM load_runs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
