//! Database operations for the `load_state` table — the reconciliation
//! baseline mapping each natural key to its last-loaded content hash.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use obetl_core::Dataset;

use crate::DbError;

/// A row from the `load_state` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LoadStateRow {
    pub dataset: String,
    pub natural_key: String,
    pub content_hash: String,
    pub loaded_at: DateTime<Utc>,
}

/// Reads the full baseline for one dataset as a key → hash map.
///
/// Called once at the start of a run, outside any loader transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn fetch_baseline(
    pool: &PgPool,
    dataset: Dataset,
) -> Result<HashMap<String, String>, DbError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT natural_key, content_hash FROM load_state WHERE dataset = $1",
    )
    .bind(dataset.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Upserts one baseline entry. Only called inside a loader transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub(crate) async fn upsert_entry(
    conn: &mut PgConnection,
    dataset: Dataset,
    natural_key: &str,
    content_hash: &str,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO load_state (dataset, natural_key, content_hash, loaded_at) \
         VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (dataset, natural_key) DO UPDATE SET \
             content_hash = EXCLUDED.content_hash, \
             loaded_at    = NOW()",
    )
    .bind(dataset.as_str())
    .bind(natural_key)
    .bind(content_hash)
    .execute(conn)
    .await?;

    Ok(())
}

/// Removes baseline entries for deleted keys so a re-appearing entity
/// classifies as an insert. Only called inside a loader transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub(crate) async fn delete_entries(
    conn: &mut PgConnection,
    dataset: Dataset,
    natural_keys: &[String],
) -> Result<u64, DbError> {
    let result =
        sqlx::query("DELETE FROM load_state WHERE dataset = $1 AND natural_key = ANY($2)")
            .bind(dataset.as_str())
            .bind(natural_keys)
            .execute(conn)
            .await?;

    Ok(result.rows_affected())
}

/// Number of baseline entries for one dataset.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn baseline_len(pool: &PgPool, dataset: Dataset) -> Result<i64, DbError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM load_state WHERE dataset = $1")
            .bind(dataset.as_str())
            .fetch_one(pool)
            .await?;

    Ok(count)
}
