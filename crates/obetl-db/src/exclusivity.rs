//! Database operations for the `exclusivity` table.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use obetl_core::{ExclusivityRecord, RecordIdentity};

use crate::DbError;

/// A row from the `exclusivity` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExclusivityRow {
    pub id: i64,
    pub natural_key: String,
    pub application_number: String,
    pub product_number: String,
    pub exclusivity_code: String,
    pub application_type: Option<String>,
    pub exclusivity_end_date: Option<NaiveDate>,
    pub active: bool,
    pub delisted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upserts one exclusivity record, keyed on its natural key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_exclusivity(
    conn: &mut PgConnection,
    record: &ExclusivityRecord,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO exclusivity \
             (natural_key, application_number, product_number, exclusivity_code, \
              application_type, exclusivity_end_date) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (natural_key) DO UPDATE SET \
             application_type     = EXCLUDED.application_type, \
             exclusivity_end_date = EXCLUDED.exclusivity_end_date, \
             active               = TRUE, \
             delisted_at          = NULL, \
             updated_at           = NOW()",
    )
    .bind(record.natural_key())
    .bind(&record.application_number)
    .bind(&record.product_number)
    .bind(&record.exclusivity_code)
    .bind(&record.application_type)
    .bind(record.exclusivity_end_date)
    .execute(conn)
    .await?;

    Ok(())
}

/// Lists active exclusivity grants for one application/product pair.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_exclusivity_for_product(
    pool: &PgPool,
    application_number: &str,
    product_number: &str,
) -> Result<Vec<ExclusivityRow>, DbError> {
    let rows = sqlx::query_as::<_, ExclusivityRow>(
        "SELECT id, natural_key, application_number, product_number, exclusivity_code, \
                application_type, exclusivity_end_date, active, delisted_at, \
                created_at, updated_at \
         FROM exclusivity \
         WHERE application_number = $1 AND product_number = $2 AND active \
         ORDER BY exclusivity_code",
    )
    .bind(application_number)
    .bind(product_number)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Soft-deletes exclusivity grants by natural key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn soft_delete_exclusivity(
    conn: &mut PgConnection,
    natural_keys: &[String],
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE exclusivity \
         SET active = FALSE, delisted_at = NOW(), updated_at = NOW() \
         WHERE natural_key = ANY($1) AND active",
    )
    .bind(natural_keys)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}
