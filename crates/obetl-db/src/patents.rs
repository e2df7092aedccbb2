//! Database operations for the `patents` table.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use obetl_core::{PatentRecord, RecordIdentity};

use crate::DbError;

/// A row from the `patents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PatentRow {
    pub id: i64,
    pub natural_key: String,
    pub application_number: String,
    pub product_number: String,
    pub patent_number: String,
    /// Empty string when the listing carries no use code.
    pub patent_use_code: String,
    pub application_type: Option<String>,
    pub patent_expiry_date: Option<NaiveDate>,
    pub is_drug_substance: bool,
    pub is_drug_product: bool,
    pub is_delisted: bool,
    pub submission_date: Option<NaiveDate>,
    pub active: bool,
    pub delisted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upserts one patent record, keyed on its natural key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_patent(conn: &mut PgConnection, record: &PatentRecord) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO patents \
             (natural_key, application_number, product_number, patent_number, \
              patent_use_code, application_type, patent_expiry_date, is_drug_substance, \
              is_drug_product, is_delisted, submission_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         ON CONFLICT (natural_key) DO UPDATE SET \
             application_type   = EXCLUDED.application_type, \
             patent_expiry_date = EXCLUDED.patent_expiry_date, \
             is_drug_substance  = EXCLUDED.is_drug_substance, \
             is_drug_product    = EXCLUDED.is_drug_product, \
             is_delisted        = EXCLUDED.is_delisted, \
             submission_date    = EXCLUDED.submission_date, \
             active             = TRUE, \
             delisted_at        = NULL, \
             updated_at         = NOW()",
    )
    .bind(record.natural_key())
    .bind(&record.application_number)
    .bind(&record.product_number)
    .bind(&record.patent_number)
    .bind(&record.patent_use_code)
    .bind(&record.application_type)
    .bind(record.patent_expiry_date)
    .bind(record.is_drug_substance)
    .bind(record.is_drug_product)
    .bind(record.is_delisted)
    .bind(record.submission_date)
    .execute(conn)
    .await?;

    Ok(())
}

/// Soft-deletes patents by natural key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn soft_delete_patents(
    conn: &mut PgConnection,
    natural_keys: &[String],
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE patents \
         SET active = FALSE, delisted_at = NOW(), updated_at = NOW() \
         WHERE natural_key = ANY($1) AND active",
    )
    .bind(natural_keys)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Lists active patents for one application/product pair.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_patents_for_product(
    pool: &PgPool,
    application_number: &str,
    product_number: &str,
) -> Result<Vec<PatentRow>, DbError> {
    let rows = sqlx::query_as::<_, PatentRow>(
        "SELECT id, natural_key, application_number, product_number, patent_number, \
                patent_use_code, application_type, patent_expiry_date, is_drug_substance, \
                is_drug_product, is_delisted, submission_date, active, delisted_at, \
                created_at, updated_at \
         FROM patents \
         WHERE application_number = $1 AND product_number = $2 AND active \
         ORDER BY patent_number, patent_use_code",
    )
    .bind(application_number)
    .bind(product_number)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
