//! Database operations for the `products` table.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use obetl_core::{ProductRecord, RecordIdentity};

use crate::DbError;

/// A row from the `products` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub natural_key: String,
    pub application_number: String,
    pub product_number: String,
    pub ingredient: String,
    pub dosage_form_route: Option<String>,
    pub trade_name: String,
    pub applicant: Option<String>,
    pub strength: Option<String>,
    pub application_type: Option<String>,
    pub te_code: Option<String>,
    pub approval_date: Option<NaiveDate>,
    pub is_rld: bool,
    pub is_reference_standard: bool,
    pub marketing_status: String,
    /// `FALSE` once the entity disappeared from a full upstream file.
    pub active: bool,
    pub delisted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upserts one product record, keyed on its natural key.
///
/// A re-appearing entity that was previously soft-deleted is resurrected:
/// `active` flips back to `TRUE` and `delisted_at` clears.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_product(
    conn: &mut PgConnection,
    record: &ProductRecord,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO products \
             (natural_key, application_number, product_number, ingredient, \
              dosage_form_route, trade_name, applicant, strength, application_type, \
              te_code, approval_date, is_rld, is_reference_standard, marketing_status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (natural_key) DO UPDATE SET \
             ingredient            = EXCLUDED.ingredient, \
             dosage_form_route     = EXCLUDED.dosage_form_route, \
             trade_name            = EXCLUDED.trade_name, \
             applicant             = EXCLUDED.applicant, \
             strength              = EXCLUDED.strength, \
             application_type      = EXCLUDED.application_type, \
             te_code               = EXCLUDED.te_code, \
             approval_date         = EXCLUDED.approval_date, \
             is_rld                = EXCLUDED.is_rld, \
             is_reference_standard = EXCLUDED.is_reference_standard, \
             marketing_status      = EXCLUDED.marketing_status, \
             active                = TRUE, \
             delisted_at           = NULL, \
             updated_at            = NOW()",
    )
    .bind(record.natural_key())
    .bind(&record.application_number)
    .bind(&record.product_number)
    .bind(&record.ingredient)
    .bind(&record.dosage_form_route)
    .bind(&record.trade_name)
    .bind(&record.applicant)
    .bind(&record.strength)
    .bind(&record.application_type)
    .bind(&record.te_code)
    .bind(record.approval_date)
    .bind(record.is_rld)
    .bind(record.is_reference_standard)
    .bind(&record.marketing_status)
    .execute(conn)
    .await?;

    Ok(())
}

/// Soft-deletes products by natural key. Rows keep their data and history.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn soft_delete_products(
    conn: &mut PgConnection,
    natural_keys: &[String],
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE products \
         SET active = FALSE, delisted_at = NOW(), updated_at = NOW() \
         WHERE natural_key = ANY($1) AND active",
    )
    .bind(natural_keys)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Fetches one product by natural key.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, [`DbError::Sqlx`] on
/// query failure.
pub async fn get_product(pool: &PgPool, natural_key: &str) -> Result<ProductRow, DbError> {
    sqlx::query_as::<_, ProductRow>(
        "SELECT id, natural_key, application_number, product_number, ingredient, \
                dosage_form_route, trade_name, applicant, strength, application_type, \
                te_code, approval_date, is_rld, is_reference_standard, marketing_status, \
                active, delisted_at, created_at, updated_at \
         FROM products \
         WHERE natural_key = $1",
    )
    .bind(natural_key)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}
