//! Typed Orange Book records and the natural-key / content-hash contract.
//!
//! Each dataset keeps its own field schema; the only thing shared across
//! datasets is [`RecordIdentity`]: a stable composite key identifying the
//! real-world entity across releases, and a hash over everything else used
//! for change detection.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::datasets::Dataset;

/// Separator between hashed fields. Upstream values are `~`-delimited text
/// and can never contain a unit separator, so no escaping is needed.
const HASH_FIELD_SEP: [u8; 1] = [0x1f];

/// Separator between the components of a composite natural key.
const KEY_SEP: char = ':';

/// The contract every dataset record satisfies.
pub trait RecordIdentity {
    /// Stable composite key for the entity, unique within a parsed batch.
    fn natural_key(&self) -> String;

    /// SHA-256 over all non-key fields in declared order, hex-encoded.
    /// Records with equal keys and equal hashes are identical for loading
    /// purposes.
    fn content_hash(&self) -> String;
}

fn hash_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            hasher.update(HASH_FIELD_SEP);
        }
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn date_str(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

fn flag_str(flag: bool) -> &'static str {
    if flag {
        "Y"
    } else {
        "N"
    }
}

/// One approved drug product.
///
/// Application and product numbers are stored zero-padded (6 and 3 digits)
/// so keys compare stably across releases that drop leading zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub application_number: String,
    pub product_number: String,
    pub ingredient: String,
    /// Combined dosage form and route, e.g. `"TABLET;ORAL"`.
    pub dosage_form_route: Option<String>,
    pub trade_name: String,
    pub applicant: Option<String>,
    pub strength: Option<String>,
    /// `"N"` (new drug application) or `"A"` (abbreviated).
    pub application_type: Option<String>,
    pub te_code: Option<String>,
    /// `None` for products approved prior to Jan 1, 1982 — the file carries
    /// a sentinel phrase instead of a date for those.
    pub approval_date: Option<NaiveDate>,
    pub is_rld: bool,
    pub is_reference_standard: bool,
    /// `"RX"`, `"OTC"`, or `"DISCN"`.
    pub marketing_status: String,
}

impl RecordIdentity for ProductRecord {
    fn natural_key(&self) -> String {
        format!(
            "{}{KEY_SEP}{}",
            self.application_number, self.product_number
        )
    }

    fn content_hash(&self) -> String {
        hash_fields([
            self.ingredient.as_str(),
            self.dosage_form_route.as_deref().unwrap_or_default(),
            self.trade_name.as_str(),
            self.applicant.as_deref().unwrap_or_default(),
            self.strength.as_deref().unwrap_or_default(),
            self.application_type.as_deref().unwrap_or_default(),
            self.te_code.as_deref().unwrap_or_default(),
            date_str(self.approval_date).as_str(),
            flag_str(self.is_rld),
            flag_str(self.is_reference_standard),
            self.marketing_status.as_str(),
        ])
    }
}

/// One patent listed against a product. The same patent number may appear
/// once per use code, so the use code is part of the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatentRecord {
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
}

impl RecordIdentity for PatentRecord {
    fn natural_key(&self) -> String {
        format!(
            "{}{KEY_SEP}{}{KEY_SEP}{}{KEY_SEP}{}",
            self.application_number, self.product_number, self.patent_number, self.patent_use_code
        )
    }

    fn content_hash(&self) -> String {
        hash_fields([
            self.application_type.as_deref().unwrap_or_default(),
            date_str(self.patent_expiry_date).as_str(),
            flag_str(self.is_drug_substance),
            flag_str(self.is_drug_product),
            flag_str(self.is_delisted),
            date_str(self.submission_date).as_str(),
        ])
    }
}

/// One market-exclusivity grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusivityRecord {
    pub application_number: String,
    pub product_number: String,
    pub exclusivity_code: String,
    pub application_type: Option<String>,
    pub exclusivity_end_date: Option<NaiveDate>,
}

impl RecordIdentity for ExclusivityRecord {
    fn natural_key(&self) -> String {
        format!(
            "{}{KEY_SEP}{}{KEY_SEP}{}",
            self.application_number, self.product_number, self.exclusivity_code
        )
    }

    fn content_hash(&self) -> String {
        hash_fields([
            self.application_type.as_deref().unwrap_or_default(),
            date_str(self.exclusivity_end_date).as_str(),
        ])
    }
}

/// A fully parsed batch for one dataset, keeping each dataset's rows typed.
#[derive(Debug, Clone)]
pub enum RecordBatch {
    Products(Vec<ProductRecord>),
    Patents(Vec<PatentRecord>),
    Exclusivity(Vec<ExclusivityRecord>),
}

impl RecordBatch {
    #[must_use]
    pub const fn dataset(&self) -> Dataset {
        match self {
            RecordBatch::Products(_) => Dataset::Products,
            RecordBatch::Patents(_) => Dataset::Patents,
            RecordBatch::Exclusivity(_) => Dataset::Exclusivity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Products(rows) => rows.len(),
            RecordBatch::Patents(rows) => rows.len(),
            RecordBatch::Exclusivity(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
