//! Delimited-text parsing into typed records.
//!
//! Parsing is pure and deterministic: the same member bytes always yield the
//! same records and rejections. A malformed row becomes a
//! [`ParseRejection`] and never aborts the batch; a missing *required
//! column* is schema drift and fails the whole dataset instead, since every
//! row would be garbage.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use obetl_core::{
    Dataset, DatasetSpec, ExclusivityRecord, PatentRecord, ProductRecord, RecordBatch,
    RecordIdentity,
};

use crate::error::SourceError;

/// FDA date layout, e.g. `"Oct 2, 2001"`.
const FDA_DATE_FORMAT: &str = "%b %d, %Y";

/// Sentinel phrase used instead of a date for pre-1982 approvals.
const APPROVED_PRIOR: &str = "approved prior to";

/// One row excluded from the batch, with enough context to audit upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRejection {
    /// 1-based line number within the member file (header is line 1).
    pub line_number: usize,
    pub reason: String,
    pub raw_line: String,
}

/// Everything the parser produced for one dataset file.
#[derive(Debug)]
pub struct ParseOutcome {
    pub batch: RecordBatch,
    pub rejections: Vec<ParseRejection>,
}

impl ParseOutcome {
    /// Rejections as a fraction of all data rows seen.
    #[must_use]
    pub fn rejection_ratio(&self) -> f64 {
        let total = self.batch.len() + self.rejections.len();
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.rejections.len() as f64 / total as f64
        }
    }
}

/// Parses one member file into typed records plus per-row rejections.
///
/// # Errors
///
/// Returns [`SourceError::EmptyFile`] if there is no header line and
/// [`SourceError::MissingColumn`] if a required column is absent from the
/// header — both indicate wholesale format change, not row-level damage.
pub fn parse(spec: &DatasetSpec, content: &[u8]) -> Result<ParseOutcome, SourceError> {
    let text = String::from_utf8_lossy(content);
    let mut lines = text.lines().enumerate();

    // Header: first non-empty line. Column names are matched trimmed and
    // case-insensitively; releases have wobbled on both.
    let header = lines
        .by_ref()
        .find(|(_, line)| !line.trim().is_empty())
        .ok_or(SourceError::EmptyFile {
            dataset: spec.dataset,
        })?;
    let columns: HashMap<String, usize> = header
        .1
        .split(spec.delimiter)
        .enumerate()
        .map(|(i, name)| (name.trim().to_ascii_lowercase(), i))
        .collect();

    for required in &spec.required_columns {
        if !columns.contains_key(&required.to_ascii_lowercase()) {
            return Err(SourceError::MissingColumn {
                dataset: spec.dataset,
                column: required.clone(),
            });
        }
    }

    let mut rejections = Vec::new();
    let mut seen_keys: HashSet<String> = HashSet::new();

    let mut products = Vec::new();
    let mut patents = Vec::new();
    let mut exclusivity = Vec::new();

    for (idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let line_number = idx + 1;
        let row = RowView {
            fields: line.split(spec.delimiter).map(str::trim).collect(),
            columns: &columns,
        };

        // Ragged rows: extra trailing fields are ignored by construction
        // (lookups are index-based); too-few fields surface as missing
        // required values below.
        let built = match spec.dataset {
            Dataset::Products => build_product(&row).map(|r| (r.natural_key(), Built::Product(r))),
            Dataset::Patents => build_patent(&row).map(|r| (r.natural_key(), Built::Patent(r))),
            Dataset::Exclusivity => {
                build_exclusivity(&row).map(|r| (r.natural_key(), Built::Exclusivity(r)))
            }
        };

        match built {
            Ok((key, record)) => {
                if seen_keys.insert(key.clone()) {
                    match record {
                        Built::Product(r) => products.push(r),
                        Built::Patent(r) => patents.push(r),
                        Built::Exclusivity(r) => exclusivity.push(r),
                    }
                } else {
                    rejections.push(ParseRejection {
                        line_number,
                        reason: format!("duplicate natural key '{key}' within batch"),
                        raw_line: line.to_string(),
                    });
                }
            }
            Err(reason) => {
                rejections.push(ParseRejection {
                    line_number,
                    reason,
                    raw_line: line.to_string(),
                });
            }
        }
    }

    let batch = match spec.dataset {
        Dataset::Products => RecordBatch::Products(products),
        Dataset::Patents => RecordBatch::Patents(patents),
        Dataset::Exclusivity => RecordBatch::Exclusivity(exclusivity),
    };

    if !rejections.is_empty() {
        tracing::warn!(
            dataset = %spec.dataset,
            rejected = rejections.len(),
            accepted = batch.len(),
            "rows rejected during parse"
        );
    }

    Ok(ParseOutcome { batch, rejections })
}

enum Built {
    Product(ProductRecord),
    Patent(PatentRecord),
    Exclusivity(ExclusivityRecord),
}

/// Index-based field access over one data row.
struct RowView<'a> {
    fields: Vec<&'a str>,
    columns: &'a HashMap<String, usize>,
}

impl RowView<'_> {
    /// Trimmed field value for a column; `None` when the column is absent
    /// from the row or the value is empty.
    fn get(&self, column: &str) -> Option<&str> {
        let index = *self.columns.get(&column.to_ascii_lowercase())?;
        self.fields
            .get(index)
            .copied()
            .filter(|value| !value.is_empty())
    }

    fn require(&self, column: &str) -> Result<&str, String> {
        self.get(column)
            .ok_or_else(|| format!("missing required field '{column}'"))
    }

    fn optional(&self, column: &str) -> Option<String> {
        self.get(column).map(str::to_string)
    }
}

fn build_product(row: &RowView<'_>) -> Result<ProductRecord, String> {
    let application_number = pad_number(row.require("Appl_No")?, 6);
    let product_number = pad_number(row.require("Product_No")?, 3);

    Ok(ProductRecord {
        application_number,
        product_number,
        ingredient: row.require("Ingredient")?.to_string(),
        dosage_form_route: row.optional("DF;Route"),
        trade_name: row.require("Trade_Name")?.to_string(),
        applicant: row.optional("Applicant"),
        strength: row.optional("Strength"),
        application_type: row.optional("Appl_Type"),
        te_code: row.optional("TE_Code"),
        approval_date: parse_fda_date(row.get("Approval_Date"))?,
        is_rld: yes_no(row.get("RLD")),
        is_reference_standard: yes_no(row.get("RS")),
        marketing_status: row.require("Type")?.to_ascii_uppercase(),
    })
}

fn build_patent(row: &RowView<'_>) -> Result<PatentRecord, String> {
    Ok(PatentRecord {
        application_number: pad_number(row.require("Appl_No")?, 6),
        product_number: pad_number(row.require("Product_No")?, 3),
        patent_number: row.require("Patent_No")?.to_string(),
        patent_use_code: row.optional("Patent_Use_Code").unwrap_or_default(),
        application_type: row.optional("Appl_Type"),
        patent_expiry_date: parse_fda_date(row.get("Patent_Expire_Date_Text"))?,
        is_drug_substance: yes_no(row.get("Drug_Substance_Flag")),
        is_drug_product: yes_no(row.get("Drug_Product_Flag")),
        is_delisted: yes_no(row.get("Delist_Flag")),
        submission_date: parse_fda_date(row.get("Submission_Date"))?,
    })
}

fn build_exclusivity(row: &RowView<'_>) -> Result<ExclusivityRecord, String> {
    Ok(ExclusivityRecord {
        application_number: pad_number(row.require("Appl_No")?, 6),
        product_number: pad_number(row.require("Product_No")?, 3),
        exclusivity_code: row.require("Exclusivity_Code")?.to_string(),
        application_type: row.optional("Appl_Type"),
        exclusivity_end_date: parse_fda_date(row.get("Exclusivity_Date"))?,
    })
}

/// Parses the FDA's `"Mon D, YYYY"` date layout.
///
/// Empty values and the "Approved prior to Jan 1, 1982" sentinel both map to
/// `None`; anything else that fails to parse is a row error.
fn parse_fda_date(raw: Option<&str>) -> Result<Option<NaiveDate>, String> {
    let Some(value) = raw else {
        return Ok(None);
    };
    if value.to_ascii_lowercase().contains(APPROVED_PRIOR) {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, FDA_DATE_FORMAT)
        .map(Some)
        .map_err(|_| format!("unparseable date '{value}'"))
}

/// Left-pads a numeric identifier with zeros so keys compare stably across
/// releases that drop leading zeros. Values already at or beyond `width`
/// pass through untouched.
fn pad_number(raw: &str, width: usize) -> String {
    if raw.len() >= width {
        raw.to_string()
    } else {
        format!("{raw:0>width$}")
    }
}

fn yes_no(raw: Option<&str>) -> bool {
    matches!(
        raw.map(str::to_ascii_uppercase).as_deref(),
        Some("Y" | "YES")
    )
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
