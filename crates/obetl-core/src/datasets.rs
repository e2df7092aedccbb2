//! Dataset catalog: which files the Orange Book archive carries and how each
//! one is laid out.
//!
//! Column layouts, delimiters, and sanity thresholds are configuration read
//! from `config/datasets.yaml`, not parsing code — a release that renames a
//! column is a catalog edit, not a source change.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// The three Orange Book datasets, in dependency order.
///
/// Patents and exclusivity reference products by application number, so
/// [`Dataset::Products`] always loads first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Products,
    Patents,
    Exclusivity,
}

impl Dataset {
    /// All datasets in load order.
    #[must_use]
    pub const fn all() -> [Dataset; 3] {
        [Dataset::Products, Dataset::Patents, Dataset::Exclusivity]
    }

    /// Datasets that may only load after [`Dataset::Products`] has completed.
    #[must_use]
    pub const fn dependents() -> [Dataset; 2] {
        [Dataset::Patents, Dataset::Exclusivity]
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Dataset::Products => "products",
            Dataset::Patents => "patents",
            Dataset::Exclusivity => "exclusivity",
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dataset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "products" => Ok(Dataset::Products),
            "patents" | "patent" => Ok(Dataset::Patents),
            "exclusivity" => Ok(Dataset::Exclusivity),
            other => Err(ConfigError::Validation(format!(
                "unknown dataset: '{other}'"
            ))),
        }
    }
}

/// How a dataset's bytes arrive from upstream.
///
/// The Orange Book publishes everything inside one ZIP; plain delimited text
/// exists for mirrored copies and for tests that feed files directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceEncoding {
    #[default]
    ZippedDelimited,
    Delimited,
}

/// Layout and sanity thresholds for one dataset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub dataset: Dataset,
    /// File name inside the archive, matched case-insensitively.
    pub member: String,
    #[serde(default)]
    pub encoding: SourceEncoding,
    pub delimiter: char,
    /// Header columns the parser requires. A release missing any of these is
    /// a schema error, not a row-level rejection.
    pub required_columns: Vec<String>,
    /// Truncation guard: a batch parsing fewer rows than this is treated as
    /// a partial file and can never produce deletions.
    pub min_expected_rows: usize,
    /// Rejection ratio above which the dataset fails instead of loading.
    pub max_rejection_ratio: f64,
    /// Deletion ratio (against the baseline) above which reconciliation
    /// refuses to proceed.
    pub max_deletion_ratio: f64,
}

#[derive(Debug, Deserialize)]
pub struct Catalog {
    pub datasets: Vec<DatasetSpec>,
}

impl Catalog {
    /// Look up the spec for one dataset.
    #[must_use]
    pub fn spec(&self, dataset: Dataset) -> Option<&DatasetSpec> {
        self.datasets.iter().find(|s| s.dataset == dataset)
    }
}

/// Load and validate the dataset catalog from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails
/// validation (duplicate datasets, missing entries, bad thresholds).
pub fn load_catalog(path: &Path) -> Result<Catalog, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::CatalogIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let catalog: Catalog = serde_yaml::from_str(&content)?;
    validate_catalog(&catalog)?;

    Ok(catalog)
}

fn validate_catalog(catalog: &Catalog) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for spec in &catalog.datasets {
        if !seen.insert(spec.dataset) {
            return Err(ConfigError::Validation(format!(
                "duplicate catalog entry for dataset '{}'",
                spec.dataset
            )));
        }

        if spec.member.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "dataset '{}' has an empty member file name",
                spec.dataset
            )));
        }

        if spec.required_columns.is_empty() {
            return Err(ConfigError::Validation(format!(
                "dataset '{}' declares no required columns",
                spec.dataset
            )));
        }

        if !(0.0..=1.0).contains(&spec.max_rejection_ratio) {
            return Err(ConfigError::Validation(format!(
                "dataset '{}' has max_rejection_ratio {} outside [0, 1]",
                spec.dataset, spec.max_rejection_ratio
            )));
        }

        if !(0.0..=1.0).contains(&spec.max_deletion_ratio) {
            return Err(ConfigError::Validation(format!(
                "dataset '{}' has max_deletion_ratio {} outside [0, 1]",
                spec.dataset, spec.max_deletion_ratio
            )));
        }
    }

    for dataset in Dataset::all() {
        if catalog.spec(dataset).is_none() {
            return Err(ConfigError::Validation(format!(
                "catalog is missing an entry for dataset '{dataset}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "datasets_test.rs"]
mod tests;
