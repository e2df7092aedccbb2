use thiserror::Error;

pub mod app_config;
pub mod config;
pub mod datasets;
pub mod delta;
pub mod records;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use datasets::{load_catalog, Catalog, Dataset, DatasetSpec, SourceEncoding};
pub use delta::{DatasetDelta, Delta};
pub use records::{
    ExclusivityRecord, PatentRecord, ProductRecord, RecordBatch, RecordIdentity,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read dataset catalog at {path}: {source}")]
    CatalogIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset catalog: {0}")]
    CatalogParse(#[from] serde_yaml::Error),

    #[error("catalog validation failed: {0}")]
    Validation(String),
}
