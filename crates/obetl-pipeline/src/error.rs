use obetl_core::Dataset;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] obetl_source::SourceError),

    #[error(transparent)]
    Db(#[from] obetl_db::DbError),

    #[error(transparent)]
    Config(#[from] obetl_core::ConfigError),

    #[error(
        "dataset {dataset}: {rejected} of {total} rows rejected, above the {max_ratio} threshold — \
         refusing to load what looks like a wholesale format change"
    )]
    RejectionRateExceeded {
        dataset: Dataset,
        rejected: usize,
        total: usize,
        max_ratio: f64,
    },

    #[error(
        "dataset {dataset}: {deletions} deletions against a baseline of {baseline} keys, above \
         the {max_ratio} threshold — refusing to apply what looks like data loss"
    )]
    DeletionSpike {
        dataset: Dataset,
        deletions: usize,
        baseline: usize,
        max_ratio: f64,
    },

    #[error("dataset {dataset} is not present in the fetched archive")]
    MissingDocument { dataset: Dataset },

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether retrying the whole per-dataset pipeline can help.
    ///
    /// Transient fetch failures and destination write failures are worth a
    /// retry — a rolled-back load left the baseline untouched, so the retry
    /// reprocesses the same delta. Guard-rail trips, schema drift,
    /// configuration problems, and cancellation are not: they need a human
    /// or a different run, and retrying would just repeat them.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Source(e) => e.is_transient(),
            PipelineError::Db(e) => matches!(e, obetl_db::DbError::Sqlx(_)),
            PipelineError::Config(_)
            | PipelineError::RejectionRateExceeded { .. }
            | PipelineError::DeletionSpike { .. }
            | PipelineError::MissingDocument { .. }
            | PipelineError::Cancelled => false,
        }
    }
}
