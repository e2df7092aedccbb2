use obetl_core::Dataset;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download link not found (404): {url}")]
    NotFound { url: String },

    #[error("rate limited by source (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("invalid archive: {reason}")]
    Archive { reason: String },

    #[error("archive is missing required member file '{member}'")]
    MissingMember { member: String },

    #[error("dataset {dataset} is missing required column '{column}'")]
    MissingColumn { dataset: Dataset, column: String },

    #[error("dataset {dataset} file has no header line")]
    EmptyFile { dataset: Dataset },
}

impl SourceError {
    /// Whether the error is a transient condition worth retrying.
    ///
    /// Transient: network-level failures (timeout, connection reset), HTTP
    /// 5xx, and 429 rate limiting. Everything else — a dead download link,
    /// a malformed archive, schema drift — will not be fixed by retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            SourceError::RateLimited { .. } => true,
            SourceError::UnexpectedStatus { status, .. } => (500..=599).contains(status),
            SourceError::NotFound { .. }
            | SourceError::Archive { .. }
            | SourceError::MissingMember { .. }
            | SourceError::MissingColumn { .. }
            | SourceError::EmptyFile { .. } => false,
        }
    }
}
