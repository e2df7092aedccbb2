use chrono::{DateTime, Utc};
use obetl_core::Dataset;

/// One fetched upstream member file, ready for parsing.
///
/// Owned transiently by the fetch stage and consumed by the parser; never
/// persisted.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub dataset: Dataset,
    /// Raw member bytes. Empty when `unchanged` is set — downstream stages
    /// short-circuit instead of reparsing.
    pub content: Vec<u8>,
    /// Checksum of the whole downloaded archive this member came from.
    pub archive_checksum: String,
    /// Checksum of this member's bytes.
    pub member_checksum: String,
    pub fetched_at: DateTime<Utc>,
    pub http_status: u16,
    pub unchanged: bool,
}

/// Result of one archive download covering all catalog datasets.
#[derive(Debug)]
pub struct ArchiveFetch {
    /// SHA-256 of the archive body, hex-encoded.
    pub checksum: String,
    pub fetched_at: DateTime<Utc>,
    pub http_status: u16,
    /// Set when the archive checksum matches the last successful load; the
    /// member documents then carry no content.
    pub unchanged: bool,
    pub documents: Vec<SourceDocument>,
}

impl ArchiveFetch {
    /// The document for one dataset, if the catalog requested it.
    #[must_use]
    pub fn document(&self, dataset: Dataset) -> Option<&SourceDocument> {
        self.documents.iter().find(|d| d.dataset == dataset)
    }
}
