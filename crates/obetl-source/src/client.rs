//! HTTP client for the Orange Book archive download.
//!
//! The FDA endpoint sits behind bot mitigation that rejects bare automated
//! clients, so every request presents a realistic desktop-browser
//! fingerprint: a current Chrome User-Agent plus the header set a browser
//! would send on a download click. The TLS layer is rustls as configured by
//! reqwest; header shape is the part we own.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;

use obetl_core::{DatasetSpec, SourceEncoding};

use crate::archive::extract_members;
use crate::error::SourceError;
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::types::{ArchiveFetch, SourceDocument};

/// Referer presented with the download request; the real download link is
/// reached from this page.
const ORANGE_BOOK_PAGE: &str =
    "https://www.fda.gov/drugs/drug-approvals-and-databases/orange-book-data-files";

/// HTTP client for the Orange Book ZIP archive.
///
/// Handles checksum-based change detection, typed status errors, and
/// transparent retry of transient failures per the configured
/// [`RetryPolicy`]. Does not touch any persisted state — the caller supplies
/// the last known checksum and decides what to do with an unchanged result.
pub struct OrangeBookClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OrangeBookClient {
    /// Creates a client with the given timeout, User-Agent, and retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed (e.g., invalid TLS config).
    pub fn new(
        timeout_secs: u64,
        user_agent: &str,
        policy: RetryPolicy,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, policy })
    }

    /// Downloads the archive and resolves one [`SourceDocument`] per catalog
    /// dataset.
    ///
    /// If the archive's SHA-256 equals `last_checksum`, the member files are
    /// not extracted at all: the returned documents carry the `unchanged`
    /// flag and empty content so downstream stages can short-circuit.
    ///
    /// # Errors
    ///
    /// - [`SourceError::NotFound`] — 404; the published download link is
    ///   dead, which means the upstream page layout changed (not retried).
    /// - [`SourceError::RateLimited`] — 429 after all retries exhausted.
    /// - [`SourceError::UnexpectedStatus`] — other non-2xx (5xx retried,
    ///   4xx not).
    /// - [`SourceError::Http`] — network or TLS failure after retries.
    /// - [`SourceError::Archive`] / [`SourceError::MissingMember`] — body is
    ///   not the expected archive.
    pub async fn fetch_archive(
        &self,
        url: &str,
        specs: &[&DatasetSpec],
        last_checksum: Option<&str>,
    ) -> Result<ArchiveFetch, SourceError> {
        let (body, http_status) = retry_with_policy(self.policy, SourceError::is_transient, || {
            self.fetch_once(url)
        })
        .await?;

        let checksum = format!("{:x}", Sha256::digest(&body));
        let fetched_at = Utc::now();

        if last_checksum == Some(checksum.as_str()) {
            tracing::info!(checksum = %checksum, "archive unchanged since last successful load");
            let documents = specs
                .iter()
                .map(|spec| SourceDocument {
                    dataset: spec.dataset,
                    content: Vec::new(),
                    archive_checksum: checksum.clone(),
                    member_checksum: String::new(),
                    fetched_at,
                    http_status,
                    unchanged: true,
                })
                .collect();
            return Ok(ArchiveFetch {
                checksum,
                fetched_at,
                http_status,
                unchanged: true,
                documents,
            });
        }

        let zipped: Vec<&DatasetSpec> = specs
            .iter()
            .copied()
            .filter(|s| s.encoding == SourceEncoding::ZippedDelimited)
            .collect();
        let mut members = if zipped.is_empty() {
            std::collections::HashMap::new()
        } else {
            extract_members(&body, &zipped)?
        };

        let mut documents = Vec::with_capacity(specs.len());
        for spec in specs {
            let content = match spec.encoding {
                SourceEncoding::ZippedDelimited => {
                    members
                        .remove(&spec.dataset)
                        .ok_or_else(|| SourceError::MissingMember {
                            member: spec.member.clone(),
                        })?
                }
                // A plain-text source: the body itself is the dataset file.
                SourceEncoding::Delimited => body.clone(),
            };
            documents.push(SourceDocument {
                dataset: spec.dataset,
                member_checksum: format!("{:x}", Sha256::digest(&content)),
                content,
                archive_checksum: checksum.clone(),
                fetched_at,
                http_status,
                unchanged: false,
            });
        }

        tracing::info!(
            checksum = %checksum,
            bytes = body.len(),
            datasets = documents.len(),
            "fetched fresh archive"
        );

        Ok(ArchiveFetch {
            checksum,
            fetched_at,
            http_status,
            unchanged: false,
            documents,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<(Vec<u8>, u16), SourceError> {
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::REFERER, ORANGE_BOOK_PAGE)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header("sec-ch-ua", "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\"")
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-ch-ua-platform", "\"Linux\"")
            .header("upgrade-insecure-requests", "1")
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(SourceError::RateLimited { retry_after_secs });
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound {
                url: url.to_owned(),
            });
        }

        if !status.is_success() {
            return Err(SourceError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        let code = status.as_u16();
        let body = response.bytes().await?;
        Ok((body.to_vec(), code))
    }
}
