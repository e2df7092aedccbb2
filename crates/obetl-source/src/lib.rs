//! Fetching and parsing of Orange Book source files.
//!
//! [`OrangeBookClient`] retrieves the upstream archive with a browser-grade
//! request fingerprint and detects unchanged content by checksum;
//! [`parse`](parse::parse) turns raw member bytes into typed records plus
//! per-row rejections. Both sides are driven by the dataset catalog in
//! `obetl-core` — nothing about file layout is hard-coded here.

mod archive;
mod client;
mod error;
pub mod parse;
pub mod retry;
mod types;

pub use client::OrangeBookClient;
pub use error::SourceError;
pub use parse::{parse, ParseOutcome, ParseRejection};
pub use retry::{retry_with_policy, RetryPolicy};
pub use types::{ArchiveFetch, SourceDocument};
