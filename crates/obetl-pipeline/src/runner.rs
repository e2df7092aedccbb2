//! Pipeline orchestration: one archive fetch, then per-dataset
//! parse → reconcile → load in dependency order.
//!
//! Products always completes before patents and exclusivity start; those two
//! run concurrently, bounded by the configured worker limit. A failed
//! dataset never stops the others — the run summary carries the worst
//! per-dataset outcome for the process boundary to turn into an exit code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::PgPool;

use obetl_core::{AppConfig, Catalog, ConfigError, Dataset, DatasetSpec, RecordBatch};
use obetl_db::{
    apply_delta, fetch_baseline, insert_failed_run, last_successful_checksum, LoadRunRow,
};
use obetl_source::{parse, retry_with_policy, ArchiveFetch, OrangeBookClient, RetryPolicy};

use crate::error::PipelineError;
use crate::reconcile::{enforce_deletion_guard, reconcile_batch};

/// Per-dataset pipeline stages, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Fetching,
    Parsing,
    Reconciling,
    Loading,
    Completed,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Fetching => "fetching",
            Stage::Parsing => "parsing",
            Stage::Reconciling => "reconciling",
            Stage::Loading => "loading",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal state of one dataset within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetOutcome {
    /// Delta applied and audit row written.
    Loaded,
    /// Source content unchanged; nothing touched the destination.
    Unchanged,
    Failed,
}

/// What happened to one dataset.
#[derive(Debug)]
pub struct DatasetReport {
    pub dataset: Dataset,
    pub outcome: DatasetOutcome,
    /// The succeeded audit row, when one was written.
    pub run: Option<LoadRunRow>,
    pub error: Option<String>,
}

/// Aggregate result for the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Some datasets loaded, some failed.
    Partial,
    /// Nothing loaded.
    Failure,
}

#[derive(Debug)]
pub struct RunSummary {
    pub reports: Vec<DatasetReport>,
}

impl RunSummary {
    /// Worst-case aggregate across all datasets.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        let failed = self
            .reports
            .iter()
            .filter(|r| r.outcome == DatasetOutcome::Failed)
            .count();
        if failed == 0 {
            RunOutcome::Success
        } else if failed == self.reports.len() {
            RunOutcome::Failure
        } else {
            RunOutcome::Partial
        }
    }

    fn all_failed(reports: Vec<DatasetReport>) -> Self {
        Self { reports }
    }
}

/// Drives the full ETL for the Orange Book archive.
pub struct PipelineRunner {
    pool: PgPool,
    config: AppConfig,
    catalog: Catalog,
    client: OrangeBookClient,
    cancel: Arc<AtomicBool>,
}

impl PipelineRunner {
    /// Builds a runner and its HTTP client from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the HTTP client cannot be
    /// constructed.
    pub fn new(pool: PgPool, config: AppConfig, catalog: Catalog) -> Result<Self, PipelineError> {
        let client = OrangeBookClient::new(
            config.fetch_timeout_secs,
            &config.fetch_user_agent,
            RetryPolicy::new(config.fetch_max_retries, config.fetch_retry_backoff_base_ms),
        )?;
        Ok(Self {
            pool,
            config,
            catalog,
            client,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag checked at stage boundaries; setting it aborts the run between
    /// stages. An in-flight loader transaction is never interrupted.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Runs the pipeline for the given datasets and reports per-dataset
    /// outcomes. Never returns an error: every failure is absorbed into the
    /// summary so independent datasets keep going.
    pub async fn run(&self, datasets: &[Dataset]) -> RunSummary {
        let started_at = Utc::now();

        // Dependency order regardless of how the caller listed them.
        let ordered: Vec<Dataset> = Dataset::all()
            .into_iter()
            .filter(|d| datasets.contains(d))
            .collect();

        tracing::info!(datasets = ?ordered, stage = %Stage::Fetching, "starting pipeline run");

        let last_checksum = match self.shared_last_checksum(&ordered).await {
            Ok(checksum) => checksum,
            Err(e) => {
                return self
                    .fail_all(&ordered, &format!("failed to read load history: {e}"), started_at)
                    .await;
            }
        };

        let specs: Vec<&DatasetSpec> = ordered
            .iter()
            .filter_map(|d| self.catalog.spec(*d))
            .collect();

        let fetch = match self
            .client
            .fetch_archive(&self.config.source_base_url, &specs, last_checksum.as_deref())
            .await
        {
            Ok(fetch) => fetch,
            Err(e) => {
                return self.fail_all(&ordered, &e.to_string(), started_at).await;
            }
        };

        if fetch.unchanged {
            // No loader transaction and no audit row: the previous succeeded
            // run already describes this content.
            tracing::info!(checksum = %fetch.checksum, "source unchanged — nothing to load");
            let reports = ordered
                .into_iter()
                .map(|dataset| DatasetReport {
                    dataset,
                    outcome: DatasetOutcome::Unchanged,
                    run: None,
                    error: None,
                })
                .collect();
            return RunSummary { reports };
        }

        let mut reports = Vec::with_capacity(ordered.len());

        if ordered.contains(&Dataset::Products) {
            let report = self
                .process_dataset(Dataset::Products, &fetch, started_at)
                .await;
            if report.outcome == DatasetOutcome::Failed {
                tracing::warn!(
                    "products load failed — continuing with dependent datasets; referential \
                     gaps will be reported, not fatal"
                );
            }
            reports.push(report);
        }

        let dependents: Vec<Dataset> = ordered
            .iter()
            .copied()
            .filter(|d| *d != Dataset::Products)
            .collect();
        let concurrency = self.config.max_concurrent_datasets.max(1);
        let dependent_reports: Vec<DatasetReport> = stream::iter(
            dependents
                .into_iter()
                .map(|dataset| self.process_dataset(dataset, &fetch, started_at)),
        )
        .buffer_unordered(concurrency)
        .collect()
        .await;
        reports.extend(dependent_reports);

        // Stable report order for logs and exit-code tests.
        reports.sort_by_key(|r| Dataset::all().iter().position(|d| *d == r.dataset));

        let summary = RunSummary { reports };
        tracing::info!(outcome = ?summary.outcome(), "pipeline run finished");
        summary
    }

    /// Runs parse → reconcile → load for one dataset, retrying the whole
    /// stage sequence on retryable errors per the configured policy.
    async fn process_dataset(
        &self,
        dataset: Dataset,
        fetch: &ArchiveFetch,
        started_at: DateTime<Utc>,
    ) -> DatasetReport {
        let policy = RetryPolicy::new(
            self.config.pipeline_max_retries,
            self.config.fetch_retry_backoff_base_ms,
        );

        let result = retry_with_policy(policy, PipelineError::is_retryable, || {
            self.pipeline_once(dataset, fetch, started_at)
        })
        .await;

        match result {
            Ok(run) => {
                tracing::info!(dataset = %dataset, stage = %Stage::Completed, "dataset loaded");
                DatasetReport {
                    dataset,
                    outcome: DatasetOutcome::Loaded,
                    run: Some(run),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(dataset = %dataset, stage = %Stage::Failed, error = %e, "dataset failed");
                self.record_failure_best_effort(dataset, Some(&fetch.checksum), &e, started_at)
                    .await;
                DatasetReport {
                    dataset,
                    outcome: DatasetOutcome::Failed,
                    run: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn pipeline_once(
        &self,
        dataset: Dataset,
        fetch: &ArchiveFetch,
        started_at: DateTime<Utc>,
    ) -> Result<LoadRunRow, PipelineError> {
        let spec = self.catalog.spec(dataset).ok_or_else(|| {
            PipelineError::Config(ConfigError::Validation(format!(
                "no catalog entry for dataset '{dataset}'"
            )))
        })?;
        let document = fetch
            .document(dataset)
            .ok_or(PipelineError::MissingDocument { dataset })?;

        self.check_cancelled()?;
        tracing::info!(dataset = %dataset, stage = %Stage::Parsing, "stage entered");
        let outcome = parse(spec, &document.content)?;
        let total_rows = outcome.batch.len() + outcome.rejections.len();
        if total_rows > 0 && outcome.rejection_ratio() > spec.max_rejection_ratio {
            return Err(PipelineError::RejectionRateExceeded {
                dataset,
                rejected: outcome.rejections.len(),
                total: total_rows,
                max_ratio: spec.max_rejection_ratio,
            });
        }

        // Patents and exclusivity reference products only conceptually;
        // dangling references are reported, never fatal.
        if dataset != Dataset::Products {
            let product_keys = fetch_baseline(&self.pool, Dataset::Products).await?;
            let orphans = count_orphans(&outcome.batch, &product_keys);
            if orphans > 0 {
                tracing::warn!(
                    dataset = %dataset,
                    orphans,
                    "records reference application/product pairs not present in products"
                );
            }
        }

        self.check_cancelled()?;
        tracing::info!(dataset = %dataset, stage = %Stage::Reconciling, "stage entered");
        let baseline = fetch_baseline(&self.pool, dataset).await?;
        let baseline_len = baseline.len();

        let document_is_full = outcome.batch.len() >= spec.min_expected_rows;
        if !document_is_full {
            tracing::warn!(
                dataset = %dataset,
                rows = outcome.batch.len(),
                min_expected = spec.min_expected_rows,
                "batch below minimum row count — treating file as partial, deletions suppressed"
            );
        }

        let delta = reconcile_batch(outcome.batch, &baseline, document_is_full);
        enforce_deletion_guard(dataset, &delta, baseline_len, spec.max_deletion_ratio)?;
        tracing::info!(
            dataset = %dataset,
            inserted = delta.inserted(),
            updated = delta.updated(),
            unchanged = delta.unchanged(),
            deleted = delta.deleted(),
            rejected = outcome.rejections.len(),
            "rows classified"
        );

        self.check_cancelled()?;
        tracing::info!(dataset = %dataset, stage = %Stage::Loading, "stage entered");
        let run = apply_delta(
            &self.pool,
            &delta,
            &fetch.checksum,
            outcome.rejections.len(),
            started_at,
        )
        .await?;

        Ok(run)
    }

    /// The checksum to compare a fresh download against: only meaningful
    /// when every requested dataset's last succeeded run saw the same
    /// archive. A dataset that failed last time must not be skipped just
    /// because its siblings loaded.
    async fn shared_last_checksum(
        &self,
        datasets: &[Dataset],
    ) -> Result<Option<String>, PipelineError> {
        let mut shared: Option<String> = None;
        for dataset in datasets {
            let Some(checksum) = last_successful_checksum(&self.pool, *dataset).await? else {
                return Ok(None);
            };
            match &shared {
                None => shared = Some(checksum),
                Some(existing) if *existing == checksum => {}
                Some(_) => return Ok(None),
            }
        }
        Ok(shared)
    }

    async fn fail_all(
        &self,
        datasets: &[Dataset],
        error: &str,
        started_at: DateTime<Utc>,
    ) -> RunSummary {
        tracing::error!(error = %error, "run failed before any dataset could load");
        let mut reports = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            if let Err(e) =
                insert_failed_run(&self.pool, *dataset, None, error, started_at).await
            {
                tracing::error!(dataset = %dataset, error = %e, "failed to record failed run");
            }
            reports.push(DatasetReport {
                dataset: *dataset,
                outcome: DatasetOutcome::Failed,
                run: None,
                error: Some(error.to_string()),
            });
        }
        RunSummary::all_failed(reports)
    }

    async fn record_failure_best_effort(
        &self,
        dataset: Dataset,
        checksum: Option<&str>,
        error: &PipelineError,
        started_at: DateTime<Utc>,
    ) {
        if let Err(e) =
            insert_failed_run(&self.pool, dataset, checksum, &error.to_string(), started_at).await
        {
            tracing::error!(dataset = %dataset, error = %e, "failed to record failed run");
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

/// Counts records whose application/product pair is absent from the loaded
/// products baseline.
fn count_orphans(batch: &RecordBatch, product_keys: &HashMap<String, String>) -> usize {
    let missing =
        |appl: &str, prod: &str| !product_keys.contains_key(&format!("{appl}:{prod}"));
    match batch {
        RecordBatch::Products(_) => 0,
        RecordBatch::Patents(rows) => rows
            .iter()
            .filter(|r| missing(&r.application_number, &r.product_number))
            .count(),
        RecordBatch::Exclusivity(rows) => rows
            .iter()
            .filter(|r| missing(&r.application_number, &r.product_number))
            .count(),
    }
}
