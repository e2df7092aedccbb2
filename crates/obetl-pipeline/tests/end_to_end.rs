//! End-to-end pipeline tests: a wiremock server stands in for the FDA
//! download endpoint and `#[sqlx::test]` provides a fresh migrated database,
//! so a full fetch → parse → reconcile → load cycle runs with no real
//! network or shared state.

use std::io::{Cursor, Write};
use std::path::PathBuf;

use sqlx::PgPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use obetl_core::{
    AppConfig, Catalog, Dataset, DatasetSpec, Environment, SourceEncoding,
};
use obetl_db::{last_successful_checksum, list_recent_runs};
use obetl_pipeline::{DatasetOutcome, PipelineRunner, RunOutcome};

const PRODUCTS_HEADER: &str = "Ingredient~DF;Route~Trade_Name~Applicant~Strength~Appl_Type~Appl_No~Product_No~TE_Code~Approval_Date~RLD~RS~Type";
const PATENTS_HEADER: &str = "Appl_Type~Appl_No~Product_No~Patent_No~Patent_Expire_Date_Text~Drug_Substance_Flag~Drug_Product_Flag~Patent_Use_Code~Delist_Flag~Submission_Date";
const EXCLUSIVITY_HEADER: &str = "Appl_Type~Appl_No~Product_No~Exclusivity_Code~Exclusivity_Date";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn product_line(prod: &str, strength: &str) -> String {
    format!(
        "BUDESONIDE~CAPSULE;ORAL~ENTOCORT EC~ASTRAZENECA~{strength}~N~21324~{prod}~AB~Oct 2, 2001~Yes~No~RX"
    )
}

fn default_files() -> (String, String, String) {
    let products = format!(
        "{PRODUCTS_HEADER}\n{}\n{}\n",
        product_line("1", "3MG"),
        product_line("2", "6MG"),
    );
    let patents = format!(
        "{PATENTS_HEADER}\nN~21324~1~6423340~May 15, 2020~Y~N~U-829~N~Feb 3, 2015\n"
    );
    let exclusivity = format!("{EXCLUSIVITY_HEADER}\nN~21324~1~NCE~Oct 2, 2026\n");
    (products, patents, exclusivity)
}

fn zip_bytes(products: &str, patents: &str, exclusivity: &str) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in [
            ("products.txt", products),
            ("patent.txt", patents),
            ("exclusivity.txt", exclusivity),
        ] {
            writer.start_file(name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn spec(
    dataset: Dataset,
    member: &str,
    header: &str,
    min_expected_rows: usize,
    max_rejection_ratio: f64,
) -> DatasetSpec {
    DatasetSpec {
        dataset,
        member: member.to_string(),
        encoding: SourceEncoding::ZippedDelimited,
        delimiter: '~',
        required_columns: header.split('~').map(str::to_string).collect(),
        min_expected_rows,
        max_rejection_ratio,
        max_deletion_ratio: 0.5,
    }
}

fn test_catalog(min_expected_rows: usize, max_rejection_ratio: f64) -> Catalog {
    Catalog {
        datasets: vec![
            spec(
                Dataset::Products,
                "products.txt",
                PRODUCTS_HEADER,
                min_expected_rows,
                max_rejection_ratio,
            ),
            spec(
                Dataset::Patents,
                "patent.txt",
                PATENTS_HEADER,
                0,
                max_rejection_ratio,
            ),
            spec(
                Dataset::Exclusivity,
                "exclusivity.txt",
                EXCLUSIVITY_HEADER,
                0,
                max_rejection_ratio,
            ),
        ],
    }
}

fn test_config(source_url: String) -> AppConfig {
    AppConfig {
        database_url: "postgres://unused-pool-is-injected".to_string(),
        env: Environment::Test,
        log_level: "warn".to_string(),
        catalog_path: PathBuf::from("unused"),
        source_base_url: source_url,
        db_max_connections: 5,
        db_min_connections: 1,
        db_acquire_timeout_secs: 10,
        fetch_timeout_secs: 5,
        fetch_user_agent: "obetl-test/0.1".to_string(),
        fetch_max_retries: 0,
        fetch_retry_backoff_base_ms: 0,
        max_concurrent_datasets: 2,
        pipeline_max_retries: 0,
    }
}

async fn serve_once_then(server: &MockServer, first: Vec<u8>, then: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path("/orange-book.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(first))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orange-book.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(then))
        .mount(server)
        .await;
}

fn runner_for(pool: PgPool, server: &MockServer, catalog: Catalog) -> PipelineRunner {
    let config = test_config(format!("{}/orange-book.zip", server.uri()));
    PipelineRunner::new(pool, config, catalog).expect("runner should build")
}

// ---------------------------------------------------------------------------
// Scenario A: first run against a fresh database
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn first_run_inserts_everything(pool: PgPool) {
    let server = MockServer::start().await;
    let (products, patents, exclusivity) = default_files();
    Mock::given(method("GET"))
        .and(path("/orange-book.zip"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(zip_bytes(&products, &patents, &exclusivity)),
        )
        .mount(&server)
        .await;

    let runner = runner_for(pool.clone(), &server, test_catalog(0, 0.02));
    let summary = runner.run(&Dataset::all()).await;

    assert_eq!(summary.outcome(), RunOutcome::Success);
    assert_eq!(summary.reports.len(), 3);

    let products_report = &summary.reports[0];
    assert_eq!(products_report.dataset, Dataset::Products);
    assert_eq!(products_report.outcome, DatasetOutcome::Loaded);
    let run = products_report.run.as_ref().expect("audit row expected");
    assert_eq!(run.inserted, 2);
    assert_eq!(run.updated, 0);
    assert_eq!(run.unchanged, 0);

    let baseline = obetl_db::fetch_baseline(&pool, Dataset::Products)
        .await
        .unwrap();
    assert_eq!(baseline.len(), 2);

    let patents_baseline = obetl_db::fetch_baseline(&pool, Dataset::Patents)
        .await
        .unwrap();
    assert_eq!(patents_baseline.len(), 1);
}

// ---------------------------------------------------------------------------
// Scenario B: identical second run short-circuits
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn unchanged_second_run_never_touches_the_loader(pool: PgPool) {
    let server = MockServer::start().await;
    let (products, patents, exclusivity) = default_files();
    Mock::given(method("GET"))
        .and(path("/orange-book.zip"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(zip_bytes(&products, &patents, &exclusivity)),
        )
        .mount(&server)
        .await;

    let runner = runner_for(pool.clone(), &server, test_catalog(0, 0.02));
    let first = runner.run(&Dataset::all()).await;
    assert_eq!(first.outcome(), RunOutcome::Success);
    let runs_after_first = list_recent_runs(&pool, 100).await.unwrap().len();

    let second = runner.run(&Dataset::all()).await;
    assert_eq!(second.outcome(), RunOutcome::Success);
    for report in &second.reports {
        assert_eq!(report.outcome, DatasetOutcome::Unchanged);
        assert!(report.run.is_none());
    }

    // No new audit rows: an unchanged fetch creates no LoadRun.
    let runs_after_second = list_recent_runs(&pool, 100).await.unwrap().len();
    assert_eq!(runs_after_first, runs_after_second);
}

// ---------------------------------------------------------------------------
// Scenario C: one row changed
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn changed_row_is_a_single_update(pool: PgPool) {
    let server = MockServer::start().await;
    let (products, patents, exclusivity) = default_files();
    let changed_products = format!(
        "{PRODUCTS_HEADER}\n{}\n{}\n",
        product_line("1", "3MG"),
        product_line("2", "9MG"),
    );
    serve_once_then(
        &server,
        zip_bytes(&products, &patents, &exclusivity),
        zip_bytes(&changed_products, &patents, &exclusivity),
    )
    .await;

    let runner = runner_for(pool.clone(), &server, test_catalog(0, 0.02));
    runner.run(&Dataset::all()).await;
    let summary = runner.run(&Dataset::all()).await;

    assert_eq!(summary.outcome(), RunOutcome::Success);
    let products_run = summary.reports[0].run.as_ref().expect("audit row expected");
    assert_eq!(products_run.inserted, 0);
    assert_eq!(products_run.updated, 1);
    assert_eq!(products_run.unchanged, 1);
    assert_eq!(products_run.deleted, 0);

    // Patents and exclusivity saw the same archive change but identical
    // member content: everything unchanged, nothing rewritten.
    let patents_run = summary.reports[1].run.as_ref().expect("audit row expected");
    assert_eq!(patents_run.inserted, 0);
    assert_eq!(patents_run.unchanged, 1);

    let row = obetl_db::products::get_product(&pool, "021324:002")
        .await
        .unwrap();
    assert_eq!(row.strength.as_deref(), Some("9MG"));
}

// ---------------------------------------------------------------------------
// Guard rails
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn rejection_spike_fails_one_dataset_and_leaves_the_rest(pool: PgPool) {
    let server = MockServer::start().await;
    let (_, patents, exclusivity) = default_files();
    // Every product row is garbage: the file "parsed" but the format
    // evidently changed wholesale.
    let broken_products = format!("{PRODUCTS_HEADER}\ngarbage\nmore garbage\n");
    Mock::given(method("GET"))
        .and(path("/orange-book.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zip_bytes(&broken_products, &patents, &exclusivity)),
        )
        .mount(&server)
        .await;

    let runner = runner_for(pool.clone(), &server, test_catalog(0, 0.02));
    let summary = runner.run(&Dataset::all()).await;

    assert_eq!(summary.outcome(), RunOutcome::Partial);
    let products_report = &summary.reports[0];
    assert_eq!(products_report.outcome, DatasetOutcome::Failed);
    assert!(products_report
        .error
        .as_deref()
        .unwrap()
        .contains("rejected"));

    // Patents and exclusivity loaded despite the products failure.
    assert_eq!(summary.reports[1].outcome, DatasetOutcome::Loaded);
    assert_eq!(summary.reports[2].outcome, DatasetOutcome::Loaded);

    // The failure is on the audit trail.
    let runs = list_recent_runs(&pool, 10).await.unwrap();
    assert!(runs
        .iter()
        .any(|r| r.dataset == "products" && r.status == "failed"));

    // Nothing landed in products or its baseline.
    let baseline = obetl_db::fetch_baseline(&pool, Dataset::Products)
        .await
        .unwrap();
    assert!(baseline.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn truncated_file_suppresses_deletions(pool: PgPool) {
    let server = MockServer::start().await;
    let (products, patents, exclusivity) = default_files();
    // Second release lost a product row and sits below min_expected_rows.
    let truncated_products = format!("{PRODUCTS_HEADER}\n{}\n", product_line("1", "3MG"));
    serve_once_then(
        &server,
        zip_bytes(&products, &patents, &exclusivity),
        zip_bytes(&truncated_products, &patents, &exclusivity),
    )
    .await;

    let runner = runner_for(pool.clone(), &server, test_catalog(2, 0.02));
    let first = runner.run(&Dataset::all()).await;
    assert_eq!(first.outcome(), RunOutcome::Success);

    let summary = runner.run(&Dataset::all()).await;
    assert_eq!(summary.outcome(), RunOutcome::Success);
    let products_run = summary.reports[0].run.as_ref().expect("audit row expected");
    assert_eq!(products_run.deleted, 0);
    assert_eq!(products_run.unchanged, 1);

    // The vanished key is still active and still in the baseline: a partial
    // file is never evidence of a real-world deletion.
    let row = obetl_db::products::get_product(&pool, "021324:002")
        .await
        .unwrap();
    assert!(row.active);
    let baseline = obetl_db::fetch_baseline(&pool, Dataset::Products)
        .await
        .unwrap();
    assert_eq!(baseline.len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn full_file_applies_deletions(pool: PgPool) {
    let server = MockServer::start().await;
    let (products, patents, exclusivity) = default_files();
    let shrunk_products = format!("{PRODUCTS_HEADER}\n{}\n", product_line("1", "3MG"));
    serve_once_then(
        &server,
        zip_bytes(&products, &patents, &exclusivity),
        zip_bytes(&shrunk_products, &patents, &exclusivity),
    )
    .await;

    // min_expected_rows = 0: the shrunk file still counts as full.
    let runner = runner_for(pool.clone(), &server, test_catalog(0, 0.02));
    runner.run(&Dataset::all()).await;
    let summary = runner.run(&Dataset::all()).await;

    assert_eq!(summary.outcome(), RunOutcome::Success);
    let products_run = summary.reports[0].run.as_ref().expect("audit row expected");
    assert_eq!(products_run.deleted, 1);

    let row = obetl_db::products::get_product(&pool, "021324:002")
        .await
        .unwrap();
    assert!(!row.active);
    assert!(row.delisted_at.is_some());
}

// ---------------------------------------------------------------------------
// Cancellation and failure bookkeeping
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn cancelled_run_fails_cleanly_at_stage_boundaries(pool: PgPool) {
    let server = MockServer::start().await;
    let (products, patents, exclusivity) = default_files();
    Mock::given(method("GET"))
        .and(path("/orange-book.zip"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(zip_bytes(&products, &patents, &exclusivity)),
        )
        .mount(&server)
        .await;

    let runner = runner_for(pool.clone(), &server, test_catalog(0, 0.02));
    runner
        .cancel_handle()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let summary = runner.run(&Dataset::all()).await;

    assert_eq!(summary.outcome(), RunOutcome::Failure);
    for report in &summary.reports {
        assert_eq!(report.outcome, DatasetOutcome::Failed);
        assert!(report.error.as_deref().unwrap().contains("cancelled"));
    }

    // Nothing was loaded.
    let baseline = obetl_db::fetch_baseline(&pool, Dataset::Products)
        .await
        .unwrap();
    assert!(baseline.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn fetch_failure_records_a_failed_run_per_dataset(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orange-book.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let runner = runner_for(pool.clone(), &server, test_catalog(0, 0.02));
    let summary = runner.run(&Dataset::all()).await;

    assert_eq!(summary.outcome(), RunOutcome::Failure);
    let runs = list_recent_runs(&pool, 10).await.unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.status == "failed"));
    assert!(runs.iter().all(|r| r.source_checksum.is_none()));

    // A failed fetch leaves no checksum to short-circuit against.
    let checksum = last_successful_checksum(&pool, Dataset::Products)
        .await
        .unwrap();
    assert!(checksum.is_none());
}
