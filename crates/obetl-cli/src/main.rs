use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use obetl_core::Dataset;
use obetl_pipeline::{DatasetOutcome, PipelineRunner, RunOutcome};

/// Exit code for a run where some datasets loaded and some failed.
const EXIT_PARTIAL: i32 = 2;
/// Exit code for a run where nothing loaded.
const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Parser)]
#[command(name = "obetl")]
#[command(about = "FDA Orange Book incremental ETL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the Orange Book archive and load changed records.
    Run {
        /// Restrict the run to a single dataset (products, patents, exclusivity).
        #[arg(long)]
        dataset: Option<String>,
        /// Override the archive download URL.
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Apply pending database migrations.
    Migrate,
    /// Show recent load runs.
    Status {
        /// Number of runs to show.
        #[arg(long, default_value_t = 10)]
        limit: i64,
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = obetl_core::load_app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Run { dataset, base_url } => {
            if let Some(url) = base_url {
                config.source_base_url = url;
            }
            run_pipeline(config, dataset.as_deref()).await
        }
        Commands::Migrate => migrate(&config).await,
        Commands::Status { limit, json } => status(&config, limit, json).await,
    }
}

async fn run_pipeline(
    config: obetl_core::AppConfig,
    dataset_filter: Option<&str>,
) -> anyhow::Result<()> {
    let datasets: Vec<Dataset> = match dataset_filter {
        Some(name) => vec![name.parse()?],
        None => Dataset::all().to_vec(),
    };

    let catalog = obetl_core::load_catalog(&config.catalog_path)?;
    let pool = obetl_db::connect_pool(
        &config.database_url,
        obetl_db::PoolConfig::from_app_config(&config),
    )
    .await?;

    let runner = PipelineRunner::new(pool, config, catalog)?;

    // Ctrl-C aborts between stages; an in-flight load transaction still
    // commits or rolls back cleanly.
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received — cancelling at next stage boundary");
            cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let summary = runner.run(&datasets).await;

    for report in &summary.reports {
        match report.outcome {
            DatasetOutcome::Loaded => {
                let run = report.run.as_ref();
                println!(
                    "{}: loaded (inserted {}, updated {}, unchanged {}, deleted {}, rejected {})",
                    report.dataset,
                    run.map_or(0, |r| r.inserted),
                    run.map_or(0, |r| r.updated),
                    run.map_or(0, |r| r.unchanged),
                    run.map_or(0, |r| r.deleted),
                    run.map_or(0, |r| r.rejected),
                );
            }
            DatasetOutcome::Unchanged => println!("{}: unchanged", report.dataset),
            DatasetOutcome::Failed => println!(
                "{}: FAILED ({})",
                report.dataset,
                report.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    match summary.outcome() {
        RunOutcome::Success => Ok(()),
        RunOutcome::Partial => {
            eprintln!("error: partial failure — some datasets did not load");
            std::process::exit(EXIT_PARTIAL);
        }
        RunOutcome::Failure => {
            eprintln!("error: total failure — nothing loaded");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

async fn migrate(config: &obetl_core::AppConfig) -> anyhow::Result<()> {
    let pool = obetl_db::connect_pool(
        &config.database_url,
        obetl_db::PoolConfig::from_app_config(config),
    )
    .await?;

    let applied = obetl_db::run_migrations(&pool).await?;
    println!("applied {applied} migration(s)");
    Ok(())
}

async fn status(config: &obetl_core::AppConfig, limit: i64, json: bool) -> anyhow::Result<()> {
    let pool = obetl_db::connect_pool(
        &config.database_url,
        obetl_db::PoolConfig::from_app_config(config),
    )
    .await?;

    let runs = obetl_db::list_recent_runs(&pool, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("no load runs recorded");
        return Ok(());
    }

    for run in &runs {
        println!(
            "{} {:<11} {:<9} ins {:>6} upd {:>6} same {:>6} del {:>5} rej {:>5}  {}",
            run.completed_at.format("%Y-%m-%d %H:%M:%S"),
            run.dataset,
            run.status,
            run.inserted,
            run.updated,
            run.unchanged,
            run.deleted,
            run.rejected,
            run.error_message.as_deref().unwrap_or(""),
        );
    }

    for dataset in Dataset::all() {
        let keys = obetl_db::load_state::baseline_len(&pool, dataset).await?;
        println!("baseline {dataset}: {keys} keys");
    }

    Ok(())
}
