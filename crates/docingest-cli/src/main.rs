mod commands;
mod logging;
mod progress;
mod serve;

use std::process;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use docingest_core::model::JobOptions;
use docingest_core::storage::ReviewFilter;
use docingest_core::{AppConfig, IngestEngine};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info};

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> CliResult {
    dotenv().ok();

    // Logging is configured from the config, so its errors go to stderr.
    let config = match docingest_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {}", "Error loading configuration:".red(), err);
            process::exit(1);
        }
    };

    let _guard = logging::init_logger(&config.logging);

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { bind }) => run_serve(config, bind),
        Some(Commands::Process {
            paths,
            scope,
            no_duplicates,
            no_classification,
            workers,
            batch_size,
        }) => {
            let options = JobOptions {
                enable_duplicate_detection: no_duplicates.then_some(false),
                enable_classification: no_classification.then_some(false),
                max_concurrent_workers: workers,
                batch_size,
                scope,
            };
            run_process(config, &paths, options)
        }
        Some(Commands::Jobs { limit, offset }) => run_jobs(config, offset, limit),
        Some(Commands::Stats) => run_stats(config),
        Some(Commands::Rollback { job_id }) => run_rollback(config, job_id),
        Some(Commands::Snapshots {
            job_id,
            limit,
            offset,
        }) => run_snapshots(config, job_id, offset, limit),
        Some(Commands::Pending { customer, project }) => run_pending(
            config,
            ReviewFilter {
                customer,
                project,
                ..ReviewFilter::default()
            },
        ),
        Some(Commands::Confirm { id, category }) => run_confirm(config, id, &category),
        Some(Commands::Purge) => run_purge(config),
        Some(Commands::Recover) => run_recover(config),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {}", err);
        process::exit(1);
    }
    Ok(())
}

fn run_serve(mut config: AppConfig, bind: Option<String>) -> CliResult {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let server = config.server.clone();
    let engine = Arc::new(IngestEngine::open(config)?);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve::start_server(engine, server))
}

fn run_process(config: AppConfig, paths: &[std::path::PathBuf], options: JobOptions) -> CliResult {
    let engine = IngestEngine::open(config)?.with_reporter(Arc::new(CliReporter::new()));
    let job = engine.submit(paths, options)?;
    info!("Job {} submitted with {} files", job.id, job.total_files);
    let job = engine.wait(job.id)?;

    let detail = engine.job(job.id)?;
    for file in detail.files.iter().filter(|f| f.error.is_some()) {
        println!(
            "  {} {}: {}",
            "failed".red(),
            file.path.display(),
            file.error.as_deref().unwrap_or_default()
        );
    }
    info!(
        "Job {} {}: {} processed, {} duplicates, {} queued for review, {} failed",
        job.id,
        job.status.to_string().bold(),
        format!("{}", job.processed_files).green(),
        format!("{}", job.duplicates_found).yellow(),
        format!("{}", job.review_queued).cyan(),
        format!("{}", job.failed_files).red(),
    );
    Ok(())
}

fn run_jobs(config: AppConfig, offset: i64, limit: i64) -> CliResult {
    let engine = IngestEngine::open(config)?;
    let (jobs, total) = engine.jobs(offset, limit)?;
    for job in &jobs {
        println!(
            "{:>6}  {:<12} {:>3}%  {:>5} files  {}",
            job.id,
            job.status.to_string(),
            job.progress,
            job.total_files,
            job.error.as_deref().unwrap_or_default()
        );
    }
    println!("{} of {} jobs", jobs.len(), total);
    Ok(())
}

fn run_stats(config: AppConfig) -> CliResult {
    let engine = IngestEngine::open(config)?;
    println!("{}", serde_json::to_string_pretty(&engine.stats()?)?);
    Ok(())
}

fn run_rollback(config: AppConfig, job_id: i64) -> CliResult {
    let engine = IngestEngine::open(config)?;
    let report = engine.rollback_job(job_id)?;
    for failure in &report.failed {
        println!(
            "  {} snapshot {} ({}): {}",
            "failed".red(),
            failure.snapshot_id,
            failure.path.display(),
            failure.reason
        );
    }
    info!(
        "Rolled back job {}: {} paths restored, {} failures",
        job_id,
        format!("{}", report.restored.len()).green(),
        format!("{}", report.failed.len()).red(),
    );
    Ok(())
}

fn run_snapshots(config: AppConfig, job_id: Option<i64>, offset: i64, limit: i64) -> CliResult {
    let engine = IngestEngine::open(config)?;
    let (snapshots, total) = engine.snapshots(job_id, offset, limit)?;
    for snapshot in &snapshots {
        let first = snapshot
            .file_ids
            .first()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{:>6}  {:<8} {:<9} job {:<6} {}  {}",
            snapshot.id,
            snapshot.operation_type.to_string(),
            snapshot.state.to_string(),
            snapshot
                .job_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            snapshot.timestamp,
            first
        );
    }
    println!("{} of {} snapshots", snapshots.len(), total);
    Ok(())
}

fn run_pending(config: AppConfig, filter: ReviewFilter) -> CliResult {
    let engine = IngestEngine::open(config)?;
    let items = engine.pending(&filter)?;
    for item in &items {
        println!(
            "{:>6}  {:<12} {:.2}  {}",
            item.id,
            item.suggested_category,
            item.confidence,
            item.original_path.display()
        );
    }
    println!("{} pending", items.len());
    Ok(())
}

fn run_confirm(config: AppConfig, id: i64, category: &str) -> CliResult {
    let engine = IngestEngine::open(config)?;
    let confirmed = engine.confirm(id, category)?;
    info!(
        "Review item {} filed at {}",
        id,
        confirmed.destination.display().to_string().green()
    );
    Ok(())
}

fn run_purge(config: AppConfig) -> CliResult {
    let engine = IngestEngine::open(config)?;
    let report = engine.purge_expired()?;
    info!(
        "Purged {} retained deletes, {} bytes freed",
        report.purged.len(),
        report.freed_bytes
    );
    Ok(())
}

fn run_recover(config: AppConfig) -> CliResult {
    // Opening the engine settles pending snapshots and interrupted jobs.
    let engine = IngestEngine::open(config)?;
    let startup = engine.startup_report();
    info!(
        "Recovery: {} snapshots committed, {} aborted ({} put back), {} interrupted jobs failed",
        startup.snapshots.committed.len(),
        startup.snapshots.aborted.len(),
        startup.snapshots.repaired.len(),
        startup.interrupted_jobs.len()
    );
    Ok(())
}
