use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "docingest")]
#[command(about = "Document ingestion with duplicate resolution, review and rollback", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the REST server
    Serve {
        /// Overrides server.bind from the configuration
        #[arg(long)]
        bind: Option<String>,
    },
    /// Ingest files or directories and wait for the job to finish
    Process {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// File every document into this scope instead of detecting it
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        no_duplicates: bool,
        #[arg(long)]
        no_classification: bool,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// List jobs, newest first
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Show processing statistics
    Stats,
    /// Undo every filesystem change of a job
    Rollback { job_id: i64 },
    /// List ledger snapshots
    Snapshots {
        #[arg(long)]
        job_id: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// List documents waiting for review
    Pending {
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// File a reviewed document under the given category
    Confirm { id: i64, category: String },
    /// Remove retained deletes older than the retention window
    Purge,
    /// Settle snapshots left pending by a crash
    Recover,
    /// Print configuration values
    PrintConfig,
}
