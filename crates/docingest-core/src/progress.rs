use crate::model::{FileStatus, ProcessingJob};

/// Trait for reporting job progress.
///
/// The CLI implements it with indicatif; the server runs silent and lets
/// clients poll the job instead. All methods have default no-op implementations.
/// Calls come from the job's coordinator thread.
pub trait ProgressReporter: Send + Sync {
    fn on_job_start(&self, _job_id: i64, _total_files: u64) {}
    fn on_file_complete(&self, _job_id: i64, _processed: u64, _total: u64, _status: FileStatus, _path: &str) {}
    fn on_job_complete(&self, _job: &ProcessingJob) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
