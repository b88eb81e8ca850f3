use docingest_core::model::{FileStatus, JobStatus, ProcessingJob};
use docingest_core::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One indicatif bar per job run.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProgressReporter for CliReporter {
    fn on_job_start(&self, job_id: i64, total_files: u64) {
        let pb = ProgressBar::new(total_files);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Job {prefix} [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining) {msg}",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        pb.set_prefix(job_id.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        if let Some(old) = self.bar().replace(pb) {
            old.finish_and_clear();
        }
    }

    fn on_file_complete(&self, _job_id: i64, processed: u64, _total: u64, status: FileStatus, path: &str) {
        if let Some(pb) = self.bar().as_ref() {
            pb.set_position(processed);
            if status == FileStatus::Failed {
                pb.println(format!("  \x1b[31m✗\x1b[0m {}", path));
            }
            pb.set_message(status.to_string());
        }
    }

    fn on_job_complete(&self, job: &ProcessingJob) {
        if let Some(pb) = self.bar().take() {
            pb.finish_and_clear();
        }
        let mark = if job.status == JobStatus::Completed {
            "\x1b[32m✓\x1b[0m"
        } else {
            "\x1b[31m✗\x1b[0m"
        };
        eprintln!(
            "  {} Job {} {}: {} filed or queued, {} duplicates, {} failed",
            mark,
            job.id,
            job.status,
            job.successful_files.saturating_sub(job.duplicates_found),
            job.duplicates_found,
            job.failed_files
        );
    }
}
