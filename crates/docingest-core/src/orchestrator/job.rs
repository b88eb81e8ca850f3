use dashmap::DashMap;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, info, warn};

use super::worker::{FileOutcome, FileReport, JobSettings, Pipeline, WorkItem};
use crate::error::{Error, Result};
use crate::model::{FileStatus, JobFile, JobStatus, ProcessingJob};
use crate::progress::ProgressReporter;
use crate::storage::{lock, queries::now_timestamp, SharedDatabase};

pub const STOPPED_BY_OPERATOR: &str = "stopped by operator";

/// Cancellation flag and completion signal of one running job.
pub struct JobHandle {
    cancel: AtomicBool,
    done: Mutex<bool>,
    finished: Condvar,
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl JobHandle {
    pub fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            done: Mutex::new(false),
            finished: Condvar::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.finished.notify_all();
    }

    /// Block until the coordinator has written the final job row.
    pub fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .finished
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

enum WorkerEvent {
    Started { position: u32 },
    Finished { item: WorkItem, report: FileReport },
}

/// Everything the coordinator thread of one job owns. It is the only writer
/// of the job row and its file rows.
pub(crate) struct JobRun {
    pub db: SharedDatabase,
    pub pipeline: Arc<Pipeline>,
    pub reporter: Arc<dyn ProgressReporter>,
    pub handle: Arc<JobHandle>,
    pub running: Arc<DashMap<i64, Arc<JobHandle>>>,
    pub job: ProcessingJob,
    pub items: Vec<WorkItem>,
    pub settings: JobSettings,
}

impl JobRun {
    pub fn spawn(self) -> Result<()> {
        thread::Builder::new()
            .name(format!("job-{}", self.job.id))
            .spawn(move || self.run())?;
        Ok(())
    }

    fn run(mut self) {
        let job_id = self.job.id;
        if let Err(e) = self.drive() {
            error!("Job {} aborted: {}", job_id, e);
            // Queued files must not start after the coordinator gave up.
            self.handle.cancel();
            self.job.status = JobStatus::Failed;
            self.job.error = Some(e.to_string());
        }
        self.job.completed_at = Some(now_timestamp());
        if let Err(e) = self.write_job() {
            error!("Could not record final state of job {}: {}", job_id, e);
        }
        info!(
            "Job {} {}: {} processed, {} failed, {} duplicates, {} queued for review",
            job_id,
            self.job.status,
            self.job.processed_files,
            self.job.failed_files,
            self.job.duplicates_found,
            self.job.review_queued
        );
        self.reporter.on_job_complete(&self.job);
        self.running.remove(&job_id);
        self.handle.finish();
    }

    fn write_job(&self) -> Result<()> {
        Ok(lock(&self.db)?.update_job(&self.job)?)
    }

    fn drive(&mut self) -> Result<()> {
        let job_id = self.job.id;
        self.job.status = JobStatus::Processing;
        self.write_job()?;
        self.reporter.on_job_start(job_id, self.job.total_files);
        info!(
            "Job {} started: {} files, {} workers",
            job_id, self.job.total_files, self.settings.max_concurrent_workers
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.settings.max_concurrent_workers)
            .thread_name(move |i| format!("job-{}-worker-{}", job_id, i))
            .build()
            .map_err(|e| Error::Other(format!("worker pool: {}", e)))?;

        let (tx, rx) = mpsc::channel::<WorkerEvent>();
        let mut fatal: Option<String> = None;
        let items = std::mem::take(&mut self.items);

        for chunk in items.chunks(self.settings.batch_size) {
            if fatal.is_some() || self.handle.is_cancelled() {
                break;
            }
            for item in chunk {
                let tx = tx.clone();
                let pipeline = Arc::clone(&self.pipeline);
                let handle = Arc::clone(&self.handle);
                let settings = self.settings.clone();
                let item = item.clone();
                pool.spawn(move || {
                    let _ = tx.send(WorkerEvent::Started {
                        position: item.position,
                    });
                    let report = pipeline.process_file(&item, &settings, &handle.cancel);
                    let _ = tx.send(WorkerEvent::Finished { item, report });
                });
            }

            let mut outstanding = chunk.len();
            while outstanding > 0 {
                let event = match rx.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                };
                if let WorkerEvent::Finished { .. } = event {
                    outstanding -= 1;
                }
                if let Some(reason) = self.apply(event)? {
                    if fatal.is_none() {
                        warn!("Job {} stopping on infrastructure error: {}", job_id, reason);
                        self.handle.cancel();
                        fatal = Some(reason);
                    }
                }
            }
        }

        let (status, error) = self.final_status(fatal);
        self.job.status = status;
        self.job.error = error;
        Ok(())
    }

    /// Record one worker event. Returns the error text of a fatal failure.
    fn apply(&mut self, event: WorkerEvent) -> Result<Option<String>> {
        let db = lock(&self.db)?;
        match event {
            WorkerEvent::Started { position } => {
                db.set_job_file_status(self.job.id, position, FileStatus::Processing)?;
                Ok(None)
            }
            WorkerEvent::Finished { item, report } => {
                let status = report.outcome.status();
                let mut fatal = None;
                let (destination, error) = match &report.outcome {
                    FileOutcome::Filed { destination } | FileOutcome::Duplicate { destination } => {
                        (Some(destination.clone()), None)
                    }
                    FileOutcome::Review { .. } | FileOutcome::Skipped => (None, None),
                    FileOutcome::Failed { error, fatal: is_fatal } => {
                        if *is_fatal {
                            fatal = Some(error.clone());
                        }
                        (None, Some(error.clone()))
                    }
                };
                db.update_job_file(
                    self.job.id,
                    &JobFile {
                        position: item.position,
                        path: item.path.clone(),
                        status,
                        scope: report.scope.clone(),
                        fingerprint: report.fingerprint.clone(),
                        destination,
                        error,
                    },
                )?;

                if report.outcome == FileOutcome::Skipped {
                    debug!("{} left pending", item.path.display());
                    return Ok(fatal);
                }

                self.job.processed_files += 1;
                match report.outcome {
                    FileOutcome::Filed { .. } => self.job.successful_files += 1,
                    FileOutcome::Duplicate { .. } => {
                        self.job.successful_files += 1;
                        self.job.duplicates_found += 1;
                    }
                    FileOutcome::Review { .. } => {
                        self.job.successful_files += 1;
                        self.job.review_queued += 1;
                    }
                    FileOutcome::Failed { .. } => self.job.failed_files += 1,
                    FileOutcome::Skipped => {}
                }
                self.job.progress =
                    ProcessingJob::compute_progress(self.job.processed_files, self.job.total_files);
                db.update_job(&self.job)?;
                drop(db);

                self.reporter.on_file_complete(
                    self.job.id,
                    self.job.processed_files,
                    self.job.total_files,
                    status,
                    &item.path.to_string_lossy(),
                );
                Ok(fatal)
            }
        }
    }

    fn final_status(&self, fatal: Option<String>) -> (JobStatus, Option<String>) {
        if let Some(reason) = fatal {
            return (JobStatus::Failed, Some(reason));
        }
        if self.handle.is_cancelled() {
            return (JobStatus::Failed, Some(STOPPED_BY_OPERATOR.to_string()));
        }
        let total = self.job.total_files;
        if total > 0
            && self.job.failed_files as f64 / total as f64 > self.settings.max_failure_rate
        {
            return (
                JobStatus::Failed,
                Some(format!(
                    "{} of {} files failed",
                    self.job.failed_files, total
                )),
            );
        }
        (JobStatus::Completed, None)
    }
}
