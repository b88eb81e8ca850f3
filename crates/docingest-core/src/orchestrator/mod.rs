//! Job execution: one coordinator thread per job, a bounded rayon pool for
//! its files, and the job/file rows the coordinator alone writes.

pub mod job;
pub mod worker;

pub use job::{JobHandle, STOPPED_BY_OPERATOR};
pub use worker::{FileOutcome, JobSettings, Pipeline, WorkItem};

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{FileStatus, JobFile, JobOptions, JobStatus, ProcessingJob, ProcessingStats};
use crate::progress::{ProgressReporter, SilentReporter};
use crate::scanner::expand_intake;
use crate::storage::{lock, SharedDatabase};
use job::JobRun;

pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

pub struct Orchestrator {
    db: SharedDatabase,
    pipeline: Arc<Pipeline>,
    reporter: Arc<dyn ProgressReporter>,
    running: Arc<DashMap<i64, Arc<JobHandle>>>,
}

impl Orchestrator {
    pub fn new(db: SharedDatabase, pipeline: Arc<Pipeline>) -> Self {
        Self {
            db,
            pipeline,
            reporter: Arc::new(SilentReporter),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn set_reporter(&mut self, reporter: Arc<dyn ProgressReporter>) {
        self.reporter = reporter;
    }

    /// Expand `paths`, create the job and start its coordinator.
    pub fn submit(&self, paths: &[PathBuf], options: JobOptions) -> Result<ProcessingJob> {
        let settings = JobSettings::resolve(&options, &self.pipeline.config.pipeline)?;
        let files = expand_intake(paths, &self.pipeline.config.ignore_patterns)?;
        self.start(files, options, settings, None)
    }

    /// Submit the still-pending files of a finished job as a new job.
    pub fn resume(&self, job_id: i64) -> Result<ProcessingJob> {
        let previous = self.job(job_id)?;
        if self.running.contains_key(&job_id) || !previous.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "job {} is {}, only finished jobs can be resumed",
                job_id, previous.status
            )));
        }
        let (pending, options) = {
            let db = lock(&self.db)?;
            let pending: Vec<PathBuf> = db
                .job_files(job_id, Some(FileStatus::Pending))?
                .into_iter()
                .map(|f| f.path)
                .collect();
            (pending, db.get_job_options(job_id)?.unwrap_or_default())
        };
        if pending.is_empty() {
            return Err(Error::InvalidState(format!(
                "job {} has no pending files",
                job_id
            )));
        }
        let settings = JobSettings::resolve(&options, &self.pipeline.config.pipeline)?;
        info!("Resuming job {} with {} pending files", job_id, pending.len());
        self.start(pending, options, settings, Some(job_id))
    }

    fn start(
        &self,
        files: Vec<PathBuf>,
        options: JobOptions,
        settings: JobSettings,
        resumed_from: Option<i64>,
    ) -> Result<ProcessingJob> {
        let job = {
            let db = lock(&self.db)?;
            let job_id = db.insert_job(&files, &options, resumed_from)?;
            db.get_job(job_id)?
                .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?
        };
        let items = files
            .into_iter()
            .enumerate()
            .map(|(position, path)| WorkItem {
                job_id: job.id,
                position: position as u32,
                path,
            })
            .collect();

        let handle = Arc::new(JobHandle::new());
        self.running.insert(job.id, Arc::clone(&handle));
        let run = JobRun {
            db: self.db.clone(),
            pipeline: Arc::clone(&self.pipeline),
            reporter: Arc::clone(&self.reporter),
            handle,
            running: Arc::clone(&self.running),
            job: job.clone(),
            items,
            settings,
        };
        if let Err(e) = run.spawn() {
            self.running.remove(&job.id);
            lock(&self.db)?.set_job_status(job.id, JobStatus::Failed, Some(&e.to_string()))?;
            return Err(e);
        }
        Ok(job)
    }

    /// Request a stop. Returns false when the job is not running.
    pub fn stop(&self, job_id: i64) -> Result<bool> {
        match self.running.get(&job_id) {
            Some(handle) => {
                info!("Stop requested for job {}", job_id);
                handle.cancel();
                Ok(true)
            }
            None => {
                self.job(job_id)?;
                Ok(false)
            }
        }
    }

    /// Stop every running job; returns their ids.
    pub fn stop_all(&self) -> Vec<i64> {
        let mut stopped: Vec<i64> = self
            .running
            .iter()
            .map(|entry| {
                entry.value().cancel();
                *entry.key()
            })
            .collect();
        stopped.sort_unstable();
        if !stopped.is_empty() {
            info!("Stop requested for jobs {:?}", stopped);
        }
        stopped
    }

    /// Block until the job's coordinator is done and return the final row.
    pub fn wait(&self, job_id: i64) -> Result<ProcessingJob> {
        let handle = self.running.get(&job_id).map(|h| Arc::clone(h.value()));
        if let Some(handle) = handle {
            handle.wait();
        }
        self.job(job_id)
    }

    pub fn is_running(&self, job_id: i64) -> bool {
        self.running.contains_key(&job_id)
    }

    pub fn job(&self, job_id: i64) -> Result<ProcessingJob> {
        lock(&self.db)?
            .get_job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    pub fn job_files(&self, job_id: i64) -> Result<Vec<JobFile>> {
        self.job(job_id)?;
        Ok(lock(&self.db)?.job_files(job_id, None)?)
    }

    pub fn jobs(&self, offset: i64, limit: i64) -> Result<(Vec<ProcessingJob>, i64)> {
        Ok(lock(&self.db)?.list_jobs(offset, limit)?)
    }

    pub fn stats(&self) -> Result<ProcessingStats> {
        Ok(lock(&self.db)?.processing_stats()?)
    }

    pub(crate) fn set_status(&self, job_id: i64, status: JobStatus, error: Option<&str>) -> Result<()> {
        Ok(lock(&self.db)?.set_job_status(job_id, status, error)?)
    }

    /// Jobs a previous process left `pending`/`processing` can never finish:
    /// put their files back to pending and fail them so they can be resumed.
    pub fn recover_interrupted(&self) -> Result<Vec<i64>> {
        let db = lock(&self.db)?;
        let mut interrupted = db.job_ids_in_status(JobStatus::Processing)?;
        interrupted.extend(db.job_ids_in_status(JobStatus::Pending)?);
        interrupted.sort_unstable();
        for job_id in &interrupted {
            db.reset_processing_files(*job_id)?;
            db.set_job_status(*job_id, JobStatus::Failed, Some(INTERRUPTED_BY_RESTART))?;
            warn!("Job {} was interrupted by a restart", job_id);
        }
        Ok(interrupted)
    }
}
