use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::{self, Classification, Classifier};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::filing::{Filed, Filer, DUPLICATE_BIN};
use crate::fsops::{self, PathLocks};
use crate::hasher;
use crate::ledger::{PurgeReport, RecoveryReport, SnapshotLedger};
use crate::model::{
    file_name_of, BeforeState, DeleteReport, DuplicateEntry, FileRecord, Fingerprint,
    IndexedFile, IntakeOrder, JobFile, JobOptions, JobStatus, PathFailure, ProcessingJob,
    ProcessingStats, ReviewItem, RollbackReport, Snapshot, SnapshotState, UploadFailure,
    UploadReport,
};
use crate::orchestrator::{Orchestrator, Pipeline};
use crate::progress::ProgressReporter;
use crate::resolver::{DuplicateResolver, Role, Settled};
use crate::review::ReviewQueue;
use crate::storage::{lock, Database, ReviewFilter, SharedDatabase};

pub const ROLLBACK_PARTIAL: &str = "rollback partially applied";

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: ProcessingJob,
    pub files: Vec<JobFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Promoted {
    /// New location of the promoted file (the former primary location).
    pub primary: PathBuf,
    /// Where the former primary went, if it still existed.
    pub demoted: Option<PathBuf>,
    pub snapshot_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Confirmed {
    pub confirmed: i64,
    pub destination: PathBuf,
    pub snapshot_id: i64,
}

/// What opening the engine had to settle after the previous process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    pub snapshots: RecoveryReport,
    pub interrupted_jobs: Vec<i64>,
}

/// The assembled pipeline plus every operator operation.
pub struct IngestEngine {
    config: AppConfig,
    db: SharedDatabase,
    pipeline: Arc<Pipeline>,
    locks: PathLocks,
    orchestrator: Orchestrator,
    startup: StartupReport,
}

impl IngestEngine {
    /// Open the database, create the working directories, settle what a
    /// previous process left behind and rebuild the duplicate index.
    pub fn open(config: AppConfig) -> Result<Self> {
        let classifier = classifier::from_config(&config.classification);
        Self::open_with_classifier(config, classifier)
    }

    pub fn open_with_classifier(config: AppConfig, classifier: Arc<dyn Classifier>) -> Result<Self> {
        for dir in [&config.sorted_root, &config.staging_dir, &config.retention_dir] {
            fs::create_dir_all(dir)?;
        }
        if let Some(parent) = Path::new(&config.database_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = Database::open(&config.database_path)?.into_shared();
        info!("Opened database {}", config.database_path);

        let locks = PathLocks::new();
        let ledger = Arc::new(SnapshotLedger::new(
            db.clone(),
            &config.retention_dir,
            config.retention.window_secs,
        ));
        let filer = Arc::new(Filer::new(
            &config.sorted_root,
            config.sorting.clone(),
            Arc::clone(&ledger),
            locks.clone(),
        ));
        let pipeline = Arc::new(Pipeline {
            config: config.clone(),
            resolver: Arc::new(DuplicateResolver::new()),
            ledger: Arc::clone(&ledger),
            review: Arc::new(ReviewQueue::new(db.clone(), &config.feedback_path)),
            filer,
            classifier,
        });
        let orchestrator = Orchestrator::new(db.clone(), Arc::clone(&pipeline));

        let snapshots = ledger.recover_pending()?;
        let interrupted_jobs = orchestrator.recover_interrupted()?;
        if !interrupted_jobs.is_empty() {
            warn!("{} interrupted job(s) marked failed", interrupted_jobs.len());
        }

        let engine = Self {
            config,
            db,
            pipeline,
            locks,
            orchestrator,
            startup: StartupReport {
                snapshots,
                interrupted_jobs,
            },
        };
        engine.rebuild_index()?;
        Ok(engine)
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.orchestrator.set_reporter(reporter);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn startup_report(&self) -> &StartupReport {
        &self.startup
    }

    fn resolver(&self) -> &DuplicateResolver {
        &self.pipeline.resolver
    }

    fn ledger(&self) -> &SnapshotLedger {
        &self.pipeline.ledger
    }

    // ── Startup ──────────────────────────────────────────────────

    /// Filed documents and files under review are settled primaries; files
    /// in the duplicate bins are their duplicates.
    fn rebuild_index(&self) -> Result<()> {
        let mut groups: HashMap<(String, String), Vec<IndexedFile>> = HashMap::new();
        let mut next = 0u32;
        let mut seed = |path: &Path| -> Option<IndexedFile> {
            let metadata = fs::metadata(path).ok()?;
            next += 1;
            Some(IndexedFile {
                path: path.to_path_buf(),
                size: metadata.len(),
                mtime: fsops::modified_secs(&metadata),
                intake: IntakeOrder {
                    job: 0,
                    position: next,
                },
                settled: true,
            })
        };

        let (documents, reviews) = {
            let db = lock(&self.db)?;
            (
                db.all_documents()?,
                db.list_review_items(&ReviewFilter::default())?,
            )
        };
        for doc in &documents {
            if let Some(file) = seed(&doc.path) {
                groups
                    .entry((doc.scope.clone(), doc.fingerprint.clone()))
                    .or_default()
                    .push(file);
            }
        }
        for item in &reviews {
            if let Some(file) = seed(&item.original_path) {
                groups
                    .entry((item.scope.clone(), item.fingerprint.clone()))
                    .or_default()
                    .push(file);
            }
        }

        let mut loaded = 0usize;
        for ((scope, fingerprint), mut files) in groups {
            files.sort_by_key(|f| f.rank());
            let primary = files.remove(0);
            loaded += 1;
            self.resolver().load_group(&scope, &fingerprint, primary, files);
        }

        let mut binned = 0usize;
        for scope_dir in read_dirs(&self.config.sorted_root) {
            let scope = file_name_of(&scope_dir);
            for path in read_files(&scope_dir.join(DUPLICATE_BIN)) {
                let fingerprint = match hasher::fingerprint(&path) {
                    Ok(fp) => fp,
                    Err(e) => {
                        warn!("Could not fingerprint {}: {}", path.display(), e);
                        continue;
                    }
                };
                if self.resolver().group(&scope, &fingerprint.hash).is_none() {
                    debug!("{} has no primary, left out of the index", path.display());
                    continue;
                }
                if let Some(file) = seed(&path) {
                    self.resolver()
                        .load_group(&scope, &fingerprint.hash, file.clone(), vec![file]);
                    binned += 1;
                }
            }
        }
        info!(
            "Duplicate index rebuilt: {} groups, {} binned duplicates",
            loaded, binned
        );
        Ok(())
    }

    // ── Jobs ─────────────────────────────────────────────────────

    pub fn submit(&self, paths: &[PathBuf], options: JobOptions) -> Result<ProcessingJob> {
        self.orchestrator.submit(paths, options)
    }

    pub fn job(&self, job_id: i64) -> Result<JobDetail> {
        Ok(JobDetail {
            job: self.orchestrator.job(job_id)?,
            files: self.orchestrator.job_files(job_id)?,
        })
    }

    pub fn jobs(&self, offset: i64, limit: i64) -> Result<(Vec<ProcessingJob>, i64)> {
        self.orchestrator.jobs(offset, limit)
    }

    pub fn stats(&self) -> Result<ProcessingStats> {
        self.orchestrator.stats()
    }

    pub fn stop(&self, job_id: i64) -> Result<bool> {
        self.orchestrator.stop(job_id)
    }

    pub fn stop_all(&self) -> Vec<i64> {
        self.orchestrator.stop_all()
    }

    pub fn resume(&self, job_id: i64) -> Result<ProcessingJob> {
        self.orchestrator.resume(job_id)
    }

    pub fn wait(&self, job_id: i64) -> Result<ProcessingJob> {
        self.orchestrator.wait(job_id)
    }

    // ── Rollback ─────────────────────────────────────────────────

    /// Reverse every committed mutation of a finished job.
    pub fn rollback_job(&self, job_id: i64) -> Result<RollbackReport> {
        let job = self.orchestrator.job(job_id)?;
        if self.orchestrator.is_running(job_id) || !job.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "job {} is {}; stop it before rolling back",
                job_id, job.status
            )));
        }

        let targets = self.ledger().reversible_for_job(job_id)?;
        if targets.is_empty() {
            if job.status == JobStatus::RolledBack {
                return Err(Error::AlreadyRolledBack(job_id));
            }
            self.withdraw_reviews(job_id)?;
            self.orchestrator
                .set_status(job_id, JobStatus::RolledBack, None)?;
            info!("Job {} had nothing to reverse", job_id);
            return Ok(RollbackReport::default());
        }

        let report = self
            .ledger()
            .rollback(Some(job_id), targets, self.resolver(), &self.locks)?;
        self.withdraw_reviews(job_id)?;
        if report.is_clean() {
            self.orchestrator
                .set_status(job_id, JobStatus::RolledBack, None)?;
        } else {
            warn!(
                "Job {} rollback left {} failure(s)",
                job_id,
                report.failed.len()
            );
            self.orchestrator
                .set_status(job_id, JobStatus::Failed, Some(ROLLBACK_PARTIAL))?;
        }
        Ok(report)
    }

    /// Files a rolled-back job queued for review stay in the inbox undecided.
    fn withdraw_reviews(&self, job_id: i64) -> Result<()> {
        for item in self.pipeline.review.withdraw_job(job_id)? {
            self.resolver()
                .forget(&item.scope, &item.fingerprint, &item.original_path);
        }
        Ok(())
    }

    pub fn rollback_snapshot(&self, snapshot_id: i64) -> Result<RollbackReport> {
        let snapshot = self.ledger().get(snapshot_id)?;
        if matches!(snapshot.before_state, BeforeState::Rollback { .. }) {
            return Err(Error::InvalidArgument(format!(
                "snapshot {} records a rollback and cannot be reversed",
                snapshot_id
            )));
        }
        if snapshot.state != SnapshotState::Committed {
            return Err(Error::InvalidState(format!(
                "snapshot {} is {}",
                snapshot_id, snapshot.state
            )));
        }
        let job_id = snapshot.job_id;
        self.ledger()
            .rollback(job_id, vec![snapshot], self.resolver(), &self.locks)
    }

    pub fn snapshots(
        &self,
        job_id: Option<i64>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Snapshot>, i64)> {
        self.ledger().list(job_id, offset, limit)
    }

    // ── Duplicates ───────────────────────────────────────────────

    pub fn duplicates(
        &self,
        scope: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> (Vec<DuplicateEntry>, usize) {
        self.resolver().list(scope, offset, limit)
    }

    /// Swap a duplicate with its primary.
    pub fn promote(&self, duplicate: &Path) -> Result<Promoted> {
        let located = self
            .resolver()
            .find(duplicate)
            .filter(|l| l.role == Role::Duplicate)
            .ok_or_else(|| Error::NotFound(format!("duplicate {}", duplicate.display())))?;
        let primary_from = located.primary.path.clone();
        let bin = self.pipeline.filer.duplicate_bin(&located.scope);
        let name = file_name_of(&primary_from);

        let (primary_to, _guard) = loop {
            let candidate = primary_from
                .exists()
                .then(|| fsops::unique_destination(&bin, &name));
            let mut paths = vec![duplicate.to_path_buf(), primary_from.clone()];
            paths.extend(candidate.clone());
            let guard = self.locks.acquire(&paths);
            if candidate.as_ref().map_or(true, |c| !c.exists()) {
                break (candidate, guard);
            }
        };

        let checkpoint = self
            .resolver()
            .checkpoint(&located.scope, &located.fingerprint);
        let state = BeforeState::Promote {
            primary_from: primary_from.clone(),
            primary_to: primary_to.clone(),
            duplicate_from: duplicate.to_path_buf(),
            duplicate_to: primary_from.clone(),
            index: Some(checkpoint),
        };
        let snapshot_id = self.ledger().begin(None, &state)?;

        if let Err(e) = self.swap_files(duplicate, &primary_from, primary_to.as_deref()) {
            self.ledger().abort(snapshot_id)?;
            return Err(e);
        }
        let indexed = self.resolver().promote(
            &located.scope,
            &located.fingerprint,
            duplicate,
            &primary_from,
            primary_to.as_deref(),
        );
        if let Err(e) = indexed {
            // The group changed under us: put both files back.
            self.unswap_files(duplicate, &primary_from, primary_to.as_deref());
            self.ledger().abort(snapshot_id)?;
            return Err(e);
        }
        self.ledger().commit(snapshot_id)?;
        info!(
            "Promoted {} to primary at {}",
            duplicate.display(),
            primary_from.display()
        );
        Ok(Promoted {
            primary: primary_from,
            demoted: primary_to,
            snapshot_id,
        })
    }

    fn swap_files(&self, duplicate: &Path, primary: &Path, primary_to: Option<&Path>) -> Result<()> {
        if let Some(to) = primary_to {
            fsops::move_file(primary, to)?;
        }
        if let Err(e) = fsops::move_file(duplicate, primary) {
            if let Some(to) = primary_to {
                if let Err(undo) = fsops::move_file(to, primary) {
                    warn!("Could not put {} back: {}", primary.display(), undo);
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn unswap_files(&self, duplicate: &Path, primary: &Path, primary_to: Option<&Path>) {
        if let Err(e) = fsops::move_file(primary, duplicate) {
            warn!("Could not put {} back: {}", duplicate.display(), e);
            return;
        }
        if let Some(to) = primary_to {
            if let Err(e) = fsops::move_file(to, primary) {
                warn!("Could not put {} back: {}", primary.display(), e);
            }
        }
    }

    /// Move a duplicate out of the bin into `target_dir`.
    pub fn move_duplicate(&self, duplicate: &Path, target_dir: &Path) -> Result<Filed> {
        let entry = self
            .resolver()
            .find_duplicate(duplicate)
            .ok_or_else(|| Error::NotFound(format!("duplicate {}", duplicate.display())))?;
        let checkpoint = self.resolver().checkpoint(&entry.scope, &entry.fingerprint);
        let filed = self
            .pipeline
            .filer
            .move_into(None, duplicate, target_dir, Some(checkpoint), None)?;
        self.resolver()
            .forget(&entry.scope, &entry.fingerprint, duplicate);
        Ok(filed)
    }

    /// Soft-delete each path into the retention area.
    pub fn delete(&self, paths: &[PathBuf]) -> DeleteReport {
        let mut report = DeleteReport::default();
        for path in paths {
            match self.delete_one(path) {
                Ok(retained) => {
                    debug!("{} retained at {}", path.display(), retained.display());
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!("Could not delete {}: {}", path.display(), e);
                    report.failed.push(PathFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    fn delete_one(&self, path: &Path) -> Result<PathBuf> {
        let _guard = self.locks.acquire(&[path]);
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let located = self.resolver().find(path);
        if let Some(l) = located.as_ref().filter(|l| l.role == Role::Primary) {
            let duplicates = self
                .resolver()
                .group(&l.scope, &l.fingerprint)
                .map_or(0, |g| g.duplicates.len());
            if duplicates > 0 {
                return Err(Error::InvalidState(format!(
                    "{} is a primary with {} duplicate(s)",
                    path.display(),
                    duplicates
                )));
            }
        }
        let checkpoint = located
            .as_ref()
            .map(|l| self.resolver().checkpoint(&l.scope, &l.fingerprint));

        let (snapshot_id, retained) = self.ledger().begin_delete(None, path, checkpoint)?;
        if let Err(e) = fsops::move_file(path, &retained) {
            self.ledger().abort(snapshot_id)?;
            return Err(e.into());
        }
        if let Some(l) = &located {
            self.resolver().forget(&l.scope, &l.fingerprint, path);
        }
        self.ledger().commit(snapshot_id)?;
        Ok(retained)
    }

    // ── Review ───────────────────────────────────────────────────

    pub fn pending(&self, filter: &ReviewFilter) -> Result<Vec<ReviewItem>> {
        self.pipeline.review.list_pending(filter)
    }

    pub fn download(&self, review_id: i64) -> Result<(ReviewItem, Vec<u8>)> {
        self.pipeline.review.download(review_id)
    }

    /// File a reviewed document under the operator's category.
    pub fn confirm(&self, review_id: i64, category: &str) -> Result<Confirmed> {
        let category = category.trim();
        if category.is_empty() {
            return Err(Error::InvalidArgument("category must not be empty".to_string()));
        }
        let item = self.pipeline.review.claim(review_id)?;
        let record = FileRecord {
            path: item.original_path.clone(),
            fingerprint: Fingerprint {
                hash: item.fingerprint.clone(),
                size: item.size,
            },
            scope: item.scope.clone(),
            mtime: item.mtime,
            intake: IntakeOrder {
                job: item.job_id.unwrap_or(0),
                position: 0,
            },
        };
        let classification = Classification {
            category: category.to_string(),
            confidence: 1.0,
            customer: item.customer.clone(),
            project: item.project.clone(),
            tags: item.tags.clone(),
            metadata: item.metadata.clone(),
        };

        let checkpoint = self.resolver().checkpoint(&item.scope, &item.fingerprint);
        let filed = self
            .pipeline
            .filer
            .file(None, &record, &classification, Some(checkpoint), Some(item.clone()));
        let filed = match filed {
            Ok(filed) => filed,
            Err(e) => {
                if let Err(requeue) = self.pipeline.review.requeue(&item) {
                    warn!("Could not requeue review item {}: {}", review_id, requeue);
                }
                return Err(e);
            }
        };
        if let Settled::Demoted { primary } = self.resolver().settle(
            &item.scope,
            &item.fingerprint,
            &item.original_path,
            &filed.destination,
        ) {
            warn!(
                "{} was confirmed while {} is primary",
                filed.destination.display(),
                primary.path.display()
            );
        }
        if let Err(e) = self
            .pipeline
            .review
            .record_feedback(&item, category, &filed.destination)
        {
            warn!("Could not record feedback for item {}: {}", review_id, e);
        }
        info!(
            "Review item {} confirmed as {} -> {}",
            review_id,
            category,
            filed.destination.display()
        );
        Ok(Confirmed {
            confirmed: review_id,
            destination: filed.destination,
            snapshot_id: filed.snapshot_id,
        })
    }

    // ── Maintenance ──────────────────────────────────────────────

    pub fn purge_expired(&self) -> Result<PurgeReport> {
        self.ledger().purge_expired(Utc::now())
    }

    /// Stage every upload; one bad file does not reject the others.
    pub fn stage_uploads<'a, I>(&self, uploads: I) -> UploadReport
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut report = UploadReport::default();
        for (name, bytes) in uploads {
            report.total += 1;
            match self.stage_upload(name, bytes) {
                Ok(path) => report.items.push(path),
                Err(e) => {
                    warn!("Could not stage upload {:?}: {}", name, e);
                    report.failed.push(UploadFailure {
                        name: name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Store uploaded bytes in the staging directory under a free name.
    pub fn stage_upload(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let file_name = file_name_of(Path::new(name));
        if file_name.is_empty() || file_name == ".." {
            return Err(Error::InvalidArgument(format!("invalid file name {:?}", name)));
        }
        fs::create_dir_all(&self.config.staging_dir)?;
        let _guard = self.locks.acquire(&[self.config.staging_dir.join(&file_name)]);
        let path = fsops::unique_destination(&self.config.staging_dir, &file_name);
        fs::write(&path, bytes)?;
        debug!("Staged upload {}", path.display());
        Ok(path)
    }
}

fn read_dirs(dir: &Path) -> Vec<PathBuf> {
    read_entries(dir, |t| t.is_dir())
}

fn read_files(dir: &Path) -> Vec<PathBuf> {
    read_entries(dir, |t| t.is_file())
}

fn read_entries(dir: &Path, keep: impl Fn(&fs::FileType) -> bool) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.file_type().map(|t| keep(&t)).unwrap_or(false))
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    entries.sort();
    entries
}
