use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::classifier::{classify_with_timeout, keyword::UNSORTED, Classification, Classifier};
use crate::config::{AppConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::filing::Filer;
use crate::fsops;
use crate::hasher;
use crate::ledger::SnapshotLedger;
use crate::model::{FileRecord, FileStatus, IndexCheckpoint, IndexedFile, IntakeOrder, JobOptions};
use crate::resolver::{DuplicateResolver, Resolution, Role, Settled};
use crate::review::ReviewQueue;
use crate::scanner::detect_scope;

/// Services shared by every worker and by the operator operations.
pub struct Pipeline {
    pub config: AppConfig,
    pub resolver: Arc<DuplicateResolver>,
    pub ledger: Arc<SnapshotLedger>,
    pub review: Arc<ReviewQueue>,
    pub filer: Arc<Filer>,
    pub classifier: Arc<dyn Classifier>,
}

/// Effective settings of one job: application defaults overlaid with the
/// submitted options.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub duplicate_detection: bool,
    pub classification: bool,
    pub max_concurrent_workers: usize,
    pub batch_size: usize,
    pub max_failure_rate: f64,
    pub scope: Option<String>,
}

impl JobSettings {
    pub fn resolve(options: &JobOptions, defaults: &PipelineConfig) -> Result<Self> {
        let settings = Self {
            duplicate_detection: options
                .enable_duplicate_detection
                .unwrap_or(defaults.enable_duplicate_detection),
            classification: options
                .enable_classification
                .unwrap_or(defaults.enable_classification),
            max_concurrent_workers: options
                .max_concurrent_workers
                .unwrap_or(defaults.max_concurrent_workers),
            batch_size: options.batch_size.unwrap_or(defaults.batch_size),
            max_failure_rate: defaults.max_failure_rate,
            scope: options.scope.clone().filter(|s| !s.trim().is_empty()),
        };
        if settings.max_concurrent_workers == 0 || settings.batch_size == 0 {
            return Err(Error::InvalidArgument(
                "maxConcurrentWorkers and batchSize must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: i64,
    pub position: u32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Filed { destination: PathBuf },
    Duplicate { destination: PathBuf },
    Review { review_id: i64 },
    Failed { error: String, fatal: bool },
    /// Stopped before any change; the file stays pending.
    Skipped,
}

impl FileOutcome {
    pub fn status(&self) -> FileStatus {
        match self {
            FileOutcome::Filed { .. } => FileStatus::Filed,
            FileOutcome::Duplicate { .. } => FileStatus::Duplicate,
            FileOutcome::Review { .. } => FileStatus::Review,
            FileOutcome::Failed { .. } => FileStatus::Failed,
            FileOutcome::Skipped => FileStatus::Pending,
        }
    }
}

/// What a worker reports back; `scope`/`fingerprint` are filled in as far as
/// the file got.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub outcome: FileOutcome,
    pub scope: Option<String>,
    pub fingerprint: Option<String>,
}

/// Errors after which the job must stop: the ledger is unusable.
fn is_fatal(error: &Error) -> bool {
    matches!(error, Error::LedgerWrite(_) | Error::Database(_))
}

fn with_io_retry<T>(mut op: impl FnMut() -> io::Result<T>) -> Result<T> {
    match op() {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!("IO error, retrying once: {}", first);
            op().map_err(Error::from)
        }
    }
}

impl Pipeline {
    pub fn process_file(
        &self,
        item: &WorkItem,
        settings: &JobSettings,
        cancel: &AtomicBool,
    ) -> FileReport {
        let mut report = FileReport {
            outcome: FileOutcome::Skipped,
            scope: None,
            fingerprint: None,
        };
        report.outcome = match self.run(item, settings, cancel, &mut report) {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => FileOutcome::Skipped,
            Err(e) => {
                warn!("Failed to process {}: {}", item.path.display(), e);
                FileOutcome::Failed {
                    fatal: is_fatal(&e),
                    error: e.to_string(),
                }
            }
        };
        report
    }

    fn run(
        &self,
        item: &WorkItem,
        settings: &JobSettings,
        cancel: &AtomicBool,
        report: &mut FileReport,
    ) -> Result<FileOutcome> {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let fingerprint = with_io_retry(|| hasher::fingerprint(&item.path))?;
        let metadata = with_io_retry(|| fs::metadata(&item.path))?;
        let scope = settings.scope.clone().unwrap_or_else(|| {
            detect_scope(
                &item.path,
                &self.config.internal_roots,
                &self.config.default_scope,
            )
        });
        report.scope = Some(scope.clone());
        report.fingerprint = Some(fingerprint.hash.clone());

        let record = FileRecord {
            path: item.path.clone(),
            fingerprint,
            scope,
            mtime: fsops::modified_secs(&metadata),
            intake: IntakeOrder {
                job: item.job_id,
                position: item.position,
            },
        };

        if !settings.duplicate_detection {
            return self.classify_and_file(item.job_id, &record, settings, None, false);
        }

        let checkpoint = match self.resolver.resolve(&record) {
            Resolution::Duplicate { checkpoint, .. } => {
                return self.bin_duplicate(item.job_id, &record, Some(checkpoint));
            }
            Resolution::AlreadyIndexed { role, file } => {
                debug!("{} already indexed", record.path.display());
                return Ok(match role {
                    Role::Duplicate => FileOutcome::Duplicate {
                        destination: file.path,
                    },
                    Role::Primary => FileOutcome::Filed {
                        destination: file.path,
                    },
                });
            }
            Resolution::Primary {
                checkpoint,
                displaced,
            } => {
                if let Some(former) = displaced.filter(|f| f.settled) {
                    self.demote_settled(item.job_id, &record, &former, &checkpoint);
                }
                checkpoint
            }
        };

        // Stop requested after this file was indexed: leave it untouched.
        if cancel.load(Ordering::SeqCst) {
            self.resolver
                .forget(&record.scope, &record.fingerprint.hash, &record.path);
            return Err(Error::Cancelled);
        }

        self.classify_and_file(item.job_id, &record, settings, Some(checkpoint), true)
            .map_err(|e| {
                self.resolver
                    .forget(&record.scope, &record.fingerprint.hash, &record.path);
                e
            })
    }

    fn classify_and_file(
        &self,
        job_id: i64,
        record: &FileRecord,
        settings: &JobSettings,
        checkpoint: Option<IndexCheckpoint>,
        indexed: bool,
    ) -> Result<FileOutcome> {
        let classification = if settings.classification {
            let cfg = &self.config.classification;
            let preview = hasher::read_preview(&record.path, cfg.preview_bytes).unwrap_or_default();
            let timeout = Duration::from_secs(cfg.timeout_secs);
            let classification = classify_with_timeout(&self.classifier, record, preview, timeout);
            if !classification.is_confident(cfg.confidence_threshold) {
                return self.queue_for_review(job_id, record, &classification, indexed);
            }
            classification
        } else {
            Classification::new(UNSORTED, 0.0)
        };

        let filed = self
            .filer
            .file(Some(job_id), record, &classification, checkpoint, None)?;
        if !indexed {
            return Ok(FileOutcome::Filed {
                destination: filed.destination,
            });
        }

        match self.resolver.settle(
            &record.scope,
            &record.fingerprint.hash,
            &record.path,
            &filed.destination,
        ) {
            Settled::Demoted { .. } => {
                // Displaced while being filed: it belongs in the bin after all.
                let binned = self.filer.move_to_duplicate_bin(
                    Some(job_id),
                    &filed.destination,
                    &record.scope,
                    None,
                    None,
                )?;
                self.resolver.relocate(
                    &record.scope,
                    &record.fingerprint.hash,
                    &filed.destination,
                    &binned.destination,
                );
                Ok(FileOutcome::Duplicate {
                    destination: binned.destination,
                })
            }
            Settled::Primary | Settled::Missing => Ok(FileOutcome::Filed {
                destination: filed.destination,
            }),
        }
    }

    fn queue_for_review(
        &self,
        job_id: i64,
        record: &FileRecord,
        classification: &Classification,
        indexed: bool,
    ) -> Result<FileOutcome> {
        if indexed {
            let settled = self.resolver.settle(
                &record.scope,
                &record.fingerprint.hash,
                &record.path,
                &record.path,
            );
            if let Settled::Demoted { .. } = settled {
                return self.bin_duplicate(job_id, record, None);
            }
        }
        let item = self.review.enqueue(record, classification, Some(job_id))?;
        Ok(FileOutcome::Review { review_id: item.id })
    }

    fn bin_duplicate(
        &self,
        job_id: i64,
        record: &FileRecord,
        checkpoint: Option<IndexCheckpoint>,
    ) -> Result<FileOutcome> {
        let binned = self.filer.move_to_duplicate_bin(
            Some(job_id),
            &record.path,
            &record.scope,
            checkpoint,
            None,
        );
        let binned = match binned {
            Ok(b) => b,
            Err(e) => {
                self.resolver
                    .forget(&record.scope, &record.fingerprint.hash, &record.path);
                return Err(e);
            }
        };
        self.resolver.relocate(
            &record.scope,
            &record.fingerprint.hash,
            &record.path,
            &binned.destination,
        );
        Ok(FileOutcome::Duplicate {
            destination: binned.destination,
        })
    }

    /// The settled former Primary of a group moves into the duplicate bin.
    /// Failure here is logged and does not fail the incoming file.
    fn demote_settled(
        &self,
        job_id: i64,
        record: &FileRecord,
        former: &IndexedFile,
        checkpoint: &IndexCheckpoint,
    ) {
        // A displaced file under review no longer needs a decision.
        let review = match self.review.pending_for_path(&former.path) {
            Ok(review) => review,
            Err(e) => {
                warn!("Could not look up review item for {}: {}", former.path.display(), e);
                return;
            }
        };
        let result = self.filer.move_to_duplicate_bin(
            Some(job_id),
            &former.path,
            &record.scope,
            Some(checkpoint.clone()),
            review,
        );
        match result {
            Ok(binned) => {
                self.resolver.relocate(
                    &record.scope,
                    &record.fingerprint.hash,
                    &former.path,
                    &binned.destination,
                );
            }
            Err(e) => warn!(
                "Could not move displaced primary {} to the duplicate bin: {}",
                former.path.display(),
                e
            ),
        }
    }
}
