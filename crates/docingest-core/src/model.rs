//! Domain types shared by every pipeline stage.
//!
//! Everything here is plain data: serializable, cloneable, and free of I/O.
//! Status and operation fields are closed enums so that the JSON surface and
//! the SQLite columns can only ever carry known values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// Content identity of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Lower-case hex BLAKE3 digest of the full content.
    pub hash: String,
    pub size: u64,
}

/// Position of a file in the global intake sequence: earlier jobs first, then
/// submission order inside a job. Used as the stable first-seen tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntakeOrder {
    pub job: i64,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub scope: String,
    /// Modification time, unix seconds.
    pub mtime: i64,
    pub intake: IntakeOrder,
}

impl FileRecord {
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidArgument(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    RolledBack,
}

string_enum!(JobStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    RolledBack => "rolled_back",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::RolledBack
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Filed,
    Duplicate,
    Review,
    Failed,
}

string_enum!(FileStatus {
    Pending => "pending",
    Processing => "processing",
    Filed => "filed",
    Duplicate => "duplicate",
    Review => "review",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: i64,
    pub status: JobStatus,
    pub progress: u8,
    pub total_files: u64,
    pub processed_files: u64,
    pub successful_files: u64,
    pub failed_files: u64,
    pub duplicates_found: u64,
    pub review_queued: u64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub resumed_from: Option<i64>,
}

impl ProcessingJob {
    pub fn compute_progress(processed: u64, total: u64) -> u8 {
        if total == 0 {
            return 100;
        }
        ((processed.min(total) * 100) / total) as u8
    }
}

/// Per-file status row inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub position: u32,
    pub path: PathBuf,
    pub status: FileStatus,
    pub scope: Option<String>,
    pub fingerprint: Option<String>,
    pub destination: Option<PathBuf>,
    pub error: Option<String>,
}

/// Per-job overrides of the pipeline defaults. Accepts the dashboard's
/// camelCase keys as well as snake_case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default, alias = "enableDuplicateDetection")]
    pub enable_duplicate_detection: Option<bool>,
    #[serde(default, alias = "enableClassification")]
    pub enable_classification: Option<bool>,
    #[serde(default, alias = "maxConcurrentWorkers")]
    pub max_concurrent_workers: Option<usize>,
    #[serde(default, alias = "batchSize")]
    pub batch_size: Option<usize>,
    /// Force every file of the job into this scope instead of detecting it.
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub scope: String,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub fingerprint: String,
    pub primary_path: PathBuf,
}

/// One file as tracked by the duplicate index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub intake: IntakeOrder,
    /// False while the file is still travelling through the pipeline.
    pub settled: bool,
}

impl IndexedFile {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            path: record.path.clone(),
            size: record.fingerprint.size,
            mtime: record.mtime,
            intake: record.intake,
            settled: false,
        }
    }

    pub fn rank(&self) -> (i64, IntakeOrder) {
        (self.mtime, self.intake)
    }
}

/// All files of one scope sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub primary: IndexedFile,
    pub duplicates: Vec<IndexedFile>,
}

/// Duplicate-index group captured before an operation changed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCheckpoint {
    pub scope: String,
    pub fingerprint: String,
    /// Group version the prior state belongs to.
    pub version: u64,
    pub prior: Option<GroupState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: i64,
    pub original_path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub mtime: i64,
    pub suggested_category: String,
    pub confidence: f64,
    pub customer: Option<String>,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub scope: String,
    pub fingerprint: String,
    pub job_id: Option<i64>,
}

/// Category and tag metadata recorded for a filed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub path: PathBuf,
    pub fingerprint: String,
    pub scope: String,
    pub category: String,
    pub confidence: f64,
    pub customer: Option<String>,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub filed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Move,
    Delete,
    Classify,
    Rollback,
}

string_enum!(OperationType {
    Move => "move",
    Delete => "delete",
    Classify => "classify",
    Rollback => "rollback",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    /// Recorded; the mutation may or may not have happened yet.
    Pending,
    Committed,
    /// The mutation failed; nothing to reverse.
    Aborted,
    /// Reversed by a rollback.
    Consumed,
}

string_enum!(SnapshotState {
    Pending => "pending",
    Committed => "committed",
    Aborted => "aborted",
    Consumed => "consumed",
});

/// Everything needed to reverse one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeforeState {
    Move {
        from: PathBuf,
        to: PathBuf,
        /// Review item dropped because the moved file left the queue.
        #[serde(default)]
        review: Option<ReviewItem>,
        index: Option<IndexCheckpoint>,
    },
    Delete {
        original: PathBuf,
        retained: PathBuf,
        index: Option<IndexCheckpoint>,
    },
    Classify {
        from: PathBuf,
        to: PathBuf,
        /// Metadata previously recorded for `from`, if any.
        previous: Option<DocumentMetadata>,
        /// Review item consumed by an operator confirmation.
        review: Option<ReviewItem>,
        index: Option<IndexCheckpoint>,
    },
    Promote {
        primary_from: PathBuf,
        primary_to: Option<PathBuf>,
        duplicate_from: PathBuf,
        duplicate_to: PathBuf,
        index: Option<IndexCheckpoint>,
    },
    Rollback {
        consumed: Vec<i64>,
    },
}

impl BeforeState {
    pub fn operation_type(&self) -> OperationType {
        match self {
            BeforeState::Move { .. } => OperationType::Move,
            BeforeState::Delete { .. } => OperationType::Delete,
            BeforeState::Classify { .. } | BeforeState::Promote { .. } => {
                OperationType::Classify
            }
            BeforeState::Rollback { .. } => OperationType::Rollback,
        }
    }

    pub fn index_checkpoint(&self) -> Option<&IndexCheckpoint> {
        match self {
            BeforeState::Move { index, .. }
            | BeforeState::Delete { index, .. }
            | BeforeState::Classify { index, .. }
            | BeforeState::Promote { index, .. } => index.as_ref(),
            BeforeState::Rollback { .. } => None,
        }
    }

    /// Paths a mutation of this kind writes to or removes.
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        match self {
            BeforeState::Move { from, to, .. } | BeforeState::Classify { from, to, .. } => {
                vec![from.clone(), to.clone()]
            }
            BeforeState::Delete {
                original, retained, ..
            } => vec![original.clone(), retained.clone()],
            BeforeState::Promote {
                primary_from,
                primary_to,
                duplicate_from,
                duplicate_to,
                ..
            } => {
                let mut paths = vec![
                    primary_from.clone(),
                    duplicate_from.clone(),
                    duplicate_to.clone(),
                ];
                paths.extend(primary_to.clone());
                paths
            }
            BeforeState::Rollback { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub job_id: Option<i64>,
    pub operation_type: OperationType,
    pub file_ids: Vec<PathBuf>,
    pub timestamp: String,
    pub before_state: BeforeState,
    pub state: SnapshotState,
    pub consumed_by: Option<i64>,
    pub purged: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Paths put back in place.
    pub restored: Vec<PathBuf>,
    pub failed: Vec<RollbackFailure>,
    /// Snapshots reversed and marked consumed.
    pub consumed: Vec<i64>,
    /// The `rollback` snapshot that records this run.
    pub rollback_snapshot: Option<i64>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackFailure {
    pub snapshot_id: i64,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted: usize,
    pub failed: Vec<PathFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Per-file outcome of a multi-file upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadReport {
    pub items: Vec<PathBuf>,
    pub failed: Vec<UploadFailure>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesByStatus {
    pub pending: u64,
    pub processing: u64,
    pub filed: u64,
    pub duplicate: u64,
    pub review: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_jobs: u64,
    pub total_files_processed: u64,
    pub successful_files: u64,
    pub failed_files: u64,
    pub skipped_files: u64,
    pub files_by_status: FilesByStatus,
}
