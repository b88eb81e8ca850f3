//! Destination layout and the ledgered moves that put files there.
//!
//! Layout below the sorted root:
//!
//! ```text
//! <scope>/<subfolder>[/<year>]/<name>   filed documents
//! <scope>/_duplicates/<name>            duplicate bin
//! ```

use chrono::{DateTime, Datelike};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classifier::Classification;
use crate::config::SortingConfig;
use crate::error::{Error, Result};
use crate::fsops::{self, PathLocks};
use crate::model::{
    file_name_of, BeforeState, DocumentMetadata, FileRecord, IndexCheckpoint, ReviewItem,
};
use crate::ledger::SnapshotLedger;
use crate::storage::{lock, queries::now_timestamp};

pub const DUPLICATE_BIN: &str = "_duplicates";

/// Where a ledgered move put a file.
#[derive(Debug, Clone, PartialEq)]
pub struct Filed {
    pub destination: PathBuf,
    pub snapshot_id: i64,
}

pub struct Filer {
    sorted_root: PathBuf,
    sorting: SortingConfig,
    ledger: Arc<SnapshotLedger>,
    locks: PathLocks,
}

impl Filer {
    pub fn new(
        sorted_root: &Path,
        sorting: SortingConfig,
        ledger: Arc<SnapshotLedger>,
        locks: PathLocks,
    ) -> Self {
        Self {
            sorted_root: sorted_root.to_path_buf(),
            sorting,
            ledger,
            locks,
        }
    }

    pub fn subfolder_for(&self, category: &str) -> &str {
        self.sorting
            .category_folders
            .get(&category.to_lowercase())
            .map(String::as_str)
            .unwrap_or(self.sorting.fallback_folder.as_str())
    }

    pub fn target_dir(&self, scope: &str, category: &str, mtime: i64) -> PathBuf {
        let subfolder = self.subfolder_for(category);
        let dir = self.sorted_root.join(scope).join(subfolder);
        let wants_year = self.sorting.enable_year_subfolders
            && self.sorting.year_folders_under.iter().any(|f| f == subfolder);
        match DateTime::from_timestamp(mtime, 0) {
            Some(modified) if wants_year => dir.join(modified.year().to_string()),
            _ => dir,
        }
    }

    pub fn duplicate_bin(&self, scope: &str) -> PathBuf {
        self.sorted_root.join(scope).join(DUPLICATE_BIN)
    }

    /// File a classified document: ledgered `classify` move into its target
    /// directory plus a metadata record. `review` is the queue item this
    /// filing consumes, if any.
    pub fn file(
        &self,
        job_id: Option<i64>,
        record: &FileRecord,
        classification: &Classification,
        index: Option<IndexCheckpoint>,
        review: Option<ReviewItem>,
    ) -> Result<Filed> {
        let dir = self.target_dir(&record.scope, &classification.category, record.mtime);
        let db = self.ledger.database();
        let previous = lock(db)?.get_document(&record.path)?;
        let review_id = review.as_ref().map(|r| r.id);

        self.ledgered_move(
            job_id,
            &record.path,
            &dir,
            |to| BeforeState::Classify {
                from: record.path.clone(),
                to: to.to_path_buf(),
                previous: previous.clone(),
                review: review.clone(),
                index: index.clone(),
            },
            |to| {
                let db = lock(db)?;
                if previous.is_some() {
                    db.delete_document(&record.path)?;
                }
                db.upsert_document(&DocumentMetadata {
                    path: to.to_path_buf(),
                    fingerprint: record.fingerprint.hash.clone(),
                    scope: record.scope.clone(),
                    category: classification.category.clone(),
                    confidence: classification.confidence,
                    customer: classification.customer.clone(),
                    project: classification.project.clone(),
                    tags: classification.tags.clone(),
                    metadata: classification.metadata.clone(),
                    filed_at: now_timestamp(),
                })?;
                if let Some(id) = review_id {
                    db.delete_review_item(id)?;
                }
                Ok(())
            },
        )
    }

    /// Ledgered `move` of `from` into `dir` under a collision-free name.
    /// `review` is a queue item for `from` that the move retires.
    pub fn move_into(
        &self,
        job_id: Option<i64>,
        from: &Path,
        dir: &Path,
        index: Option<IndexCheckpoint>,
        review: Option<ReviewItem>,
    ) -> Result<Filed> {
        let db = self.ledger.database();
        let review_id = review.as_ref().map(|r| r.id);
        self.ledgered_move(
            job_id,
            from,
            dir,
            |to| BeforeState::Move {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                review: review.clone(),
                index: index.clone(),
            },
            |to| {
                let db = lock(db)?;
                db.move_document(from, to)?;
                if let Some(id) = review_id {
                    db.delete_review_item(id)?;
                }
                Ok(())
            },
        )
    }

    pub fn move_to_duplicate_bin(
        &self,
        job_id: Option<i64>,
        from: &Path,
        scope: &str,
        index: Option<IndexCheckpoint>,
        review: Option<ReviewItem>,
    ) -> Result<Filed> {
        let bin = self.duplicate_bin(scope);
        self.move_into(job_id, from, &bin, index, review)
    }

    /// lock → begin → move → record → commit. A failed move aborts the
    /// snapshot; a failed record step moves the file back first.
    fn ledgered_move<S, R>(
        &self,
        job_id: Option<i64>,
        from: &Path,
        dir: &Path,
        make_state: S,
        record: R,
    ) -> Result<Filed>
    where
        S: Fn(&Path) -> BeforeState,
        R: FnOnce(&Path) -> Result<()>,
    {
        let name = file_name_of(from);
        if name.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} has no file name",
                from.display()
            )));
        }

        let (to, _guard) = loop {
            let candidate = fsops::unique_destination(dir, &name);
            let guard = self.locks.acquire(&[from, candidate.as_path()]);
            // Another mutation may have taken the name while we waited.
            if !candidate.exists() {
                break (candidate, guard);
            }
        };

        let snapshot_id = self.ledger.begin(job_id, &make_state(&to))?;
        if let Err(e) = fsops::move_file(from, &to) {
            self.ledger.abort(snapshot_id)?;
            return Err(e.into());
        }

        if let Err(e) = record(&to) {
            warn!("Recording {} failed, undoing move: {}", to.display(), e);
            match fsops::move_file(&to, from) {
                Ok(()) => self.ledger.abort(snapshot_id)?,
                // File stays moved; keep the snapshot so it can be rolled back.
                Err(undo) => {
                    warn!("Could not undo move of {}: {}", from.display(), undo);
                    self.ledger.commit(snapshot_id)?;
                }
            }
            return Err(e);
        }

        self.ledger.commit(snapshot_id)?;
        debug!("{} -> {} (snapshot {})", from.display(), to.display(), snapshot_id);
        Ok(Filed {
            destination: to,
            snapshot_id,
        })
    }
}
