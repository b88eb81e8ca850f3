//! Write-ahead snapshot ledger.
//!
//! Every filesystem mutation is bracketed by `begin` (durable, before the
//! mutation) and `commit` or `abort` (after it). Rollback, retention and crash
//! recovery all work from these rows alone.

pub mod recovery;
pub mod retention;
pub mod rollback;

pub use recovery::RecoveryReport;
pub use retention::PurgeReport;

use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::model::{file_name_of, BeforeState, IndexCheckpoint, Snapshot, SnapshotState};
use crate::storage::{lock, SharedDatabase};

pub struct SnapshotLedger {
    db: SharedDatabase,
    retention_dir: PathBuf,
    retention_window_secs: u64,
}

fn ledger_write(e: impl std::fmt::Display) -> Error {
    error!("Ledger write failed: {}", e);
    Error::LedgerWrite(e.to_string())
}

impl SnapshotLedger {
    pub fn new(db: SharedDatabase, retention_dir: &Path, retention_window_secs: u64) -> Self {
        Self {
            db,
            retention_dir: retention_dir.to_path_buf(),
            retention_window_secs,
        }
    }

    pub(crate) fn database(&self) -> &SharedDatabase {
        &self.db
    }

    /// Durably record a pending snapshot. The caller must not mutate anything
    /// unless this returns `Ok`.
    pub fn begin(&self, job_id: Option<i64>, before_state: &BeforeState) -> Result<i64> {
        let file_ids = dedup_paths(before_state.touched_paths());
        let db = lock(&self.db).map_err(ledger_write)?;
        let id = db
            .insert_snapshot(job_id, &file_ids, before_state, SnapshotState::Pending)
            .map_err(ledger_write)?;
        debug!(
            "Snapshot {} begun ({}, job {:?})",
            id,
            before_state.operation_type(),
            job_id
        );
        Ok(id)
    }

    /// Begin a soft delete. The retained location embeds the snapshot id, so
    /// the row is written and completed inside one transaction.
    pub fn begin_delete(
        &self,
        job_id: Option<i64>,
        original: &Path,
        index: Option<IndexCheckpoint>,
    ) -> Result<(i64, PathBuf)> {
        let db = lock(&self.db).map_err(ledger_write)?;
        let tx = db
            .connection()
            .unchecked_transaction()
            .map_err(ledger_write)?;

        let mut state = BeforeState::Delete {
            original: original.to_path_buf(),
            retained: PathBuf::new(),
            index,
        };
        let id = db
            .insert_snapshot(job_id, &[original.to_path_buf()], &state, SnapshotState::Pending)
            .map_err(ledger_write)?;
        let retained_path = self.retention_path(id, original);
        if let BeforeState::Delete { retained, .. } = &mut state {
            *retained = retained_path.clone();
        }
        db.update_snapshot_before_state(id, &state)
            .map_err(ledger_write)?;
        tx.commit().map_err(ledger_write)?;
        debug!("Snapshot {} begun (delete {})", id, original.display());
        Ok((id, retained_path))
    }

    pub fn commit(&self, id: i64) -> Result<()> {
        self.finish(id, SnapshotState::Committed)
    }

    /// The mutation did not happen; there is nothing to reverse.
    pub fn abort(&self, id: i64) -> Result<()> {
        self.finish(id, SnapshotState::Aborted)
    }

    fn finish(&self, id: i64, to: SnapshotState) -> Result<()> {
        let db = lock(&self.db).map_err(ledger_write)?;
        if db
            .transition_snapshot(id, SnapshotState::Pending, to)
            .map_err(ledger_write)?
        {
            debug!("Snapshot {} {}", id, to);
            return Ok(());
        }
        match db.get_snapshot(id)? {
            Some(s) => Err(Error::InvalidState(format!(
                "snapshot {} is {}, not pending",
                id, s.state
            ))),
            None => Err(Error::NotFound(format!("snapshot {}", id))),
        }
    }

    pub fn get(&self, id: i64) -> Result<Snapshot> {
        lock(&self.db)?
            .get_snapshot(id)?
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", id)))
    }

    pub fn list(&self, job_id: Option<i64>, offset: i64, limit: i64) -> Result<(Vec<Snapshot>, i64)> {
        Ok(lock(&self.db)?.list_snapshots(job_id, offset, limit)?)
    }

    pub fn reversible_for_job(&self, job_id: i64) -> Result<Vec<Snapshot>> {
        Ok(lock(&self.db)?.reversible_snapshots_for_job(job_id)?)
    }

    pub fn retention_path(&self, snapshot_id: i64, original: &Path) -> PathBuf {
        self.retention_dir
            .join(snapshot_id.to_string())
            .join(file_name_of(original))
    }
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = Vec::with_capacity(paths.len());
    for path in paths {
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationType;
    use crate::storage::Database;
    use tempfile::tempdir;

    fn ledger(dir: &Path) -> SnapshotLedger {
        let db = Database::open_in_memory().unwrap().into_shared();
        SnapshotLedger::new(db, &dir.join("retention"), 3600)
    }

    fn move_state() -> BeforeState {
        BeforeState::Move {
            from: PathBuf::from("/in/a.pdf"),
            to: PathBuf::from("/sorted/a.pdf"),
            review: None,
            index: None,
        }
    }

    #[test]
    fn test_begin_is_pending_until_commit() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let id = ledger.begin(Some(7), &move_state()).unwrap();

        let snap = ledger.get(id).unwrap();
        assert_eq!(snap.state, SnapshotState::Pending);
        assert_eq!(snap.job_id, Some(7));
        assert_eq!(snap.operation_type, OperationType::Move);
        assert_eq!(
            snap.file_ids,
            vec![PathBuf::from("/in/a.pdf"), PathBuf::from("/sorted/a.pdf")]
        );

        ledger.commit(id).unwrap();
        assert_eq!(ledger.get(id).unwrap().state, SnapshotState::Committed);
    }

    #[test]
    fn test_commit_after_abort_is_invalid() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let id = ledger.begin(None, &move_state()).unwrap();
        ledger.abort(id).unwrap();

        assert!(matches!(ledger.commit(id), Err(Error::InvalidState(_))));
        assert!(matches!(ledger.commit(id + 100), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_begin_delete_embeds_snapshot_id() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let (id, retained) = ledger
            .begin_delete(None, Path::new("/sorted/acme/_duplicates/a_1.pdf"), None)
            .unwrap();

        assert_eq!(
            retained,
            dir.path().join("retention").join(id.to_string()).join("a_1.pdf")
        );
        match ledger.get(id).unwrap().before_state {
            BeforeState::Delete { retained: r, .. } => assert_eq!(r, retained),
            other => panic!("unexpected state {:?}", other),
        }
    }
}
