use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::SnapshotLedger;
use crate::error::{Error, Result};
use crate::fsops::{self, PathLocks};
use crate::model::{BeforeState, IndexCheckpoint, RollbackFailure, RollbackReport, Snapshot};
use crate::resolver::DuplicateResolver;
use crate::storage::lock;

impl SnapshotLedger {
    /// Reverse `targets`, most recent first, continuing past failures.
    ///
    /// Each reversed snapshot is marked consumed by one `rollback` snapshot.
    /// Duplicate-index groups touched by the reversed snapshots are put back
    /// to the oldest captured state per group.
    pub fn rollback(
        &self,
        job_id: Option<i64>,
        mut targets: Vec<Snapshot>,
        resolver: &DuplicateResolver,
        locks: &PathLocks,
    ) -> Result<RollbackReport> {
        targets.sort_by(|a, b| b.id.cmp(&a.id));
        let planned: Vec<i64> = targets.iter().map(|s| s.id).collect();
        let rollback_id = self.begin(job_id, &BeforeState::Rollback { consumed: planned })?;

        let mut report = RollbackReport::default();
        let mut checkpoints: HashMap<(String, String), IndexCheckpoint> = HashMap::new();

        for snapshot in &targets {
            let touched = snapshot.before_state.touched_paths();
            let _guard = locks.acquire(&touched);
            match self.reverse(snapshot) {
                Ok(restored) => {
                    report.restored.extend(restored);
                    report.consumed.push(snapshot.id);
                    if let Some(cp) = snapshot.before_state.index_checkpoint() {
                        checkpoints
                            .entry((cp.scope.clone(), cp.fingerprint.clone()))
                            .and_modify(|kept| {
                                if cp.version < kept.version {
                                    *kept = cp.clone();
                                }
                            })
                            .or_insert_with(|| cp.clone());
                    }
                }
                Err(e) => {
                    warn!("Could not reverse snapshot {}: {}", snapshot.id, e);
                    report.failed.push(RollbackFailure {
                        snapshot_id: snapshot.id,
                        path: touched.into_iter().next().unwrap_or_default(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        for checkpoint in checkpoints.values() {
            resolver.restore(checkpoint);
        }

        if report.consumed.is_empty() {
            self.abort(rollback_id)?;
        } else {
            {
                let db = lock(self.database())?;
                db.update_snapshot_before_state(
                    rollback_id,
                    &BeforeState::Rollback {
                        consumed: report.consumed.clone(),
                    },
                )?;
                db.consume_snapshots(&report.consumed, rollback_id)?;
            }
            self.commit(rollback_id)?;
            report.rollback_snapshot = Some(rollback_id);
        }

        info!(
            "Rollback {} reversed {} snapshot(s), {} failure(s)",
            rollback_id,
            report.consumed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Apply the inverse of one snapshot; returns the paths put back.
    fn reverse(&self, snapshot: &Snapshot) -> Result<Vec<PathBuf>> {
        match &snapshot.before_state {
            BeforeState::Move {
                from, to, review, ..
            } => {
                undo_move(to, from)?;
                let db = lock(self.database())?;
                db.move_document(to, from)?;
                if let Some(item) = review {
                    db.insert_review_item(item, true)?;
                }
                Ok(vec![from.clone()])
            }
            BeforeState::Delete {
                original, retained, ..
            } => {
                self.restore_retained(snapshot, original, retained)?;
                Ok(vec![original.clone()])
            }
            BeforeState::Classify {
                from,
                to,
                previous,
                review,
                ..
            } => {
                undo_move(to, from)?;
                let db = lock(self.database())?;
                db.delete_document(to)?;
                if let Some(previous) = previous {
                    db.upsert_document(previous)?;
                }
                if let Some(item) = review {
                    db.insert_review_item(item, true)?;
                }
                Ok(vec![from.clone()])
            }
            BeforeState::Promote {
                primary_from,
                primary_to,
                duplicate_from,
                duplicate_to,
                ..
            } => {
                undo_move(duplicate_to, duplicate_from)?;
                let mut restored = vec![duplicate_from.clone()];
                if let Some(primary_to) = primary_to {
                    undo_move(primary_to, primary_from)?;
                    restored.push(primary_from.clone());
                }
                Ok(restored)
            }
            BeforeState::Rollback { .. } => Err(Error::InvalidArgument(format!(
                "snapshot {} is a rollback and cannot be reversed",
                snapshot.id
            ))),
        }
    }

    fn restore_retained(&self, snapshot: &Snapshot, original: &Path, retained: &Path) -> Result<()> {
        if snapshot.purged {
            return Err(Error::RollbackUnrecoverable(format!(
                "retained copy of {} was purged",
                original.display()
            )));
        }
        if !retained.exists() {
            if original.exists() {
                return Ok(());
            }
            return Err(Error::RollbackUnrecoverable(format!(
                "retained copy of {} is missing",
                original.display()
            )));
        }

        fsops::move_file(retained, original)?;
        if let Some(dir) = retained.parent() {
            // Only succeeds once the directory is empty.
            let _ = fs::remove_dir(dir);
        }
        Ok(())
    }
}

/// Move `current` back to `original`. Already-reversed moves are accepted so
/// that an interrupted rollback can be repeated.
fn undo_move(current: &Path, original: &Path) -> Result<()> {
    if current.exists() {
        fsops::move_file(current, original)?;
        return Ok(());
    }
    if original.exists() {
        return Ok(());
    }
    Err(Error::RollbackUnrecoverable(format!(
        "{} is missing",
        current.display()
    )))
}
