use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::SnapshotLedger;
use crate::error::Result;
use crate::fsops;
use crate::model::{BeforeState, Snapshot, SnapshotState};
use crate::storage::lock;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub committed: Vec<i64>,
    pub aborted: Vec<i64>,
    /// Aborted after putting a partly swapped primary back in place.
    pub repaired: Vec<i64>,
}

/// How far a pending mutation got before the crash.
#[derive(Debug, PartialEq)]
enum DiskState {
    Applied,
    Untouched,
    /// A promote moved the primary into the bin but not the duplicate out.
    PrimaryBinned { binned: PathBuf, primary: PathBuf },
}

impl SnapshotLedger {
    /// Settle snapshots left `pending` by a crash: commit those whose mutation
    /// is visible on disk, abort the rest.
    pub fn recover_pending(&self) -> Result<RecoveryReport> {
        let pending = lock(self.database())?.snapshots_in_state(SnapshotState::Pending)?;
        let mut report = RecoveryReport::default();

        for snapshot in pending {
            match disk_state(&snapshot) {
                DiskState::Applied => {
                    self.commit(snapshot.id)?;
                    report.committed.push(snapshot.id);
                }
                DiskState::Untouched => {
                    self.abort(snapshot.id)?;
                    report.aborted.push(snapshot.id);
                }
                DiskState::PrimaryBinned { binned, primary } => {
                    match fsops::move_file(&binned, &primary) {
                        Ok(()) => {
                            self.abort(snapshot.id)?;
                            report.aborted.push(snapshot.id);
                            report.repaired.push(snapshot.id);
                        }
                        Err(e) => {
                            // Committed, rollback can still finish the undo.
                            warn!(
                                "Could not move {} back to {}: {}",
                                binned.display(),
                                primary.display(),
                                e
                            );
                            self.commit(snapshot.id)?;
                            report.committed.push(snapshot.id);
                        }
                    }
                }
            }
        }

        if !report.committed.is_empty() || !report.aborted.is_empty() {
            warn!(
                "Recovered pending snapshots: {} committed, {} aborted ({} repaired)",
                report.committed.len(),
                report.aborted.len(),
                report.repaired.len()
            );
        } else {
            info!("No pending snapshots to recover");
        }
        Ok(report)
    }
}

fn moved(from: &Path, to: &Path) -> bool {
    to.exists() && !from.exists()
}

fn applied_if(done: bool) -> DiskState {
    if done {
        DiskState::Applied
    } else {
        DiskState::Untouched
    }
}

fn disk_state(snapshot: &Snapshot) -> DiskState {
    match &snapshot.before_state {
        BeforeState::Move { from, to, .. } | BeforeState::Classify { from, to, .. } => {
            applied_if(moved(from, to))
        }
        BeforeState::Delete {
            original, retained, ..
        } => applied_if(moved(original, retained)),
        BeforeState::Promote {
            primary_from,
            primary_to,
            duplicate_from,
            duplicate_to,
            ..
        } => {
            if moved(duplicate_from, duplicate_to) {
                return DiskState::Applied;
            }
            match primary_to {
                Some(binned) if moved(primary_from, binned) && duplicate_from.exists() => {
                    DiskState::PrimaryBinned {
                        binned: binned.clone(),
                        primary: primary_from.clone(),
                    }
                }
                _ => DiskState::Untouched,
            }
        }
        // A rollback that died midway is repeated by the operator; its
        // individual reversals are idempotent.
        BeforeState::Rollback { .. } => DiskState::Untouched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_pending_snapshots_resolve_by_disk_state() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap().into_shared();
        let ledger = SnapshotLedger::new(db, &dir.path().join("retention"), 3600);

        // Applied: destination exists, source gone.
        let applied_to = dir.path().join("filed.pdf");
        fs::write(&applied_to, "x").unwrap();
        let applied = ledger
            .begin(
                Some(1),
                &BeforeState::Move {
                    from: dir.path().join("inbox.pdf"),
                    to: applied_to,
                    review: None,
                    index: None,
                },
            )
            .unwrap();

        // Not applied: source still in place.
        let untouched_from = dir.path().join("still_here.pdf");
        fs::write(&untouched_from, "y").unwrap();
        let untouched = ledger
            .begin(
                Some(1),
                &BeforeState::Move {
                    from: untouched_from,
                    to: dir.path().join("never.pdf"),
                    review: None,
                    index: None,
                },
            )
            .unwrap();

        let report = ledger.recover_pending().unwrap();
        assert_eq!(report.committed, vec![applied]);
        assert_eq!(report.aborted, vec![untouched]);
        assert_eq!(ledger.get(applied).unwrap().state, SnapshotState::Committed);
        assert_eq!(ledger.get(untouched).unwrap().state, SnapshotState::Aborted);
    }

    fn promote_state(dir: &Path) -> (BeforeState, PathBuf, PathBuf, PathBuf) {
        let primary = dir.join("acme").join("Rechnungen").join("a.pdf");
        let binned = dir.join("acme").join("_duplicates").join("a.pdf");
        let duplicate = dir.join("acme").join("_duplicates").join("b.pdf");
        let state = BeforeState::Promote {
            primary_from: primary.clone(),
            primary_to: Some(binned.clone()),
            duplicate_from: duplicate.clone(),
            duplicate_to: primary.clone(),
            index: None,
        };
        (state, primary, binned, duplicate)
    }

    #[test]
    fn test_half_finished_promote_puts_primary_back() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap().into_shared();
        let ledger = SnapshotLedger::new(db, &dir.path().join("retention"), 3600);
        let (state, primary, binned, duplicate) = promote_state(dir.path());
        fs::create_dir_all(binned.parent().unwrap()).unwrap();
        fs::write(&binned, "primary").unwrap();
        fs::write(&duplicate, "duplicate").unwrap();
        let id = ledger.begin(None, &state).unwrap();

        let report = ledger.recover_pending().unwrap();
        assert_eq!(report.aborted, vec![id]);
        assert_eq!(report.repaired, vec![id]);
        assert_eq!(ledger.get(id).unwrap().state, SnapshotState::Aborted);
        assert_eq!(fs::read_to_string(&primary).unwrap(), "primary");
        assert!(!binned.exists());
        assert_eq!(fs::read_to_string(&duplicate).unwrap(), "duplicate");
    }

    #[test]
    fn test_finished_promote_commits() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap().into_shared();
        let ledger = SnapshotLedger::new(db, &dir.path().join("retention"), 3600);
        let (state, primary, binned, _) = promote_state(dir.path());
        fs::create_dir_all(primary.parent().unwrap()).unwrap();
        fs::create_dir_all(binned.parent().unwrap()).unwrap();
        fs::write(&binned, "primary").unwrap();
        fs::write(&primary, "duplicate").unwrap();
        let id = ledger.begin(None, &state).unwrap();

        let report = ledger.recover_pending().unwrap();
        assert_eq!(report.committed, vec![id]);
        assert!(report.repaired.is_empty());
        assert_eq!(fs::read_to_string(&binned).unwrap(), "primary");
    }
}
