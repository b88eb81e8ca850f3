use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use tracing::{info, warn};

use super::SnapshotLedger;
use crate::error::Result;
use crate::storage::{lock, queries::timestamp};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub purged: Vec<i64>,
    pub freed_bytes: u64,
}

impl SnapshotLedger {
    /// Permanently remove retained content of deletes older than the
    /// retention window. Purged deletes can no longer be rolled back.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let window = ChronoDuration::seconds(self.retention_window_secs.min(i64::MAX as u64) as i64);
        let cutoff = timestamp(now - window);
        let expired = lock(self.database())?.expired_deletes(&cutoff)?;

        let mut report = PurgeReport::default();
        for snapshot in expired {
            let dir = self.retention_dir.join(snapshot.id.to_string());
            let size = dir_size(&dir);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not purge {}: {}", dir.display(), e);
                    continue;
                }
            }
            lock(self.database())?.mark_snapshot_purged(snapshot.id)?;
            report.freed_bytes += size;
            report.purged.push(snapshot.id);
        }

        if !report.purged.is_empty() {
            info!(
                "Purged {} retained delete(s), {} bytes",
                report.purged.len(),
                report.freed_bytes
            );
        }
        Ok(report)
    }
}

fn dir_size(dir: &std::path::Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}
