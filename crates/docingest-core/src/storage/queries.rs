use super::sqlite::Database;
use crate::model::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Result, Row};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Fixed-width UTC timestamp, so that stored values order lexicographically.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    timestamp(Utc::now())
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))
}

/// Filters for the review queue listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReviewFilter {
    pub customer: Option<String>,
    pub project: Option<String>,
    #[serde(alias = "minConfidence")]
    pub min_confidence: Option<f64>,
    #[serde(alias = "maxConfidence")]
    pub max_confidence: Option<f64>,
}

const JOB_COLUMNS: &str = "id, status, progress, total_files, processed_files, successful_files, \
     failed_files, duplicates_found, review_queued, started_at, completed_at, error, resumed_from";

fn job_from_row(row: &Row<'_>) -> Result<ProcessingJob> {
    Ok(ProcessingJob {
        id: row.get(0)?,
        status: parse_col(row, 1)?,
        progress: row.get::<_, i64>(2)? as u8,
        total_files: row.get::<_, i64>(3)? as u64,
        processed_files: row.get::<_, i64>(4)? as u64,
        successful_files: row.get::<_, i64>(5)? as u64,
        failed_files: row.get::<_, i64>(6)? as u64,
        duplicates_found: row.get::<_, i64>(7)? as u64,
        review_queued: row.get::<_, i64>(8)? as u64,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        error: row.get(11)?,
        resumed_from: row.get(12)?,
    })
}

const SNAPSHOT_COLUMNS: &str =
    "id, job_id, operation_type, file_ids, timestamp, before_state, state, consumed_by, purged";

fn snapshot_from_row(row: &Row<'_>) -> Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        job_id: row.get(1)?,
        operation_type: parse_col(row, 2)?,
        file_ids: json_col(row, 3)?,
        timestamp: row.get(4)?,
        before_state: json_col(row, 5)?,
        state: parse_col(row, 6)?,
        consumed_by: row.get(7)?,
        purged: row.get(8)?,
    })
}

const REVIEW_COLUMNS: &str = "id, original_path, filename, size, mtime, suggested_category, \
     confidence, customer, project, tags, metadata, scope, fingerprint, job_id";

fn review_from_row(row: &Row<'_>) -> Result<ReviewItem> {
    Ok(ReviewItem {
        id: row.get(0)?,
        original_path: PathBuf::from(row.get::<_, String>(1)?),
        filename: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        mtime: row.get(4)?,
        suggested_category: row.get(5)?,
        confidence: row.get(6)?,
        customer: row.get(7)?,
        project: row.get(8)?,
        tags: json_col(row, 9)?,
        metadata: json_col(row, 10)?,
        scope: row.get(11)?,
        fingerprint: row.get(12)?,
        job_id: row.get(13)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "path, fingerprint, scope, category, confidence, customer, project, tags, metadata, filed_at";

fn document_from_row(row: &Row<'_>) -> Result<DocumentMetadata> {
    Ok(DocumentMetadata {
        path: PathBuf::from(row.get::<_, String>(0)?),
        fingerprint: row.get(1)?,
        scope: row.get(2)?,
        category: row.get(3)?,
        confidence: row.get(4)?,
        customer: row.get(5)?,
        project: row.get(6)?,
        tags: json_col(row, 7)?,
        metadata: json_col(row, 8)?,
        filed_at: row.get(9)?,
    })
}

impl Database {
    // ── Jobs ─────────────────────────────────────────────────────

    /// Create a pending job together with one pending row per file.
    pub fn insert_job(
        &self,
        files: &[PathBuf],
        options: &JobOptions,
        resumed_from: Option<i64>,
    ) -> Result<i64> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO processing_job (status, total_files, started_at, resumed_from, options) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                JobStatus::Pending.as_str(),
                files.len() as i64,
                now_timestamp(),
                resumed_from,
                to_json(options)?,
            ],
        )?;
        let job_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO job_file (job_id, position, path, status) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, path) in files.iter().enumerate() {
                stmt.execute(params![
                    job_id,
                    position as i64,
                    path_text(path),
                    FileStatus::Pending.as_str()
                ])?;
            }
        }
        tx.commit()?;
        debug!("Created job {} with {} files", job_id, files.len());
        Ok(job_id)
    }

    pub fn get_job(&self, job_id: i64) -> Result<Option<ProcessingJob>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM processing_job WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()
    }

    pub fn get_job_options(&self, job_id: i64) -> Result<Option<JobOptions>> {
        self.connection()
            .query_row(
                "SELECT options FROM processing_job WHERE id = ?1",
                params![job_id],
                |row| json_col(row, 0),
            )
            .optional()
    }

    /// Jobs newest-first; returns (jobs, total_count).
    pub fn list_jobs(&self, offset: i64, limit: i64) -> Result<(Vec<ProcessingJob>, i64)> {
        let total: i64 =
            self.connection()
                .query_row("SELECT COUNT(*) FROM processing_job", [], |row| row.get(0))?;
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM processing_job ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![limit, offset], job_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok((jobs, total))
    }

    pub fn job_ids_in_status(&self, status: JobStatus) -> Result<Vec<i64>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id FROM processing_job WHERE status = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![status.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Persist the counters, progress and status of a job.
    pub fn update_job(&self, job: &ProcessingJob) -> Result<()> {
        self.connection().execute(
            "UPDATE processing_job SET status = ?1, progress = ?2, processed_files = ?3, \
             successful_files = ?4, failed_files = ?5, duplicates_found = ?6, \
             review_queued = ?7, completed_at = ?8, error = ?9 WHERE id = ?10",
            params![
                job.status.as_str(),
                job.progress as i64,
                job.processed_files as i64,
                job.successful_files as i64,
                job.failed_files as i64,
                job.duplicates_found as i64,
                job.review_queued as i64,
                job.completed_at,
                job.error,
                job.id,
            ],
        )?;
        Ok(())
    }

    pub fn set_job_status(
        &self,
        job_id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let completed_at = status.is_terminal().then(now_timestamp);
        self.connection().execute(
            "UPDATE processing_job SET status = ?1, error = ?2, \
             completed_at = COALESCE(?3, completed_at) WHERE id = ?4",
            params![status.as_str(), error, completed_at, job_id],
        )?;
        Ok(())
    }

    pub fn update_job_file(&self, job_id: i64, file: &JobFile) -> Result<()> {
        self.connection().execute(
            "UPDATE job_file SET status = ?1, scope = ?2, fingerprint = ?3, destination = ?4, \
             error = ?5 WHERE job_id = ?6 AND position = ?7",
            params![
                file.status.as_str(),
                file.scope,
                file.fingerprint,
                file.destination.as_deref().map(path_text),
                file.error,
                job_id,
                file.position as i64,
            ],
        )?;
        Ok(())
    }

    pub fn set_job_file_status(&self, job_id: i64, position: u32, status: FileStatus) -> Result<()> {
        self.connection().execute(
            "UPDATE job_file SET status = ?1 WHERE job_id = ?2 AND position = ?3",
            params![status.as_str(), job_id, position as i64],
        )?;
        Ok(())
    }

    pub fn job_files(&self, job_id: i64, status: Option<FileStatus>) -> Result<Vec<JobFile>> {
        let mut stmt = self.connection().prepare(
            "SELECT position, path, status, scope, fingerprint, destination, error \
             FROM job_file WHERE job_id = ?1 AND (?2 IS NULL OR status = ?2) \
             ORDER BY position",
        )?;
        let files = stmt
            .query_map(params![job_id, status.map(|s| s.as_str())], |row| {
                Ok(JobFile {
                    position: row.get::<_, i64>(0)? as u32,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    status: parse_col(row, 2)?,
                    scope: row.get(3)?,
                    fingerprint: row.get(4)?,
                    destination: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
                    error: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Put files left `processing` back to `pending`, e.g. after an interrupted run.
    pub fn reset_processing_files(&self, job_id: i64) -> Result<usize> {
        self.connection().execute(
            "UPDATE job_file SET status = ?1 WHERE job_id = ?2 AND status = ?3",
            params![
                FileStatus::Pending.as_str(),
                job_id,
                FileStatus::Processing.as_str()
            ],
        )
    }

    pub fn processing_stats(&self) -> Result<ProcessingStats> {
        let total_jobs: i64 =
            self.connection()
                .query_row("SELECT COUNT(*) FROM processing_job", [], |row| row.get(0))?;

        let mut by_status = FilesByStatus::default();
        let mut stmt = self
            .connection()
            .prepare("SELECT status, COUNT(*) FROM job_file GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((parse_col::<FileStatus>(row, 0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>>>()?;
        for (status, count) in rows {
            match status {
                FileStatus::Pending => by_status.pending = count,
                FileStatus::Processing => by_status.processing = count,
                FileStatus::Filed => by_status.filed = count,
                FileStatus::Duplicate => by_status.duplicate = count,
                FileStatus::Review => by_status.review = count,
                FileStatus::Failed => by_status.failed = count,
            }
        }

        Ok(ProcessingStats {
            total_jobs: total_jobs as u64,
            total_files_processed: by_status.filed
                + by_status.duplicate
                + by_status.review
                + by_status.failed,
            successful_files: by_status.filed + by_status.duplicate + by_status.review,
            failed_files: by_status.failed,
            skipped_files: self.stranded_pending_files()?,
            files_by_status: by_status,
        })
    }

    /// Files still `pending` in jobs that will not run them any more.
    fn stranded_pending_files(&self) -> Result<u64> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM job_file f JOIN processing_job j ON j.id = f.job_id \
             WHERE f.status = ?1 AND j.status IN (?2, ?3, ?4)",
            params![
                FileStatus::Pending.as_str(),
                JobStatus::Completed.as_str(),
                JobStatus::Failed.as_str(),
                JobStatus::RolledBack.as_str()
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ── Snapshots ────────────────────────────────────────────────

    pub fn insert_snapshot(
        &self,
        job_id: Option<i64>,
        file_ids: &[PathBuf],
        before_state: &BeforeState,
        state: SnapshotState,
    ) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO snapshot (job_id, operation_type, file_ids, timestamp, before_state, state) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                before_state.operation_type().as_str(),
                to_json(&file_ids)?,
                now_timestamp(),
                to_json(before_state)?,
                state.as_str(),
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn update_snapshot_before_state(&self, id: i64, before_state: &BeforeState) -> Result<()> {
        self.connection().execute(
            "UPDATE snapshot SET before_state = ?1 WHERE id = ?2",
            params![to_json(before_state)?, id],
        )?;
        Ok(())
    }

    /// Move a snapshot from `from` to `to`; returns false when it was not in `from`.
    pub fn transition_snapshot(
        &self,
        id: i64,
        from: SnapshotState,
        to: SnapshotState,
    ) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE snapshot SET state = ?1 WHERE id = ?2 AND state = ?3",
            params![to.as_str(), id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    pub fn consume_snapshots(&self, ids: &[i64], consumed_by: i64) -> Result<()> {
        let tx = self.connection().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE snapshot SET state = ?1, consumed_by = ?2 WHERE id = ?3 AND state = ?4",
            )?;
            for id in ids {
                stmt.execute(params![
                    SnapshotState::Consumed.as_str(),
                    consumed_by,
                    id,
                    SnapshotState::Committed.as_str()
                ])?;
            }
        }
        tx.commit()
    }

    pub fn get_snapshot(&self, id: i64) -> Result<Option<Snapshot>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM snapshot WHERE id = ?1", SNAPSHOT_COLUMNS),
                params![id],
                snapshot_from_row,
            )
            .optional()
    }

    /// Snapshots newest-first; returns (snapshots, total_count).
    pub fn list_snapshots(
        &self,
        job_id: Option<i64>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Snapshot>, i64)> {
        let total: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM snapshot WHERE ?1 IS NULL OR job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM snapshot WHERE ?1 IS NULL OR job_id = ?1 \
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(params![job_id, limit, offset], snapshot_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok((snapshots, total))
    }

    pub fn snapshots_in_state(&self, state: SnapshotState) -> Result<Vec<Snapshot>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM snapshot WHERE state = ?1 ORDER BY id",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(params![state.as_str()], snapshot_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    /// Committed, non-rollback snapshots of a job, most recent first.
    pub fn reversible_snapshots_for_job(&self, job_id: i64) -> Result<Vec<Snapshot>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM snapshot WHERE job_id = ?1 AND state = ?2 AND operation_type != ?3 \
             ORDER BY id DESC",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(
                params![
                    job_id,
                    SnapshotState::Committed.as_str(),
                    OperationType::Rollback.as_str()
                ],
                snapshot_from_row,
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    /// Committed delete snapshots recorded before `cutoff` whose content is still retained.
    pub fn expired_deletes(&self, cutoff: &str) -> Result<Vec<Snapshot>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM snapshot WHERE operation_type = ?1 AND state = ?2 \
             AND purged = 0 AND timestamp < ?3 ORDER BY id",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(
                params![
                    OperationType::Delete.as_str(),
                    SnapshotState::Committed.as_str(),
                    cutoff
                ],
                snapshot_from_row,
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    pub fn mark_snapshot_purged(&self, id: i64) -> Result<()> {
        self.connection()
            .execute("UPDATE snapshot SET purged = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Review Queue ─────────────────────────────────────────────

    /// Insert a review item; `item.id` is ignored unless `keep_id` is set.
    pub fn insert_review_item(&self, item: &ReviewItem, keep_id: bool) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO review_item (id, original_path, filename, size, mtime, \
             suggested_category, confidence, customer, project, tags, metadata, scope, \
             fingerprint, job_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
             ON CONFLICT(original_path) DO UPDATE SET \
                 filename = excluded.filename, \
                 size = excluded.size, \
                 mtime = excluded.mtime, \
                 suggested_category = excluded.suggested_category, \
                 confidence = excluded.confidence, \
                 customer = excluded.customer, \
                 project = excluded.project, \
                 tags = excluded.tags, \
                 metadata = excluded.metadata, \
                 scope = excluded.scope, \
                 fingerprint = excluded.fingerprint, \
                 job_id = excluded.job_id",
            params![
                keep_id.then_some(item.id),
                path_text(&item.original_path),
                item.filename,
                item.size as i64,
                item.mtime,
                item.suggested_category,
                item.confidence,
                item.customer,
                item.project,
                to_json(&item.tags)?,
                to_json(&item.metadata)?,
                item.scope,
                item.fingerprint,
                item.job_id,
            ],
        )?;
        self.connection().query_row(
            "SELECT id FROM review_item WHERE original_path = ?1",
            params![path_text(&item.original_path)],
            |row| row.get(0),
        )
    }

    pub fn get_review_item(&self, id: i64) -> Result<Option<ReviewItem>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM review_item WHERE id = ?1", REVIEW_COLUMNS),
                params![id],
                review_from_row,
            )
            .optional()
    }

    /// Pending items in insertion order.
    pub fn list_review_items(&self, filter: &ReviewFilter) -> Result<Vec<ReviewItem>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM review_item \
             WHERE (?1 IS NULL OR customer = ?1 OR scope = ?1) \
               AND (?2 IS NULL OR project = ?2) \
               AND (?3 IS NULL OR confidence >= ?3) \
               AND (?4 IS NULL OR confidence <= ?4) \
             ORDER BY id",
            REVIEW_COLUMNS
        ))?;
        let items = stmt
            .query_map(
                params![
                    filter.customer,
                    filter.project,
                    filter.min_confidence,
                    filter.max_confidence
                ],
                review_from_row,
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn delete_review_item(&self, id: i64) -> Result<usize> {
        self.connection()
            .execute("DELETE FROM review_item WHERE id = ?1", params![id])
    }

    pub fn review_item_for_path(&self, path: &Path) -> Result<Option<ReviewItem>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM review_item WHERE original_path = ?1",
                    REVIEW_COLUMNS
                ),
                params![path_text(path)],
                review_from_row,
            )
            .optional()
    }

    pub fn review_items_for_job(&self, job_id: i64) -> Result<Vec<ReviewItem>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM review_item WHERE job_id = ?1 ORDER BY id",
            REVIEW_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![job_id], review_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(items)
    }

    // ── Document Metadata ────────────────────────────────────────

    pub fn get_document(&self, path: &Path) -> Result<Option<DocumentMetadata>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM document_metadata WHERE path = ?1", DOCUMENT_COLUMNS),
                params![path_text(path)],
                document_from_row,
            )
            .optional()
    }

    pub fn upsert_document(&self, doc: &DocumentMetadata) -> Result<()> {
        self.connection().execute(
            "INSERT INTO document_metadata \
             (path, fingerprint, scope, category, confidence, customer, project, tags, metadata, filed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(path) DO UPDATE SET \
                 fingerprint = excluded.fingerprint, \
                 scope = excluded.scope, \
                 category = excluded.category, \
                 confidence = excluded.confidence, \
                 customer = excluded.customer, \
                 project = excluded.project, \
                 tags = excluded.tags, \
                 metadata = excluded.metadata, \
                 filed_at = excluded.filed_at",
            params![
                path_text(&doc.path),
                doc.fingerprint,
                doc.scope,
                doc.category,
                doc.confidence,
                doc.customer,
                doc.project,
                to_json(&doc.tags)?,
                to_json(&doc.metadata)?,
                doc.filed_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_document(&self, path: &Path) -> Result<usize> {
        self.connection().execute(
            "DELETE FROM document_metadata WHERE path = ?1",
            params![path_text(path)],
        )
    }

    /// Re-key a document after its file moved.
    pub fn move_document(&self, from: &Path, to: &Path) -> Result<usize> {
        self.connection().execute(
            "UPDATE document_metadata SET path = ?1 WHERE path = ?2",
            params![path_text(to), path_text(from)],
        )
    }

    pub fn all_documents(&self) -> Result<Vec<DocumentMetadata>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM document_metadata ORDER BY filed_at, path",
            DOCUMENT_COLUMNS
        ))?;
        let docs = stmt
            .query_map([], document_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review_item(path: &str, confidence: f64, customer: Option<&str>) -> ReviewItem {
        ReviewItem {
            id: 0,
            original_path: PathBuf::from(path),
            filename: file_name_of(Path::new(path)),
            size: 10,
            mtime: 1_700_000_000,
            suggested_category: "finanzen".to_string(),
            confidence,
            customer: customer.map(str::to_string),
            project: None,
            tags: vec!["scan".to_string()],
            metadata: json!({}),
            scope: "ALLGEMEIN".to_string(),
            fingerprint: "ab".repeat(32),
            job_id: None,
        }
    }

    #[test]
    fn test_insert_job_creates_pending_files() {
        let db = Database::open_in_memory().unwrap();
        let files = vec![PathBuf::from("/in/a.pdf"), PathBuf::from("/in/b.pdf")];
        let id = db.insert_job(&files, &JobOptions::default(), None).unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_files, 2);

        let rows = db.job_files(id, Some(FileStatus::Pending)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].path, PathBuf::from("/in/b.pdf"));
        assert!(db.get_job(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_transitions_only_from_expected_state() {
        let db = Database::open_in_memory().unwrap();
        let state = BeforeState::Move {
            from: PathBuf::from("/a"),
            to: PathBuf::from("/b"),
            review: None,
            index: None,
        };
        let id = db
            .insert_snapshot(Some(1), &[PathBuf::from("/a")], &state, SnapshotState::Pending)
            .unwrap();

        assert!(db
            .transition_snapshot(id, SnapshotState::Pending, SnapshotState::Committed)
            .unwrap());
        assert!(!db
            .transition_snapshot(id, SnapshotState::Pending, SnapshotState::Aborted)
            .unwrap());

        let snap = db.get_snapshot(id).unwrap().unwrap();
        assert_eq!(snap.state, SnapshotState::Committed);
        assert_eq!(snap.operation_type, OperationType::Move);
        assert_eq!(snap.before_state, state);
    }

    #[test]
    fn test_review_items_filter_and_keep_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        db.insert_review_item(&review_item("/in/1.pdf", 0.6, Some("acme")), false)
            .unwrap();
        db.insert_review_item(&review_item("/in/2.pdf", 0.2, None), false)
            .unwrap();
        db.insert_review_item(&review_item("/in/3.pdf", 0.7, Some("acme")), false)
            .unwrap();

        let all = db.list_review_items(&ReviewFilter::default()).unwrap();
        let names: Vec<_> = all.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["1.pdf", "2.pdf", "3.pdf"]);

        let filtered = db
            .list_review_items(&ReviewFilter {
                customer: Some("acme".to_string()),
                min_confidence: Some(0.65),
                ..ReviewFilter::default()
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].filename, "3.pdf");
    }

    #[test]
    fn test_review_item_reinsert_keeps_id() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .insert_review_item(&review_item("/in/1.pdf", 0.6, None), false)
            .unwrap();
        let mut item = db.get_review_item(id).unwrap().unwrap();
        assert_eq!(db.delete_review_item(id).unwrap(), 1);

        item.confidence = 0.5;
        let again = db.insert_review_item(&item, true).unwrap();
        assert_eq!(again, id);
        assert_eq!(db.get_review_item(id).unwrap().unwrap().confidence, 0.5);
    }

    #[test]
    fn test_stats_count_files_by_status() {
        let db = Database::open_in_memory().unwrap();
        let files = vec![PathBuf::from("/in/a"), PathBuf::from("/in/b")];
        let id = db.insert_job(&files, &JobOptions::default(), None).unwrap();
        db.update_job_file(
            id,
            &JobFile {
                position: 0,
                path: files[0].clone(),
                status: FileStatus::Duplicate,
                scope: Some("acme".to_string()),
                fingerprint: None,
                destination: None,
                error: None,
            },
        )
        .unwrap();

        let stats = db.processing_stats().unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.files_by_status.duplicate, 1);
        assert_eq!(stats.files_by_status.pending, 1);
        assert_eq!(stats.skipped_files, 0);
        assert_eq!(stats.total_files_processed, 1);

        db.set_job_status(id, JobStatus::Failed, Some("stopped")).unwrap();
        let stats = db.processing_stats().unwrap();
        assert_eq!(stats.skipped_files, 1);
        assert_eq!(stats.files_by_status.duplicate, 1);
    }

    #[test]
    fn test_review_items_by_path_and_job() {
        let db = Database::open_in_memory().unwrap();
        let job = db
            .insert_job(&[PathBuf::from("/in/1.pdf")], &JobOptions::default(), None)
            .unwrap();
        let mut owned = review_item("/in/1.pdf", 0.6, None);
        owned.job_id = Some(job);
        db.insert_review_item(&owned, false).unwrap();
        db.insert_review_item(&review_item("/in/2.pdf", 0.6, None), false)
            .unwrap();

        let found = db
            .review_item_for_path(Path::new("/in/2.pdf"))
            .unwrap()
            .unwrap();
        assert_eq!(found.filename, "2.pdf");
        assert!(db
            .review_item_for_path(Path::new("/in/3.pdf"))
            .unwrap()
            .is_none());

        let for_job = db.review_items_for_job(job).unwrap();
        assert_eq!(for_job.len(), 1);
        assert_eq!(for_job[0].original_path, PathBuf::from("/in/1.pdf"));
    }

    #[test]
    fn test_timestamps_order_lexicographically() {
        let early = timestamp(DateTime::from_timestamp(1_000, 0).unwrap());
        let late = timestamp(DateTime::from_timestamp(1_000, 500_000).unwrap());
        assert!(early < late);
        assert_eq!(early.len(), late.len());
    }
}
