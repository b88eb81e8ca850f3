use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::classifier::Classification;
use crate::error::{Error, Result};
use crate::model::{FileRecord, ReviewItem};
use crate::storage::{lock, ReviewFilter, SharedDatabase};

/// Classification decisions waiting for an operator.
pub struct ReviewQueue {
    db: SharedDatabase,
    feedback_path: PathBuf,
}

/// One line of the feedback log written on every confirmation.
#[derive(Debug, Serialize)]
struct Feedback<'a> {
    id: i64,
    chosen_category: &'a str,
    suggested_category: &'a str,
    confidence: f64,
    customer: Option<&'a str>,
    project: Option<&'a str>,
    filename: &'a str,
    moved_to: &'a Path,
    timestamp: String,
}

impl ReviewQueue {
    pub fn new(db: SharedDatabase, feedback_path: &Path) -> Self {
        Self {
            db,
            feedback_path: feedback_path.to_path_buf(),
        }
    }

    pub fn enqueue(
        &self,
        record: &FileRecord,
        classification: &Classification,
        job_id: Option<i64>,
    ) -> Result<ReviewItem> {
        let mut item = ReviewItem {
            id: 0,
            original_path: record.path.clone(),
            filename: record.file_name(),
            size: record.fingerprint.size,
            mtime: record.mtime,
            suggested_category: classification.category.clone(),
            confidence: classification.confidence,
            customer: classification
                .customer
                .clone()
                .or_else(|| Some(record.scope.clone())),
            project: classification.project.clone(),
            tags: classification.tags.clone(),
            metadata: classification.metadata.clone(),
            scope: record.scope.clone(),
            fingerprint: record.fingerprint.hash.clone(),
            job_id,
        };
        item.id = lock(&self.db)?.insert_review_item(&item, false)?;
        info!(
            "Queued {} for review (suggested {} at {:.2})",
            item.filename, item.suggested_category, item.confidence
        );
        Ok(item)
    }

    pub fn list_pending(&self, filter: &ReviewFilter) -> Result<Vec<ReviewItem>> {
        Ok(lock(&self.db)?.list_review_items(filter)?)
    }

    pub fn get(&self, id: i64) -> Result<ReviewItem> {
        lock(&self.db)?
            .get_review_item(id)?
            .ok_or_else(|| Error::NotFound(format!("review item {}", id)))
    }

    pub fn pending_for_path(&self, path: &Path) -> Result<Option<ReviewItem>> {
        Ok(lock(&self.db)?.review_item_for_path(path)?)
    }

    /// Takes the item off the queue so that exactly one caller acts on it.
    pub fn claim(&self, id: i64) -> Result<ReviewItem> {
        let db = lock(&self.db)?;
        let item = db
            .get_review_item(id)?
            .ok_or_else(|| Error::NotFound(format!("review item {}", id)))?;
        db.delete_review_item(id)?;
        Ok(item)
    }

    /// Puts a claimed item back under its original id.
    pub fn requeue(&self, item: &ReviewItem) -> Result<()> {
        lock(&self.db)?.insert_review_item(item, true)?;
        Ok(())
    }

    /// Drops every item a job queued and returns them.
    pub fn withdraw_job(&self, job_id: i64) -> Result<Vec<ReviewItem>> {
        let db = lock(&self.db)?;
        let items = db.review_items_for_job(job_id)?;
        for item in &items {
            db.delete_review_item(item.id)?;
        }
        if !items.is_empty() {
            debug!("Withdrew {} review items of job {}", items.len(), job_id);
        }
        Ok(items)
    }

    /// Content of the file under review.
    pub fn download(&self, id: i64) -> Result<(ReviewItem, Vec<u8>)> {
        let item = self.get(id)?;
        let bytes = fs::read(&item.original_path)?;
        Ok((item, bytes))
    }

    pub fn record_feedback(&self, item: &ReviewItem, chosen: &str, moved_to: &Path) -> Result<()> {
        if let Some(parent) = self.feedback_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&Feedback {
            id: item.id,
            chosen_category: chosen,
            suggested_category: &item.suggested_category,
            confidence: item.confidence,
            customer: item.customer.as_deref(),
            project: item.project.as_deref(),
            filename: &item.filename,
            moved_to,
            timestamp: crate::storage::queries::now_timestamp(),
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.feedback_path)?;
        writeln!(file, "{}", line)?;
        debug!("Feedback recorded for review item {}", item.id);
        Ok(())
    }
}
