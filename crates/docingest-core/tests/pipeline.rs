use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use docingest_core::classifier::{Classification, Classifier};
use docingest_core::model::{
    FileRecord, FileStatus, JobOptions, JobStatus, OperationType, ProcessingJob, SnapshotState,
};
use docingest_core::orchestrator::STOPPED_BY_OPERATOR;
use docingest_core::storage::ReviewFilter;
use docingest_core::{AppConfig, Error, IngestEngine};
use tempfile::{tempdir, TempDir};

/// Answers every file with the same category and confidence.
struct StaticClassifier {
    category: &'static str,
    confidence: f64,
    delay: Duration,
}

impl Classifier for StaticClassifier {
    fn name(&self) -> &str {
        "static"
    }

    fn classify(&self, _record: &FileRecord, _content: &str) -> docingest_core::Result<Classification> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(Classification::new(self.category, self.confidence))
    }
}

struct Fixture {
    dir: TempDir,
    engine: IngestEngine,
}

impl Fixture {
    fn new(confidence: f64) -> Self {
        Self::with(confidence, Duration::ZERO, |_| {})
    }

    fn with(confidence: f64, delay: Duration, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::rooted_at(&dir.path().join("work"));
        tweak(&mut config);
        let engine = IngestEngine::open_with_classifier(
            config,
            Arc::new(StaticClassifier {
                category: "finanzen",
                confidence,
                delay,
            }),
        )
        .unwrap();
        Self { dir, engine }
    }

    fn reopen(self) -> Self {
        let Fixture { dir, engine } = self;
        let config = engine.config().clone();
        drop(engine);
        let engine = IngestEngine::open_with_classifier(
            config,
            Arc::new(StaticClassifier {
                category: "finanzen",
                confidence: 0.95,
                delay: Duration::ZERO,
            }),
        )
        .unwrap();
        Fixture { dir, engine }
    }

    fn inbox_file(&self, name: &str, content: &str) -> PathBuf {
        let inbox = self.dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let path = inbox.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn run(&self, paths: &[PathBuf], options: JobOptions) -> ProcessingJob {
        let job = self.engine.submit(paths, options).unwrap();
        self.engine.wait(job.id).unwrap()
    }

    fn sorted_root(&self) -> PathBuf {
        self.engine.config().sorted_root.clone()
    }
}

fn acme() -> JobOptions {
    JobOptions {
        scope: Some("acme".to_string()),
        ..JobOptions::default()
    }
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

fn set_mtime(path: &Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn test_three_files_one_duplicate_in_acme() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("Rechnung_2024.pdf", "invoice body");
    let b = fx.inbox_file("Rechnung_copy.pdf", "invoice body");
    let c = fx.inbox_file("Vertrag.pdf", "contract body");

    let job = fx.run(&[a.clone(), b.clone(), c.clone()], acme());

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_files, 3);
    assert_eq!(job.processed_files, 3);
    assert_eq!(job.duplicates_found, 1);
    assert_eq!(job.failed_files, 0);
    assert_eq!(job.progress, 100);

    let (duplicates, total) = fx.engine.duplicates(Some("acme"), 0, 10);
    assert_eq!(total, 1);
    assert_eq!(duplicates[0].scope, "acme");
    assert!(duplicates[0].path.starts_with(fx.sorted_root().join("acme").join("_duplicates")));
    assert!(duplicates[0].path.exists());
    assert!(duplicates[0].primary_path.exists());
    assert!(!a.exists() && !b.exists() && !c.exists());

    let (other, _) = fx.engine.duplicates(Some("globex"), 0, 10);
    assert!(other.is_empty());
}

#[test]
fn test_below_threshold_goes_to_review_then_confirm_files_it() {
    let fx = Fixture::new(0.6);
    let scan = fx.inbox_file("scan_0001.pdf", "blurry scan");

    let job = fx.run(&[scan.clone()], acme());
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.review_queued, 1);
    // Never auto-filed.
    assert!(scan.exists());
    assert!(files_under(&fx.sorted_root()).is_empty());

    let pending = fx.engine.pending(&ReviewFilter::default()).unwrap();
    assert_eq!(pending.len(), 1);
    let item = &pending[0];
    assert_eq!(item.suggested_category, "finanzen");
    assert!((item.confidence - 0.6).abs() < f64::EPSILON);
    assert_eq!(item.original_path, scan);

    let (_, bytes) = fx.engine.download(item.id).unwrap();
    assert_eq!(bytes, b"blurry scan");

    let confirmed = fx.engine.confirm(item.id, "invoices").unwrap();
    assert!(confirmed.destination.exists());
    assert!(!scan.exists());
    assert!(confirmed
        .destination
        .starts_with(fx.sorted_root().join("acme").join("Allgemein")));
    assert!(fx.engine.pending(&ReviewFilter::default()).unwrap().is_empty());

    let (snapshots, _) = fx.engine.snapshots(None, 0, 50).unwrap();
    let classify: Vec<_> = snapshots
        .iter()
        .filter(|s| s.operation_type == OperationType::Classify)
        .collect();
    assert_eq!(classify.len(), 1);
    assert_eq!(classify[0].id, confirmed.snapshot_id);

    assert!(matches!(
        fx.engine.confirm(item.id, "invoices"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_one_unreadable_file_of_ten_fails_alone() {
    let fx = Fixture::new(0.95);
    let paths: Vec<PathBuf> = (0..10)
        .map(|i| {
            if i == 4 {
                fx.dir.path().join("inbox").join("missing.pdf")
            } else {
                fx.inbox_file(&format!("doc_{}.pdf", i), &format!("content {}", i))
            }
        })
        .collect();

    let job = fx.run(
        &paths,
        JobOptions {
            enable_classification: Some(false),
            ..acme()
        },
    );

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_files, 10);
    assert_eq!(job.failed_files, 1);
    assert_eq!(job.successful_files, 9);

    let detail = fx.engine.job(job.id).unwrap();
    let failed: Vec<_> = detail
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].position, 4);
    assert!(failed[0].error.is_some());

    let stats = fx.engine.stats().unwrap();
    assert_eq!(stats.failed_files, 1);
    assert_eq!(stats.files_by_status.filed, 9);
}

#[test]
fn test_promote_then_rollback_restores_roles() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("angebot.pdf", "same bytes");
    let b = fx.inbox_file("angebot_kopie.pdf", "same bytes");
    fx.run(&[a, b], acme());

    let (before, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    assert_eq!(before.len(), 1);
    let duplicate = before[0].path.clone();
    let primary = before[0].primary_path.clone();

    let promoted = fx.engine.promote(&duplicate).unwrap();
    assert_eq!(promoted.primary, primary);
    let demoted = promoted.demoted.clone().unwrap();
    assert!(primary.exists() && demoted.exists());
    assert!(!duplicate.exists());

    let (after, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].path, demoted);
    assert_eq!(after[0].primary_path, primary);

    let report = fx.engine.rollback_snapshot(promoted.snapshot_id).unwrap();
    assert!(report.is_clean());
    assert!(duplicate.exists() && primary.exists());
    assert!(!demoted.exists());

    let (restored, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    assert_eq!(restored, before);

    assert!(matches!(
        fx.engine.rollback_snapshot(promoted.snapshot_id),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_job_rollback_round_trip_and_double_rollback() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("bill.pdf", "bill");
    let b = fx.inbox_file("bill_again.pdf", "bill");
    let c = fx.inbox_file("notes.txt", "notes");
    let job = fx.run(&[a.clone(), b.clone(), c.clone()], acme());
    assert_eq!(job.status, JobStatus::Completed);

    let report = fx.engine.rollback_job(job.id).unwrap();
    assert!(report.is_clean());
    assert!(report.consumed.len() >= 3);
    assert!(a.exists() && b.exists() && c.exists());
    assert!(files_under(&fx.sorted_root()).is_empty());
    assert_eq!(fx.engine.job(job.id).unwrap().job.status, JobStatus::RolledBack);
    assert_eq!(fx.engine.duplicates(None, 0, 10).1, 0);

    assert!(matches!(
        fx.engine.rollback_job(job.id),
        Err(Error::AlreadyRolledBack(id)) if id == job.id
    ));

    // The index forgot the reversed files, so they ingest exactly as before.
    let again = fx.run(&[a, b, c], acme());
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(again.duplicates_found, 1);
}

#[test]
fn test_rollback_of_unknown_or_running_job() {
    let fx = Fixture::with(0.95, Duration::from_millis(30), |_| {});
    assert!(matches!(fx.engine.rollback_job(404), Err(Error::NotFound(_))));

    let paths: Vec<PathBuf> = (0..10)
        .map(|i| fx.inbox_file(&format!("slow_{}.pdf", i), &format!("slow {}", i)))
        .collect();
    let job = fx
        .engine
        .submit(
            &paths,
            JobOptions {
                max_concurrent_workers: Some(1),
                batch_size: Some(1),
                ..acme()
            },
        )
        .unwrap();
    assert!(matches!(
        fx.engine.rollback_job(job.id),
        Err(Error::InvalidState(_))
    ));
    fx.engine.wait(job.id).unwrap();
}

#[test]
fn test_stop_leaves_files_untouched_or_fully_filed_then_resume() {
    let fx = Fixture::with(0.95, Duration::from_millis(40), |_| {});
    let paths: Vec<PathBuf> = (0..30)
        .map(|i| fx.inbox_file(&format!("file_{:02}.pdf", i), &format!("body {}", i)))
        .collect();

    let job = fx
        .engine
        .submit(
            &paths,
            JobOptions {
                max_concurrent_workers: Some(2),
                batch_size: Some(2),
                ..acme()
            },
        )
        .unwrap();
    thread::sleep(Duration::from_millis(60));
    assert!(fx.engine.stop(job.id).unwrap());
    let stopped = fx.engine.wait(job.id).unwrap();

    assert_eq!(stopped.status, JobStatus::Failed);
    assert_eq!(stopped.error.as_deref(), Some(STOPPED_BY_OPERATOR));
    assert!(stopped.processed_files < 30);

    let detail = fx.engine.job(job.id).unwrap();
    let mut pending = 0;
    for file in &detail.files {
        match file.status {
            FileStatus::Pending => {
                pending += 1;
                assert!(file.path.exists(), "{} was touched", file.path.display());
            }
            FileStatus::Filed => {
                assert!(!file.path.exists());
                assert!(file.destination.as_ref().unwrap().exists());
            }
            other => panic!("unexpected status {} for {}", other, file.path.display()),
        }
    }
    assert!(pending > 0);
    assert_eq!(pending as u64, 30 - stopped.processed_files);
    let stats = fx.engine.stats().unwrap();
    assert_eq!(stats.skipped_files, pending as u64);
    assert_eq!(stats.files_by_status.duplicate, 0);

    let resumed = fx.engine.resume(job.id).unwrap();
    assert_eq!(resumed.resumed_from, Some(job.id));
    assert_eq!(resumed.total_files, pending as u64);
    let resumed = fx.engine.wait(resumed.id).unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert!(paths.iter().all(|p| !p.exists()));
}

#[test]
fn test_delete_purge_then_rollback_is_unrecoverable() {
    let fx = Fixture::with(0.95, Duration::ZERO, |config| {
        config.retention.window_secs = 0;
    });
    let a = fx.inbox_file("report.pdf", "quarterly");
    let b = fx.inbox_file("report_dup.pdf", "quarterly");
    fx.run(&[a, b], acme());

    let (duplicates, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    let duplicate = duplicates[0].path.clone();
    let primary = duplicates[0].primary_path.clone();

    // A primary that still has duplicates cannot go.
    let refused = fx.engine.delete(&[primary.clone()]);
    assert_eq!(refused.deleted, 0);
    assert_eq!(refused.failed.len(), 1);
    assert!(primary.exists());
    assert_eq!(fx.engine.duplicates(Some("acme"), 0, 10).0, duplicates);
    let (snapshots, _) = fx.engine.snapshots(None, 0, 50).unwrap();
    assert!(snapshots
        .iter()
        .all(|s| s.operation_type != OperationType::Delete));

    let report = fx
        .engine
        .delete(&[duplicate.clone(), fx.dir.path().join("nope.pdf")]);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed.len(), 1);
    assert!(!duplicate.exists());
    assert_eq!(fx.engine.duplicates(Some("acme"), 0, 10).1, 0);

    let (snapshots, _) = fx.engine.snapshots(None, 0, 50).unwrap();
    let delete = snapshots
        .iter()
        .find(|s| s.operation_type == OperationType::Delete)
        .unwrap()
        .clone();

    thread::sleep(Duration::from_millis(5));
    let purged = fx.engine.purge_expired().unwrap();
    assert_eq!(purged.purged, vec![delete.id]);

    let rollback = fx.engine.rollback_snapshot(delete.id).unwrap();
    assert_eq!(rollback.failed.len(), 1);
    assert!(rollback.failed[0].reason.contains("purged"));
    assert!(!duplicate.exists());
}

#[test]
fn test_delete_rollback_restores_from_retention() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("memo.txt", "memo");
    let b = fx.inbox_file("memo_copy.txt", "memo");
    fx.run(&[a, b], acme());
    let (before, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    let duplicate = before[0].path.clone();

    assert_eq!(fx.engine.delete(&[duplicate.clone()]).deleted, 1);
    let (snapshots, _) = fx.engine.snapshots(None, 0, 50).unwrap();
    let delete_id = snapshots
        .iter()
        .find(|s| s.operation_type == OperationType::Delete)
        .unwrap()
        .id;

    let report = fx.engine.rollback_snapshot(delete_id).unwrap();
    assert!(report.is_clean());
    assert!(duplicate.exists());
    assert_eq!(fx.engine.duplicates(Some("acme"), 0, 10).0, before);
}

#[test]
fn test_exactly_one_primary_under_concurrency() {
    let fx = Fixture::new(0.95);
    let paths: Vec<PathBuf> = (0..8)
        .map(|i| fx.inbox_file(&format!("copy_{}.pdf", i), "identical"))
        .collect();

    let job = fx.run(
        &paths,
        JobOptions {
            max_concurrent_workers: Some(4),
            batch_size: Some(8),
            ..acme()
        },
    );
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.duplicates_found, 7);

    let (duplicates, total) = fx.engine.duplicates(Some("acme"), 0, 100);
    assert_eq!(total, 7);
    let primary = duplicates[0].primary_path.clone();
    assert!(duplicates.iter().all(|d| d.primary_path == primary));

    let bin = fx.sorted_root().join("acme").join("_duplicates");
    let outside_bin: Vec<_> = files_under(&fx.sorted_root())
        .into_iter()
        .filter(|p| !p.starts_with(&bin))
        .collect();
    assert_eq!(outside_bin, vec![primary]);
}

#[test]
fn test_index_survives_restart() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("deck.pdf", "slides");
    let b = fx.inbox_file("deck_old.pdf", "slides");
    fx.run(&[a, b], acme());
    let (before, _) = fx.engine.duplicates(Some("acme"), 0, 10);

    let fx = fx.reopen();
    let (after, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].path, before[0].path);
    assert_eq!(after[0].primary_path, before[0].primary_path);

    // A third copy after the restart is still recognised.
    let c = fx.inbox_file("deck_third.pdf", "slides");
    let job = fx.run(&[c], acme());
    assert_eq!(job.duplicates_found, 1);
}

#[test]
fn test_invalid_job_options_are_rejected() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("x.pdf", "x");
    let err = fx
        .engine
        .submit(
            &[a],
            JobOptions {
                batch_size: Some(0),
                ..JobOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(fx.engine.jobs(0, 10).unwrap().1, 0);
}

#[test]
fn test_rollback_of_displacing_job_restores_review_queue() {
    let fx = Fixture::new(0.6);
    let late = fx.inbox_file("scan_late.pdf", "same scan");
    set_mtime(&late, 2_000_000_000);
    let first = fx.run(&[late.clone()], acme());
    assert_eq!(first.review_queued, 1);
    let before = fx.engine.pending(&ReviewFilter::default()).unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].original_path, late);

    // An older copy displaces the queued file, which moves to the bin.
    let early = fx.inbox_file("scan_early.pdf", "same scan");
    set_mtime(&early, 1_000_000_000);
    let second = fx.run(&[early.clone()], acme());
    assert_eq!(second.status, JobStatus::Completed);
    assert!(!late.exists());
    let during = fx.engine.pending(&ReviewFilter::default()).unwrap();
    assert_eq!(during.len(), 1);
    assert_eq!(during[0].original_path, early);
    assert_eq!(during[0].job_id, Some(second.id));

    let report = fx.engine.rollback_job(second.id).unwrap();
    assert!(report.is_clean());
    assert!(late.exists() && early.exists());
    assert_eq!(fx.engine.pending(&ReviewFilter::default()).unwrap(), before);
    assert_eq!(fx.engine.duplicates(Some("acme"), 0, 10).1, 0);

    // The withdrawn file is unknown to the index again.
    let again = fx.run(&[early.clone()], acme());
    assert_eq!(again.status, JobStatus::Completed);
    assert!(!late.exists());
}

#[test]
fn test_rollback_of_review_only_job_withdraws_its_items() {
    let fx = Fixture::new(0.6);
    let scan = fx.inbox_file("scan_0002.pdf", "only scan");
    let job = fx.run(&[scan.clone()], acme());
    assert_eq!(job.review_queued, 1);

    let report = fx.engine.rollback_job(job.id).unwrap();
    assert!(report.consumed.is_empty());
    assert!(scan.exists());
    assert!(fx.engine.pending(&ReviewFilter::default()).unwrap().is_empty());
    assert_eq!(fx.engine.job(job.id).unwrap().job.status, JobStatus::RolledBack);

    let again = fx.run(&[scan], acme());
    assert_eq!(again.review_queued, 1);
}

#[test]
fn test_concurrent_confirms_file_once() {
    let fx = Fixture::new(0.6);
    let scan = fx.inbox_file("scan_0003.pdf", "contested");
    fx.run(&[scan], acme());
    let id = fx.engine.pending(&ReviewFilter::default()).unwrap()[0].id;

    let results: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..2)
            .map(|_| s.spawn(|| fx.engine.confirm(id, "invoices")))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let filed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(filed.len(), 1);
    assert!(filed[0].destination.exists());
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::NotFound(_)))));

    let (snapshots, _) = fx.engine.snapshots(None, 0, 50).unwrap();
    let classify = snapshots
        .iter()
        .filter(|s| s.operation_type == OperationType::Classify)
        .count();
    assert_eq!(classify, 1);
    assert!(fx.engine.pending(&ReviewFilter::default()).unwrap().is_empty());
}

#[test]
fn test_failed_confirm_keeps_item_pending() {
    let fx = Fixture::new(0.6);
    let scan = fx.inbox_file("scan_0004.pdf", "vanishing");
    fx.run(&[scan.clone()], acme());
    let before = fx.engine.pending(&ReviewFilter::default()).unwrap();

    fs::remove_file(&scan).unwrap();
    assert!(fx.engine.confirm(before[0].id, "invoices").is_err());
    assert_eq!(fx.engine.pending(&ReviewFilter::default()).unwrap(), before);
}

#[test]
fn test_promote_of_vanished_duplicate_changes_nothing() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("plan.pdf", "plan");
    let b = fx.inbox_file("plan_copy.pdf", "plan");
    fx.run(&[a, b], acme());
    let (before, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    let duplicate = before[0].path.clone();
    let primary = before[0].primary_path.clone();

    fs::remove_file(&duplicate).unwrap();
    assert!(fx.engine.promote(&duplicate).is_err());
    assert!(primary.exists());
    assert_eq!(fx.engine.duplicates(Some("acme"), 0, 10).0, before);
    let (snapshots, _) = fx.engine.snapshots(None, 0, 50).unwrap();
    assert!(snapshots
        .iter()
        .filter(|s| s.operation_type == OperationType::Promote)
        .all(|s| s.state == SnapshotState::Aborted));
}

#[test]
fn test_move_duplicate_out_of_bin() {
    let fx = Fixture::new(0.95);
    let a = fx.inbox_file("offer.pdf", "offer");
    let b = fx.inbox_file("offer_copy.pdf", "offer");
    fx.run(&[a, b], acme());
    let (before, _) = fx.engine.duplicates(Some("acme"), 0, 10);
    let duplicate = before[0].path.clone();
    let target = fx.dir.path().join("keep");

    let filed = fx.engine.move_duplicate(&duplicate, &target).unwrap();
    assert!(filed.destination.starts_with(&target));
    assert!(filed.destination.exists());
    assert!(!duplicate.exists());
    assert_eq!(fx.engine.duplicates(Some("acme"), 0, 10).1, 0);
    assert!(matches!(
        fx.engine.move_duplicate(&duplicate, &target),
        Err(Error::NotFound(_))
    ));

    let report = fx.engine.rollback_snapshot(filed.snapshot_id).unwrap();
    assert!(report.is_clean());
    assert!(duplicate.exists());
    assert_eq!(fx.engine.duplicates(Some("acme"), 0, 10).0, before);
}

#[test]
fn test_upload_stages_good_files_and_reports_bad_ones() {
    let fx = Fixture::new(0.95);
    let uploads: [(&str, &[u8]); 3] = [("a.pdf", b"one"), ("..", b"two"), ("a.pdf", b"three")];

    let report = fx.engine.stage_uploads(uploads);
    assert_eq!(report.total, 3);
    assert_eq!(report.items.len(), 2);
    assert_ne!(report.items[0], report.items[1]);
    assert!(report.items.iter().all(|p| p.exists()));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "..");
}
