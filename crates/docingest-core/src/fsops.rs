//! Filesystem primitives used by every mutation: no-clobber moves and
//! per-path mutual exclusion.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Move `from` to `to`, creating parent directories. Never overwrites.
/// Falls back to copy + remove when a rename is not possible (e.g. across
/// devices).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", to.display()),
        ));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.exists() {
                return Err(rename_err);
            }
            debug!(
                "rename {} -> {} failed ({}), copying instead",
                from.display(),
                to.display(),
                rename_err
            );
            fs::copy(from, to)?;
            if let Err(e) = fs::remove_file(from) {
                // Leave exactly one copy behind.
                if let Err(cleanup) = fs::remove_file(to) {
                    warn!("Could not remove partial copy {}: {}", to.display(), cleanup);
                }
                return Err(e);
            }
            Ok(())
        }
    }
}

/// Modification time in unix seconds, 0 when the platform cannot tell.
pub fn modified_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// First free name for `file_name` in `dir`: `name.ext`, then `name_1.ext`,
/// `name_2.ext`, ...
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}{extension}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Mutual exclusion per filesystem path.
///
/// A caller asks for every path it is about to touch at once and gets them
/// all or waits; partial holds never exist, so two mutations over overlapping
/// path sets cannot deadlock.
#[derive(Clone, Default)]
pub struct PathLocks {
    inner: Arc<LockTable>,
}

#[derive(Default)]
struct LockTable {
    held: Mutex<BTreeSet<PathBuf>>,
    released: Condvar,
}

/// Held paths; released on drop.
pub struct PathGuard {
    table: Arc<LockTable>,
    paths: BTreeSet<PathBuf>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire<P: AsRef<Path>>(&self, paths: &[P]) -> PathGuard {
        let wanted: BTreeSet<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        let mut held = self
            .inner
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while wanted.iter().any(|p| held.contains(p)) {
            held = self
                .inner
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.extend(wanted.iter().cloned());
        PathGuard {
            table: Arc::clone(&self.inner),
            paths: wanted,
        }
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.inner
            .held
            .lock()
            .map(|held| held.contains(path))
            .unwrap_or(false)
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for path in &self.paths {
            held.remove(path);
        }
        self.table.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_move_creates_parents_and_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.pdf");
        let to = dir.path().join("acme").join("Archiv").join("a.pdf");
        fs::write(&from, "a").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "a");

        fs::write(&from, "b").unwrap();
        let err = move_file(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&to).unwrap(), "a");
    }

    #[test]
    fn test_unique_destination_appends_counter() {
        let dir = tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "x.pdf"), dir.path().join("x.pdf"));

        fs::write(dir.path().join("x.pdf"), "").unwrap();
        fs::write(dir.path().join("x_1.pdf"), "").unwrap();
        assert_eq!(unique_destination(dir.path(), "x.pdf"), dir.path().join("x_2.pdf"));

        fs::write(dir.path().join("README"), "").unwrap();
        assert_eq!(unique_destination(dir.path(), "README"), dir.path().join("README_1"));
    }

    #[test]
    fn test_overlapping_guards_serialize() {
        let locks = PathLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlap_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let locks = locks.clone();
                let active = Arc::clone(&active);
                let overlap_seen = Arc::clone(&overlap_seen);
                thread::spawn(move || {
                    let own = PathBuf::from(format!("/t/{i}"));
                    let _guard = locks.acquire(&[own, PathBuf::from("/t/shared")]);
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap_seen.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(overlap_seen.load(Ordering::SeqCst), 0);
        assert!(!locks.is_locked(Path::new("/t/shared")));
    }
}
