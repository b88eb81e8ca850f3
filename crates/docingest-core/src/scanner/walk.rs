use glob::Pattern;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};

use crate::config::non_overlapping_directories;

/// Expand submitted paths into the ordered list of files to process.
///
/// Files are kept in submission order. Directories are walked in parallel
/// and their files appended sorted by path, so the intake order of a job is
/// reproducible. Paths that do not exist are kept: they fail later, per file,
/// instead of rejecting the whole submission. Symlinks inside directories are
/// skipped.
pub fn expand_intake(paths: &[PathBuf], ignore_globs: &[String]) -> io::Result<Vec<PathBuf>> {
    let ignore_patterns = compile_patterns(ignore_globs);
    let roots = non_overlapping_directories(paths.iter().filter(|p| p.is_dir()).cloned().collect());
    let mut files = Vec::new();

    for path in paths {
        if is_ignored(path, &ignore_patterns) {
            debug!("Ignoring {}", path.display());
            continue;
        }
        if path.is_dir() {
            if !roots.contains(path) {
                debug!("{} is covered by another submitted directory", path.display());
                continue;
            }
            let found = Mutex::new(Vec::new());
            visit_dirs(path, &found, &ignore_patterns)?;
            let mut found = found
                .into_inner()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "walker mutex poisoned"))?;
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    let mut seen = HashSet::new();
    files.retain(|f| seen.insert(f.clone()));
    Ok(files)
}

fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

fn is_ignored(path: &Path, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|pattern| pattern.matches_path(path))
}

fn visit_dirs(dir: &Path, found: &Mutex<Vec<PathBuf>>, ignore_patterns: &[Pattern]) -> io::Result<()> {
    if is_ignored(dir, ignore_patterns) {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            error!("Access denied reading directory {}: {}", dir.display(), err);
            return Ok(());
        }
        Err(err) => {
            return Err(io::Error::new(
                err.kind(),
                format!("Error reading directory {}: {}", dir.display(), err),
            ))
        }
    };

    entries.par_bridge().try_for_each(|entry_result| {
        let entry = entry_result.map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error reading entry in directory {}: {}", dir.display(), err),
            )
        })?;

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            return Ok(());
        }
        if file_type.is_dir() {
            visit_dirs(&path, found, ignore_patterns)?;
        } else if !is_ignored(&path, ignore_patterns) {
            if let Ok(mut files) = found.lock() {
                files.push(path);
            }
        }
        Ok(())
    })
}
