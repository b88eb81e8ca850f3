//! Duplicate index: which file of a (scope, fingerprint) group is Primary.
//!
//! Each scope has its own lock, which is the single linearization point for
//! every decision in that scope. The Primary of a group is always the member
//! with the smallest `(mtime, intake order)`, so the outcome is independent of
//! the order in which concurrent workers reach the index. Every structural
//! change bumps the group version and hands back an [`IndexCheckpoint`] that
//! the ledger stores alongside the mutation, which is what rollback restores.

use dashmap::DashMap;
use std::collections::HashMap;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::model::{
    file_name_of, DuplicateEntry, FileRecord, GroupState, IndexCheckpoint, IndexedFile,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The file is Primary. `displaced` is the former Primary, now a duplicate.
    Primary {
        checkpoint: IndexCheckpoint,
        displaced: Option<IndexedFile>,
    },
    Duplicate {
        primary: IndexedFile,
        checkpoint: IndexCheckpoint,
    },
    /// The path is already in the group; nothing changed.
    AlreadyIndexed { role: Role, file: IndexedFile },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Duplicate,
}

/// Result of recording where a file finally landed.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Primary,
    /// The file was displaced while it was in flight and is now a duplicate.
    Demoted { primary: IndexedFile },
    /// The file is no longer tracked (rolled back or removed meanwhile).
    Missing,
}

/// A tracked file together with the group it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub scope: String,
    pub fingerprint: String,
    pub file: IndexedFile,
    pub role: Role,
    pub primary: IndexedFile,
}

#[derive(Default)]
struct Group {
    version: u64,
    state: Option<GroupState>,
}

#[derive(Default)]
struct ScopeIndex {
    groups: HashMap<String, Group>,
    paths: HashMap<PathBuf, String>,
}

impl ScopeIndex {
    fn begin_change(&mut self, scope: &str, fingerprint: &str) -> (IndexCheckpoint, &mut Group) {
        let group = self.groups.entry(fingerprint.to_string()).or_default();
        let checkpoint = IndexCheckpoint {
            scope: scope.to_string(),
            fingerprint: fingerprint.to_string(),
            version: group.version,
            prior: group.state.clone(),
        };
        group.version += 1;
        (checkpoint, group)
    }

    fn state_mut(&mut self, fingerprint: &str) -> Option<&mut GroupState> {
        self.groups
            .get_mut(fingerprint)
            .and_then(|g| g.state.as_mut())
    }

    fn drop_path_entries(&mut self, fingerprint: &str) {
        self.paths.retain(|_, fp| fp != fingerprint);
    }

    fn index_paths(&mut self, fingerprint: &str) {
        let paths: Vec<PathBuf> = self
            .groups
            .get(fingerprint)
            .and_then(|g| g.state.as_ref())
            .map(|s| {
                std::iter::once(&s.primary)
                    .chain(s.duplicates.iter())
                    .map(|f| f.path.clone())
                    .collect()
            })
            .unwrap_or_default();
        for path in paths {
            self.paths.insert(path, fingerprint.to_string());
        }
    }

    /// Remove `path` from its group. A removed Primary hands over to the
    /// best-ranked duplicate.
    fn remove_member(
        &mut self,
        scope: &str,
        fingerprint: &str,
        path: &Path,
    ) -> Result<IndexCheckpoint> {
        let state = self
            .state_mut(fingerprint)
            .ok_or_else(|| Error::NotFound(format!("index entry for {}", path.display())))?;
        let is_primary = state.primary.path == path;
        if !is_primary && !state.duplicates.iter().any(|d| d.path == path) {
            return Err(Error::NotFound(format!("index entry for {}", path.display())));
        }

        let (checkpoint, group) = self.begin_change(scope, fingerprint);
        if let Some(state) = group.state.as_mut() {
            if is_primary {
                match best_ranked(&state.duplicates) {
                    Some(next) => {
                        let successor = state.duplicates.remove(next);
                        state.primary = successor;
                    }
                    None => group.state = None,
                }
            } else {
                state.duplicates.retain(|d| d.path != path);
            }
        }
        self.paths.remove(path);
        Ok(checkpoint)
    }
}

fn best_ranked(files: &[IndexedFile]) -> Option<usize> {
    files
        .iter()
        .enumerate()
        .min_by_key(|(_, f)| f.rank())
        .map(|(i, _)| i)
}

#[derive(Default)]
pub struct DuplicateResolver {
    scopes: DashMap<String, Arc<Mutex<ScopeIndex>>>,
}

fn lock_scope(index: &Mutex<ScopeIndex>) -> MutexGuard<'_, ScopeIndex> {
    index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DuplicateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope(&self, scope: &str) -> Arc<Mutex<ScopeIndex>> {
        Arc::clone(self.scopes.entry(scope.to_string()).or_default().value())
    }

    fn existing_scope(&self, scope: &str) -> Option<Arc<Mutex<ScopeIndex>>> {
        self.scopes.get(scope).map(|s| Arc::clone(s.value()))
    }

    pub fn resolve(&self, record: &FileRecord) -> Resolution {
        let scope = self.scope(&record.scope);
        let mut index = lock_scope(&scope);
        let fingerprint = record.fingerprint.hash.as_str();

        if let Some(known) = index.paths.get(&record.path).cloned() {
            if known == fingerprint {
                if let Some(state) = index.state_mut(fingerprint) {
                    let role = if state.primary.path == record.path {
                        Role::Primary
                    } else {
                        Role::Duplicate
                    };
                    let file = std::iter::once(&state.primary)
                        .chain(state.duplicates.iter())
                        .find(|f| f.path == record.path)
                        .cloned()
                        .unwrap_or_else(|| IndexedFile::from_record(record));
                    trace!("{} already indexed as {:?}", record.path.display(), role);
                    return Resolution::AlreadyIndexed { role, file };
                }
            } else {
                // Same path, new content: the old entry is stale.
                if let Err(e) = index.remove_member(&record.scope, &known, &record.path) {
                    trace!("No stale entry for {}: {}", record.path.display(), e);
                }
            }
        }

        let incoming = IndexedFile::from_record(record);
        let (checkpoint, group) = index.begin_change(&record.scope, fingerprint);
        let resolution = match group.state.as_mut() {
            None => {
                group.state = Some(GroupState {
                    primary: incoming,
                    duplicates: Vec::new(),
                });
                Resolution::Primary {
                    checkpoint,
                    displaced: None,
                }
            }
            Some(state) if incoming.rank() < state.primary.rank() => {
                let former = mem::replace(&mut state.primary, incoming);
                state.duplicates.push(former.clone());
                debug!(
                    "{} displaces {} as primary in scope {}",
                    record.path.display(),
                    former.path.display(),
                    record.scope
                );
                Resolution::Primary {
                    checkpoint,
                    displaced: Some(former),
                }
            }
            Some(state) => {
                state.duplicates.push(incoming);
                Resolution::Duplicate {
                    primary: state.primary.clone(),
                    checkpoint,
                }
            }
        };
        index
            .paths
            .insert(record.path.clone(), fingerprint.to_string());
        resolution
    }

    /// Record the final location of an in-flight file.
    pub fn settle(&self, scope: &str, fingerprint: &str, from: &Path, to: &Path) -> Settled {
        let Some(scope_index) = self.existing_scope(scope) else {
            return Settled::Missing;
        };
        let mut index = lock_scope(&scope_index);
        let Some(state) = index.state_mut(fingerprint) else {
            return Settled::Missing;
        };

        let outcome = if state.primary.path == from {
            state.primary.path = to.to_path_buf();
            state.primary.settled = true;
            Settled::Primary
        } else if let Some(dup) = state.duplicates.iter_mut().find(|d| d.path == from) {
            dup.path = to.to_path_buf();
            dup.settled = true;
            Settled::Demoted {
                primary: state.primary.clone(),
            }
        } else {
            return Settled::Missing;
        };

        index.paths.remove(from);
        index.paths.insert(to.to_path_buf(), fingerprint.to_string());
        outcome
    }

    /// Update the location of a tracked file without changing its role.
    pub fn relocate(&self, scope: &str, fingerprint: &str, from: &Path, to: &Path) -> bool {
        !matches!(self.settle(scope, fingerprint, from, to), Settled::Missing)
    }

    /// Drop a file from the index once it has left its tracked location.
    pub fn forget(&self, scope: &str, fingerprint: &str, path: &Path) -> Option<IndexCheckpoint> {
        let scope_index = self.existing_scope(scope)?;
        let mut index = lock_scope(&scope_index);
        index.remove_member(scope, fingerprint, path).ok()
    }

    /// Swap roles: the duplicate at `duplicate_path` becomes Primary at
    /// `duplicate_to`; the former Primary becomes a duplicate at
    /// `primary_to`, or leaves the index when its file is gone.
    pub fn promote(
        &self,
        scope: &str,
        fingerprint: &str,
        duplicate_path: &Path,
        duplicate_to: &Path,
        primary_to: Option<&Path>,
    ) -> Result<IndexCheckpoint> {
        let scope_index = self
            .existing_scope(scope)
            .ok_or_else(|| Error::NotFound(format!("scope {}", scope)))?;
        let mut index = lock_scope(&scope_index);

        let not_found = || Error::NotFound(format!("duplicate {}", duplicate_path.display()));
        let position = index
            .state_mut(fingerprint)
            .and_then(|s| s.duplicates.iter().position(|d| d.path == duplicate_path))
            .ok_or_else(not_found)?;

        let (checkpoint, group) = index.begin_change(scope, fingerprint);
        let state = group.state.as_mut().ok_or_else(not_found)?;
        let mut promoted = state.duplicates.remove(position);
        promoted.path = duplicate_to.to_path_buf();
        promoted.settled = true;
        let mut former = mem::replace(&mut state.primary, promoted);
        let former_path = former.path.clone();
        if let Some(to) = primary_to {
            former.path = to.to_path_buf();
            former.settled = true;
            state.duplicates.push(former);
        }

        index.paths.remove(duplicate_path);
        index.paths.remove(&former_path);
        index.index_paths(fingerprint);
        Ok(checkpoint)
    }

    /// Capture the current state of a group ahead of a change made outside
    /// the index, such as filing a file that is already Primary.
    pub fn checkpoint(&self, scope: &str, fingerprint: &str) -> IndexCheckpoint {
        let scope_index = self.scope(scope);
        let mut index = lock_scope(&scope_index);
        index.begin_change(scope, fingerprint).0
    }

    /// Put a group back to a captured state. Used only by rollback.
    pub fn restore(&self, checkpoint: &IndexCheckpoint) {
        let scope_index = self.scope(&checkpoint.scope);
        let mut index = lock_scope(&scope_index);
        index.drop_path_entries(&checkpoint.fingerprint);
        let group = index
            .groups
            .entry(checkpoint.fingerprint.clone())
            .or_default();
        group.version = group.version.max(checkpoint.version) + 1;
        group.state = checkpoint.prior.clone();
        index.index_paths(&checkpoint.fingerprint);
        debug!(
            "Restored index group {}/{} to version {}",
            checkpoint.scope, checkpoint.fingerprint, checkpoint.version
        );
    }

    /// Seed a group from persisted state at startup.
    pub fn load_group(
        &self,
        scope: &str,
        fingerprint: &str,
        primary: IndexedFile,
        duplicates: Vec<IndexedFile>,
    ) {
        let scope_index = self.scope(scope);
        let mut index = lock_scope(&scope_index);
        let group = index.groups.entry(fingerprint.to_string()).or_default();
        match group.state.as_mut() {
            Some(state) => state.duplicates.extend(duplicates),
            None => group.state = Some(GroupState { primary, duplicates }),
        }
        index.index_paths(fingerprint);
    }

    pub fn group(&self, scope: &str, fingerprint: &str) -> Option<GroupState> {
        let scope_index = self.existing_scope(scope)?;
        let index = lock_scope(&scope_index);
        index.groups.get(fingerprint).and_then(|g| g.state.clone())
    }

    pub fn find(&self, path: &Path) -> Option<Located> {
        let scopes: Vec<(String, Arc<Mutex<ScopeIndex>>)> = self
            .scopes
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (scope, scope_index) in scopes {
            let index = lock_scope(&scope_index);
            let Some(fingerprint) = index.paths.get(path) else {
                continue;
            };
            let Some(state) = index.groups.get(fingerprint).and_then(|g| g.state.as_ref()) else {
                continue;
            };
            let (role, file) = if state.primary.path == path {
                (Role::Primary, state.primary.clone())
            } else {
                match state.duplicates.iter().find(|d| d.path == path) {
                    Some(d) => (Role::Duplicate, d.clone()),
                    None => continue,
                }
            };
            return Some(Located {
                scope,
                fingerprint: fingerprint.clone(),
                file,
                role,
                primary: state.primary.clone(),
            });
        }
        None
    }

    pub fn find_duplicate(&self, path: &Path) -> Option<DuplicateEntry> {
        self.find(path)
            .filter(|l| l.role == Role::Duplicate)
            .map(|l| entry_for(&l.scope, &l.fingerprint, &l.file, &l.primary))
    }

    /// Duplicate entries, most recently modified first; returns (page, total).
    pub fn list(
        &self,
        scope: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> (Vec<DuplicateEntry>, usize) {
        let scopes: Vec<(String, Arc<Mutex<ScopeIndex>>)> = self
            .scopes
            .iter()
            .filter(|e| scope.map_or(true, |s| e.key() == s))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut entries = Vec::new();
        for (scope, scope_index) in scopes {
            let index = lock_scope(&scope_index);
            for (fingerprint, group) in &index.groups {
                if let Some(state) = &group.state {
                    entries.extend(
                        state
                            .duplicates
                            .iter()
                            .map(|d| entry_for(&scope, fingerprint, d, &state.primary)),
                    );
                }
            }
        }

        entries.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.path.cmp(&b.path)));
        let total = entries.len();
        let page = entries.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }
}

fn entry_for(
    scope: &str,
    fingerprint: &str,
    file: &IndexedFile,
    primary: &IndexedFile,
) -> DuplicateEntry {
    DuplicateEntry {
        scope: scope.to_string(),
        filename: file_name_of(&file.path),
        path: file.path.clone(),
        size: file.size,
        mtime: file.mtime,
        fingerprint: fingerprint.to_string(),
        primary_path: primary.path.clone(),
    }
}
