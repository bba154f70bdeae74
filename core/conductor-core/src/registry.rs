//! Tracked project roots and the watch scopes of the active one.
//!
//! Exactly one project is active at a time. Only the active project has
//! running scopes; switching stops all of the old project's scopes before any
//! of the new project's start, so notifications never mix projects.
//!
//! Target validation happens before anything is torn down: switching to a path
//! that is not a directory fails and leaves the current project watching.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ConductorError, Result};
use crate::layout::{LayoutConfig, ProjectLayout};
use crate::patterns::RE_GIT_ORIGIN_URL;
use crate::watcher::{ScopeHandle, ScopeKind, WatchFactory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectEntry {
    pub path: PathBuf,
    pub name: String,
    pub repo_url: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub entry: ProjectEntry,
    pub active: bool,
    pub has_manifest: bool,
    pub needs_setup: bool,
}

/// A scope that could not be started. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeWarning {
    pub kind: ScopeKind,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwitchOutcome {
    pub project: PathBuf,
    /// The project has no state directory yet; no scopes were started.
    pub needs_setup: bool,
    pub started: Vec<ScopeKind>,
    pub warnings: Vec<ScopeWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub entry: ProjectEntry,
    pub already_tracked: bool,
    /// Present when the add made this the active project.
    pub activation: Option<SwitchOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    pub removed: ProjectEntry,
    /// Present when the removed project was active and another took over.
    pub activation: Option<SwitchOutcome>,
}

pub struct ProjectRegistry {
    layout: LayoutConfig,
    factory: Arc<dyn WatchFactory>,
    entries: Vec<ProjectEntry>,
    active: Option<PathBuf>,
    scopes: BTreeMap<ScopeKind, Box<dyn ScopeHandle>>,
}

impl std::fmt::Debug for ProjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectRegistry")
            .field("entries", &self.entries)
            .field("active", &self.active)
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProjectRegistry {
    pub fn new(layout: LayoutConfig, factory: Arc<dyn WatchFactory>) -> Self {
        ProjectRegistry {
            layout,
            factory,
            entries: Vec::new(),
            active: None,
            scopes: BTreeMap::new(),
        }
    }

    pub fn active(&self) -> Option<&Path> {
        self.active.as_deref()
    }

    pub fn active_layout(&self) -> Option<ProjectLayout> {
        self.active.as_deref().map(|root| self.layout.for_root(root))
    }

    pub fn layout_config(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn running_scopes(&self) -> Vec<ScopeKind> {
        self.scopes
            .iter()
            .filter(|(_, handle)| handle.is_running())
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn get(&self, path: &Path) -> Option<&ProjectEntry> {
        let key = normalize_project_path(path);
        self.entries.iter().find(|e| e.path == key || e.path == path)
    }

    /// Tracks a project. The first project tracked becomes active.
    pub fn add(&mut self, path: &Path) -> Result<AddOutcome> {
        let (path, already_tracked) = self.track(path)?;
        tracing::info!(path = %path.display(), already_tracked, "Project added");

        let activation = if self.active.is_none() {
            Some(self.activate(&path))
        } else {
            None
        };
        let entry = self.entry_for(&path)?;

        Ok(AddOutcome {
            entry,
            already_tracked,
            activation,
        })
    }

    /// Tracks a project and makes it active without starting any watcher.
    /// Running scopes of a previously active project are stopped.
    pub fn open(&mut self, path: &Path) -> Result<ProjectEntry> {
        let (path, already_tracked) = self.track(path)?;
        self.stop_all();
        self.active = Some(path.clone());
        tracing::debug!(path = %path.display(), already_tracked, "Project opened for queries");
        self.entry_for(&path)
    }

    pub fn switch_active(&mut self, path: &Path) -> Result<SwitchOutcome> {
        let path = validate_project_dir(path)?;
        if !self.entries.iter().any(|e| e.path == path) {
            self.entries.push(ProjectEntry {
                name: display_name(&path),
                repo_url: detect_repo_url(&path),
                added_at: Utc::now(),
                path: path.clone(),
            });
        }
        Ok(self.activate(&path))
    }

    /// Stops tracking a project. If it was active, the first remaining
    /// project (if any) becomes active.
    pub fn remove(&mut self, path: &Path) -> Result<RemoveOutcome> {
        let key = normalize_project_path(path);
        let index = self
            .entries
            .iter()
            .position(|e| e.path == key || e.path == path)
            .ok_or_else(|| ConductorError::ProjectNotFound(path.display().to_string()))?;
        let removed = self.entries.remove(index);
        tracing::info!(path = %removed.path.display(), "Project removed");

        let mut activation = None;
        if self.active.as_deref() == Some(removed.path.as_path()) {
            self.stop_all();
            self.active = None;
            if let Some(next) = self.entries.first().map(|e| e.path.clone()) {
                activation = Some(self.activate(&next));
            }
        }

        Ok(RemoveOutcome {
            removed,
            activation,
        })
    }

    /// Entries in insertion order.
    pub fn list(&self) -> Vec<ProjectSummary> {
        self.entries
            .iter()
            .map(|entry| {
                let layout = self.layout.for_root(&entry.path);
                ProjectSummary {
                    active: self.active.as_deref() == Some(entry.path.as_path()),
                    has_manifest: layout.has_manifest(),
                    needs_setup: !layout.is_coordinated(),
                    entry: entry.clone(),
                }
            })
            .collect()
    }

    /// Starts scopes of the active project that are not running, e.g. because
    /// their directory did not exist yet. Running scopes are left alone.
    pub fn retry_missing_scopes(&mut self) -> Option<SwitchOutcome> {
        let root = self.active.clone()?;
        let layout = self.layout.for_root(&root);
        let mut outcome = SwitchOutcome {
            project: root,
            needs_setup: !layout.is_coordinated(),
            ..Default::default()
        };
        if outcome.needs_setup {
            return Some(outcome);
        }

        self.scopes.retain(|_, handle| handle.is_running());
        let missing: Vec<ScopeKind> = ScopeKind::ALL
            .into_iter()
            .filter(|kind| !self.scopes.contains_key(kind))
            .collect();
        self.start_scopes(&layout, &missing, &mut outcome);
        Some(outcome)
    }

    /// Stops every running scope. The active pointer is kept.
    pub fn stop_all(&mut self) {
        for (_, mut handle) in std::mem::take(&mut self.scopes) {
            handle.stop();
        }
    }

    /// Validates `path` and records it, refreshing name and repo URL when it
    /// is already tracked.
    fn track(&mut self, path: &Path) -> Result<(PathBuf, bool)> {
        let path = validate_project_dir(path)?;

        let fresh = ProjectEntry {
            name: display_name(&path),
            repo_url: detect_repo_url(&path),
            added_at: Utc::now(),
            path: path.clone(),
        };
        let already_tracked = match self.entries.iter_mut().find(|e| e.path == path) {
            Some(existing) => {
                existing.name = fresh.name;
                existing.repo_url = fresh.repo_url;
                true
            }
            None => {
                self.entries.push(fresh);
                false
            }
        };
        Ok((path, already_tracked))
    }

    fn entry_for(&self, path: &Path) -> Result<ProjectEntry> {
        self.get(path)
            .cloned()
            .ok_or_else(|| ConductorError::ProjectNotFound(path.display().to_string()))
    }

    fn activate(&mut self, root: &Path) -> SwitchOutcome {
        self.stop_all();
        self.active = Some(root.to_path_buf());

        let layout = self.layout.for_root(root);
        let mut outcome = SwitchOutcome {
            project: root.to_path_buf(),
            needs_setup: !layout.is_coordinated(),
            ..Default::default()
        };

        if outcome.needs_setup {
            tracing::info!(path = %root.display(), "Active project needs setup, not watching");
        } else {
            self.start_scopes(&layout, &ScopeKind::ALL, &mut outcome);
        }
        tracing::info!(
            path = %root.display(),
            started = outcome.started.len(),
            warnings = outcome.warnings.len(),
            "Active project switched"
        );
        outcome
    }

    fn start_scopes(&mut self, layout: &ProjectLayout, kinds: &[ScopeKind], outcome: &mut SwitchOutcome) {
        for &kind in kinds {
            match self.factory.start(kind, layout) {
                Ok(handle) => {
                    self.scopes.insert(kind, handle);
                    outcome.started.push(kind);
                }
                Err(err) => {
                    tracing::warn!(scope = %kind, error = %err, "Watch scope not started");
                    outcome.warnings.push(ScopeWarning {
                        kind,
                        path: kind.dir(layout),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

impl Drop for ProjectRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Canonical form used as the registry key; falls back to the path as given.
pub fn normalize_project_path(path: &Path) -> PathBuf {
    fs_err::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn validate_project_dir(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ConductorError::InvalidArgument(
            "Project path is required".to_string(),
        ));
    }
    if !path.exists() {
        return Err(ConductorError::InvalidProjectPath {
            path: path.display().to_string(),
            reason: "does not exist".to_string(),
        });
    }
    if !path.is_dir() {
        return Err(ConductorError::InvalidProjectPath {
            path: path.display().to_string(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(normalize_project_path(path))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// `url` of the `origin` remote in `.git/config`, if any.
pub fn detect_repo_url(root: &Path) -> Option<String> {
    let config = fs_err::read_to_string(root.join(".git").join("config")).ok()?;
    RE_GIT_ORIGIN_URL
        .captures(&config)
        .map(|caps| caps[1].trim().to_string())
}
