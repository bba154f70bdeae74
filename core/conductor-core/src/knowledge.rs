//! Free-form knowledge files the agents keep under `<agent-dir>/knowledge/`.
//!
//! Read-only from Conductor's side. Names are `/`-separated paths relative to
//! the knowledge directory.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{ConductorError, Result};

/// Placeholder kept so git tracks the empty directory.
const PLACEHOLDER: &str = ".gitkeep";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeFile {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Rough model token count: words x 1.3, rounded up.
    pub token_estimate: u64,
}

pub fn estimate_tokens(content: &str) -> u64 {
    let words = content.split_whitespace().count() as u64;
    // ceil(words * 1.3) without floating point
    (words * 13).div_ceil(10)
}

/// Lists knowledge files in `dir` and up to `depth` levels of subdirectories.
pub fn list_knowledge(dir: &Path, depth: usize) -> Vec<KnowledgeFile> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<KnowledgeFile> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(depth + 1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping unreadable knowledge entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && entry.file_name() != PLACEHOLDER)
        .filter_map(|entry| {
            let name = relative_name(dir, entry.path())?;
            let metadata = entry.metadata().ok()?;
            let token_estimate = fs_err::read_to_string(entry.path())
                .map(|content| estimate_tokens(&content))
                .unwrap_or(0);
            Some(KnowledgeFile {
                name,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                token_estimate,
            })
        })
        .collect();

    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

/// Reads one knowledge file. Absent files read as `None`; names that would
/// escape the knowledge directory are rejected.
pub fn read_knowledge(dir: &Path, name: &str) -> Result<Option<String>> {
    let path = resolve(dir, name)?;
    match fs_err::read_to_string(&path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "Knowledge file unreadable");
            Ok(None)
        }
    }
}

pub(crate) fn relative_name(dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(dir).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn resolve(dir: &Path, name: &str) -> Result<PathBuf> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConductorError::InvalidArgument(
            "Knowledge file name is required".to_string(),
        ));
    }
    let rel = Path::new(trimmed);
    let plain = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(ConductorError::InvalidArgument(format!(
            "Knowledge file name must be relative to the knowledge directory: {}",
            trimmed
        )));
    }
    Ok(dir.join(rel))
}
