//! Zero-byte wake-up markers in `<agent-dir>/signals/`.
//!
//! A signal carries no payload. Its only meaning is its mtime: touching
//! `.handoff-ready` tells whichever agent polls for it that something changed.
//! Names are always stored dot-prefixed; `build` and `.build` are the same signal.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ConductorError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    /// Dot-prefixed file name, e.g. `.handoff-ready`.
    pub name: String,
    pub last_touched: DateTime<Utc>,
    /// Time since the last touch, clamped at zero for clocks that disagree.
    #[serde(with = "duration_ms")]
    pub age: Duration,
}

#[derive(Debug, Clone)]
pub struct SignalChannel {
    dir: PathBuf,
}

impl SignalChannel {
    pub fn new(dir: &Path) -> Self {
        SignalChannel {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the signal if needed and sets its mtime to now.
    pub fn touch(&self, name: &str) -> Result<Signal> {
        let file_name = normalize_signal_name(name)?;
        fs_err::create_dir_all(&self.dir)
            .map_err(|e| ConductorError::io("Failed to create signal directory", e))?;

        let path = self.dir.join(&file_name);
        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ConductorError::io(format!("Failed to open signal {}", file_name), e))?;

        // Opening an existing file in append mode leaves its mtime alone.
        let now = SystemTime::now();
        file.file()
            .set_modified(now)
            .map_err(|e| ConductorError::io(format!("Failed to touch signal {}", file_name), e))?;

        tracing::debug!(signal = %file_name, "Signal touched");
        Ok(Signal {
            name: file_name,
            last_touched: DateTime::<Utc>::from(now),
            age: Duration::ZERO,
        })
    }

    /// Lists dot-prefixed regular files, sorted by name.
    pub fn list(&self) -> Vec<Signal> {
        self.list_at(SystemTime::now())
    }

    fn list_at(&self, now: SystemTime) -> Vec<Signal> {
        let Ok(entries) = fs_err::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut signals: Vec<Signal> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.starts_with('.') {
                    return None;
                }
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                let modified = metadata.modified().ok()?;
                Some(Signal {
                    name,
                    last_touched: DateTime::<Utc>::from(modified),
                    age: now.duration_since(modified).unwrap_or(Duration::ZERO),
                })
            })
            .collect();

        signals.sort_by(|a, b| a.name.cmp(&b.name));
        signals
    }

    /// Reads one signal's current state.
    pub fn get(&self, name: &str) -> Option<Signal> {
        let file_name = normalize_signal_name(name).ok()?;
        let modified = fs_err::metadata(self.dir.join(&file_name))
            .ok()
            .filter(|m| m.is_file())?
            .modified()
            .ok()?;
        Some(Signal {
            name: file_name,
            last_touched: DateTime::<Utc>::from(modified),
            age: SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        })
    }
}

/// Trims the name and ensures the leading dot.
pub fn normalize_signal_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ConductorError::InvalidArgument(
            "Signal name is required".to_string(),
        ));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(ConductorError::InvalidArgument(format!(
            "Signal name must not contain a path separator: {}",
            trimmed
        )));
    }

    let file_name = if trimmed.starts_with('.') {
        trimmed.to_string()
    } else {
        format!(".{}", trimmed)
    };
    if file_name == "." || file_name == ".." {
        return Err(ConductorError::InvalidArgument(format!(
            "Invalid signal name: {}",
            trimmed
        )));
    }
    Ok(file_name)
}

pub(crate) mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_bare_and_dotted_names_are_the_same_signal() {
        let temp = tempdir().unwrap();
        let channel = SignalChannel::new(&temp.path().join(".claude/signals"));

        let first = channel.touch("build").unwrap();
        let second = channel.touch(".build").unwrap();
        assert_eq!(first.name, ".build");
        assert_eq!(second.name, ".build");

        let listed = channel.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, ".build");
        assert!(listed[0].age < Duration::from_secs(2));
    }

    #[test]
    fn test_touch_creates_directory_and_zero_byte_file() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(".claude/signals");
        let channel = SignalChannel::new(&dir);

        channel.touch("  handoff-ready  ").unwrap();
        let metadata = fs::metadata(dir.join(".handoff-ready")).unwrap();
        assert_eq!(metadata.len(), 0);
    }

    #[test]
    fn test_touch_refreshes_mtime_of_existing_signal() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("signals");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".wake");
        fs::write(&path, "").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let channel = SignalChannel::new(&dir);
        assert!(channel.get("wake").unwrap().age >= Duration::from_secs(3500));

        channel.touch("wake").unwrap();
        assert!(channel.get("wake").unwrap().age < Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let temp = tempdir().unwrap();
        let channel = SignalChannel::new(temp.path());
        for name in ["", "   ", "../escape", "a/b", "a\\b", ".."] {
            let err = channel.touch(name).unwrap_err();
            assert!(matches!(err, ConductorError::InvalidArgument(_)), "{name:?}");
        }
    }

    #[test]
    fn test_list_ignores_non_dot_files_and_missing_dir() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("signals");
        let channel = SignalChannel::new(&dir);
        assert!(channel.list().is_empty());

        fs::create_dir_all(dir.join(".nested")).unwrap();
        fs::write(dir.join("README"), "").unwrap();
        channel.touch("b").unwrap();
        channel.touch("a").unwrap();

        let names: Vec<String> = channel.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec![".a".to_string(), ".b".to_string()]);
    }

    #[test]
    fn test_future_mtime_clamps_age_to_zero() {
        let temp = tempdir().unwrap();
        let channel = SignalChannel::new(temp.path());
        channel.touch("skewed").unwrap();

        let earlier = SystemTime::now() - Duration::from_secs(60);
        let listed = channel.list_at(earlier);
        assert_eq!(listed[0].age, Duration::ZERO);
    }
}
