//! Crash-safe access to the JSON state documents in `<root>/<state-dir>/`.
//!
//! Agents own most of these documents; Conductor reads them and occasionally
//! writes one on behalf of a user-facing command.
//!
//! # Defensive Design
//!
//! Other processes write these files whenever they like, so a read may land on
//! a missing file, an empty file or half-written JSON. All of those read as
//! "no document" (`None`), never as an error, so one bad writer cannot take
//! down the observer.
//!
//! # Atomic Writes
//!
//! Writes stage the full content in a sibling temp file named after the
//! document, the process id and a timestamp, then rename it into place. A
//! reader therefore sees either the old or the new document, never a mix. If
//! any step fails the staging file is removed.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ConductorError, Result};

const STAGING_SUFFIX: &str = ".tmp";

/// Metadata for one document in the state directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Reads and writes whole JSON documents in one state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path) -> Self {
        StateStore {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads a document. Absent, unreadable and malformed all yield `None`.
    pub fn read(&self, name: &str) -> Option<Value> {
        let content = self.read_valid_text(name)?;
        serde_json::from_str(&content).ok()
    }

    /// Reads a document, substituting an empty JSON object when unavailable.
    pub fn read_or_empty(&self, name: &str) -> Value {
        self.read(name)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    /// Reads and deserializes a document into `T`.
    pub fn read_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let content = self.read_valid_text(name)?;
        match serde_json::from_str::<T>(&content) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(document = name, error = %err, "Document has unexpected shape");
                None
            }
        }
    }

    /// Returns the exact bytes of a document, but only if they parse as JSON.
    pub fn read_raw(&self, name: &str) -> Option<String> {
        self.read_valid_text(name)
    }

    fn read_valid_text(&self, name: &str) -> Option<String> {
        let path = self.document_path(name).ok()?;
        let content = match fs_err::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::debug!(error = %err, "State document unreadable");
                return None;
            }
        };

        // Writers that do not stage their output leave empty or truncated
        // files behind for a moment.
        if content.trim().is_empty() {
            return None;
        }
        if let Err(err) = serde_json::from_str::<serde::de::IgnoredAny>(&content) {
            tracing::debug!(document = name, error = %err, "Ignoring malformed state document");
            return None;
        }
        Some(content)
    }

    /// Replaces a document atomically.
    pub fn write(&self, name: &str, value: &Value) -> Result<()> {
        let target = self.document_path(name)?;
        let content = serde_json::to_string_pretty(value).map_err(|e| ConductorError::Json {
            context: format!("Failed to serialize document {}", name),
            source: e,
        })?;

        fs_err::create_dir_all(&self.dir)
            .map_err(|e| ConductorError::io("Failed to create state directory", e))?;

        let prefix = format!(
            ".{}.{}.{}.",
            name,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        // NamedTempFile deletes itself on drop, which covers every early return
        // below as well as a failed persist.
        let mut staged = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| ConductorError::io("Failed to create staging file", e))?;

        staged
            .write_all(content.as_bytes())
            .map_err(|e| ConductorError::io("Failed to write staging file", e))?;
        staged
            .flush()
            .map_err(|e| ConductorError::io("Failed to flush staging file", e))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| ConductorError::io("Failed to sync staging file", e))?;

        staged.persist(&target).map_err(|e| {
            ConductorError::io(format!("Failed to replace document {}", name), e.error)
        })?;

        tracing::debug!(document = name, bytes = content.len(), "State document written");
        Ok(())
    }

    /// Lists documents (`*.json`) currently in the state directory.
    pub fn list(&self) -> Vec<DocumentInfo> {
        let Ok(entries) = fs_err::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut documents: Vec<DocumentInfo> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if !is_document_name(&name) {
                    return None;
                }
                let metadata = entry.metadata().ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(DocumentInfo {
                    name,
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                })
            })
            .collect();

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        documents
    }

    fn document_path(&self, name: &str) -> Result<PathBuf> {
        validate_document_name(name)?;
        Ok(self.dir.join(name))
    }
}

/// True for file names that hold documents (as opposed to staging files).
pub fn is_document_name(name: &str) -> bool {
    name.ends_with(".json") && !name.starts_with('.')
}

fn validate_document_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ConductorError::InvalidArgument(
            "Document name is required".to_string(),
        ));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(ConductorError::InvalidArgument(format!(
            "Document name must be a plain file name: {}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::new(&dir.join(".claude-shared-state"))
    }

    #[test]
    fn test_missing_document_reads_as_none() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        assert!(store.read("worker-status.json").is_none());
        assert_eq!(store.read_or_empty("worker-status.json"), json!({}));
    }

    #[test]
    fn test_write_then_read_raw_is_byte_identical() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        let value = json!({"workers": {"worker-1": {"status": "busy"}}, "queue": [1, 2, 3]});

        store.write("task-queue.json", &value).unwrap();

        let raw = store.read_raw("task-queue.json").unwrap();
        assert_eq!(raw, serde_json::to_string_pretty(&value).unwrap());
        assert_eq!(store.read("task-queue.json").unwrap(), value);
    }

    #[test]
    fn test_write_creates_state_dir() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        assert!(!store.dir().exists());

        store.write("handoff.json", &json!({"request_id": "r1"})).unwrap();
        assert!(store.dir().join("handoff.json").is_file());
    }

    #[test]
    fn test_malformed_document_reads_as_none() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("broken.json"), "{\"workers\": {").unwrap();
        fs::write(store.dir().join("empty.json"), "  \n").unwrap();

        assert!(store.read("broken.json").is_none());
        assert!(store.read_raw("broken.json").is_none());
        assert!(store.read("empty.json").is_none());
    }

    #[test]
    fn test_read_as_typed_default_on_shape_mismatch() {
        #[derive(serde::Deserialize, Debug)]
        struct Roster {
            #[allow(dead_code)]
            workers: Vec<String>,
        }

        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        store.write("roster.json", &json!({"workers": "nope"})).unwrap();
        assert!(store.read_as::<Roster>("roster.json").is_none());

        store
            .write("roster.json", &json!({"workers": ["worker-1"]}))
            .unwrap();
        assert!(store.read_as::<Roster>("roster.json").is_some());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        for name in ["", "  ", "..", "../escape.json", "nested/doc.json"] {
            let err = store.write(name, &json!({})).unwrap_err();
            assert!(matches!(err, ConductorError::InvalidArgument(_)), "{name}");
        }
    }

    #[test]
    fn test_failed_rename_removes_staging_file() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        // A directory squatting on the target name makes the final rename fail.
        fs::create_dir_all(store.dir().join("blocked.json")).unwrap();

        let result = store.write("blocked.json", &json!({"a": 1}));
        assert!(result.is_err());

        let leftovers: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["blocked.json".to_string()]);
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_document() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        let big: Vec<String> = (0..2000).map(|i| format!("task-{i}")).collect();
        store.write("tasks.json", &json!({"version": 0, "tasks": big})).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0u32;
                while !done.load(Ordering::SeqCst) {
                    let raw = fs::read_to_string(store.dir().join("tasks.json")).unwrap();
                    let parsed: Value = serde_json::from_str(&raw).expect("torn read");
                    assert_eq!(parsed["tasks"].as_array().unwrap().len(), 2000);
                    reads += 1;
                }
                reads
            })
        };

        for version in 1..=100 {
            store
                .write("tasks.json", &json!({"version": version, "tasks": big}))
                .unwrap();
        }
        done.store(true, Ordering::SeqCst);

        assert!(reader.join().unwrap() > 0);
        assert_eq!(store.read("tasks.json").unwrap()["version"], 100);
    }

    #[test]
    fn test_list_skips_staging_and_non_json_files() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        store.write("b.json", &json!({})).unwrap();
        store.write("a.json", &json!([])).unwrap();
        fs::write(store.dir().join(".a.json.123.456.xyz.tmp"), "{").unwrap();
        fs::write(store.dir().join("notes.txt"), "hi").unwrap();

        let names: Vec<String> = store.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a.json".to_string(), "b.json".to_string()]);
    }

    #[test]
    fn test_is_document_name() {
        assert!(is_document_name("agent-health.json"));
        assert!(!is_document_name(".agent-health.json.1.2.abc.tmp"));
        assert!(!is_document_name("activity.log"));
    }
}
