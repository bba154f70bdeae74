//! Launcher manifest written by the project setup step.
//!
//! Conductor never launches agents itself; it only reads the manifest so a
//! client can show which agents exist and how they would be started.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherManifest {
    pub agents: Vec<ManifestAgent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestAgent {
    pub id: String,
    pub role: Option<String>,
    pub group: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub command_fresh: Option<String>,
    pub command_continue: Option<String>,
    pub launcher_ps1: Option<String>,
    pub launcher_ps1_continue: Option<String>,
    pub launcher_win: Option<String>,
    pub launcher_win_continue: Option<String>,
}

impl LauncherManifest {
    pub fn agent(&self, id: &str) -> Option<&ManifestAgent> {
        self.agents.iter().find(|a| a.id == id)
    }
}

/// Reads the manifest. Absent or unparsable manifests read as `None`.
///
/// Setup scripts on Windows emit paths with bare backslashes, which are invalid
/// JSON escapes. Every backslash is turned into `/` before parsing.
pub fn read_manifest(path: &Path) -> Option<LauncherManifest> {
    let raw = fs_err::read_to_string(path).ok()?;
    parse_manifest(&raw)
}

pub fn parse_manifest(raw: &str) -> Option<LauncherManifest> {
    let normalized = raw.replace('\\', "/");
    match serde_json::from_str::<LauncherManifest>(&normalized) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            tracing::warn!(error = %err, "Launcher manifest malformed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_windows_paths_with_bare_backslashes() {
        let raw = r#"{"agents": [
            {"id": "master-1", "role": "interface", "cwd": "C:\Users\dev\app",
             "command_fresh": "claude", "launcher_ps1": "C:\Users\dev\app\.claude\launchers\master-1.ps1"}
        ]}"#;
        let manifest = parse_manifest(raw).unwrap();
        let agent = manifest.agent("master-1").unwrap();
        assert_eq!(agent.cwd.as_deref(), Some("C:/Users/dev/app"));
        assert_eq!(agent.command_continue, None);
    }

    #[test]
    fn missing_or_malformed_manifest_is_none() {
        let temp = tempfile::tempdir().unwrap();
        assert!(read_manifest(&temp.path().join("manifest.json")).is_none());
        assert!(parse_manifest("{\"agents\": [").is_none());
    }

    #[test]
    fn unknown_fields_ignored() {
        let manifest = parse_manifest(r#"{"version": 2, "agents": [{"id": "worker-1", "extra": true}]}"#).unwrap();
        assert_eq!(manifest.agents.len(), 1);
    }
}
