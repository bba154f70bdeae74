//! Coordination directory layout inside a project root.
//!
//! Agents and this crate agree on where things live purely by convention:
//!
//! ```text
//! <root>/<state-dir>/*.json                       state documents
//! <root>/<agent-dir>/logs/activity.log            append-only activity log
//! <root>/<agent-dir>/signals/.<name>              zero-byte wake markers
//! <root>/<agent-dir>/knowledge/**                 free-form notes
//! <root>/<agent-dir>/launchers/manifest.json      launchable agents
//! ```
//!
//! The two directory names differ between deployments, so they come from
//! [`LayoutConfig`] rather than being hard-coded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const LOG_FILE_NAME: &str = "activity.log";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Known deployments of the agent tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutPreset {
    #[default]
    Claude,
    Codex,
}

impl LayoutPreset {
    fn state_dir(self) -> &'static str {
        match self {
            LayoutPreset::Claude => ".claude-shared-state",
            LayoutPreset::Codex => ".codex-shared-state",
        }
    }

    fn agent_dir(self) -> &'static str {
        match self {
            LayoutPreset::Claude => ".claude",
            LayoutPreset::Codex => ".codex",
        }
    }
}

/// `[layout]` section of the observer config.
///
/// Explicit directory names win over the preset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub preset: LayoutPreset,
    pub state_dir: Option<String>,
    pub agent_dir: Option<String>,
}

impl LayoutConfig {
    pub fn state_dir_name(&self) -> &str {
        self.state_dir
            .as_deref()
            .unwrap_or_else(|| self.preset.state_dir())
    }

    pub fn agent_dir_name(&self) -> &str {
        self.agent_dir
            .as_deref()
            .unwrap_or_else(|| self.preset.agent_dir())
    }

    pub fn for_root(&self, root: &Path) -> ProjectLayout {
        ProjectLayout {
            root: root.to_path_buf(),
            state_dir_name: self.state_dir_name().to_string(),
            agent_dir_name: self.agent_dir_name().to_string(),
        }
    }
}

/// Resolved paths for one project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
    state_dir_name: String,
    agent_dir_name: String,
}

impl ProjectLayout {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(&self.state_dir_name)
    }

    pub fn agent_dir(&self) -> PathBuf {
        self.root.join(&self.agent_dir_name)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.agent_dir().join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(LOG_FILE_NAME)
    }

    pub fn signals_dir(&self) -> PathBuf {
        self.agent_dir().join("signals")
    }

    pub fn knowledge_dir(&self) -> PathBuf {
        self.agent_dir().join("knowledge")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.agent_dir().join("launchers").join(MANIFEST_FILE_NAME)
    }

    /// A project is coordinated once its state directory exists.
    /// Until then it still needs the (external) setup step.
    pub fn is_coordinated(&self) -> bool {
        self.state_dir().is_dir()
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_file().is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_preset_is_default() {
        let layout = LayoutConfig::default().for_root(Path::new("/work/app"));
        assert_eq!(
            layout.state_dir(),
            PathBuf::from("/work/app/.claude-shared-state")
        );
        assert_eq!(
            layout.log_file(),
            PathBuf::from("/work/app/.claude/logs/activity.log")
        );
        assert_eq!(
            layout.manifest_file(),
            PathBuf::from("/work/app/.claude/launchers/manifest.json")
        );
    }

    #[test]
    fn codex_preset_switches_both_dirs() {
        let config = LayoutConfig {
            preset: LayoutPreset::Codex,
            ..Default::default()
        };
        let layout = config.for_root(Path::new("/p"));
        assert_eq!(layout.state_dir(), PathBuf::from("/p/.codex-shared-state"));
        assert_eq!(layout.signals_dir(), PathBuf::from("/p/.codex/signals"));
    }

    #[test]
    fn explicit_names_override_preset() {
        let config = LayoutConfig {
            preset: LayoutPreset::Codex,
            state_dir: Some("shared".to_string()),
            agent_dir: None,
        };
        let layout = config.for_root(Path::new("/p"));
        assert_eq!(layout.state_dir(), PathBuf::from("/p/shared"));
        assert_eq!(layout.knowledge_dir(), PathBuf::from("/p/.codex/knowledge"));
    }

    #[test]
    fn coordination_requires_state_dir() {
        let temp = tempfile::tempdir().unwrap();
        let layout = LayoutConfig::default().for_root(temp.path());
        assert!(!layout.is_coordinated());

        std::fs::create_dir_all(layout.state_dir()).unwrap();
        assert!(layout.is_coordinated());
    }
}
