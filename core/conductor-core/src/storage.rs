//! Storage paths for Conductor's own files.
//!
//! Project data lives inside each project root (see [`crate::layout`]). This
//! module only covers what Conductor keeps for itself:
//!
//! - `~/.conductor/config.toml` observer configuration
//! - `~/.conductor/logs/` diagnostic logs written by the CLI
//!
//! `StoragePaths::with_root()` enables test injection.

use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Central configuration for Conductor's storage paths.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    /// Resolves `~/.conductor`. Returns `None` when there is no home directory.
    pub fn discover() -> Option<Self> {
        dirs::home_dir().map(|home| Self {
            root: home.join(".conductor"),
        })
    }

    /// Creates a StoragePaths with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs_err::create_dir_all(&self.root)?;
        fs_err::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn with_root_derives_all_paths() {
        let storage = StoragePaths::with_root(PathBuf::from("/tmp/conductor-test"));
        assert_eq!(
            storage.config_file(),
            PathBuf::from("/tmp/conductor-test/config.toml")
        );
        assert_eq!(storage.logs_dir(), PathBuf::from("/tmp/conductor-test/logs"));
    }

    #[test]
    fn ensure_dirs_creates_logs_dir() {
        let temp = TempDir::new().unwrap();
        let storage = StoragePaths::with_root(temp.path().join(".conductor"));
        storage.ensure_dirs().unwrap();
        assert!(storage.logs_dir().is_dir());
    }
}
