//! Settings loading, discovery, and validation
//!
//! Settings are a TOML document. The file is discovered under the
//! platform config directory unless an explicit path is supplied, and
//! the engine never syncs its own settings or state files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Application directory name under the platform config/data dirs.
pub const APP_DIR: &str = "pkgsync";

/// Default settings file name.
pub const SETTINGS_FILE: &str = "config.toml";

/// Default state file name.
pub const STATE_FILE: &str = "last_run.json";

fn default_interval() -> u64 {
    1
}

fn default_preserve() -> bool {
    true
}

fn default_package_list() -> String {
    "packages.json".to_string()
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// The editor's user-configuration folder (the local side).
    pub local_folder: PathBuf,

    /// The shared/cloud-mounted folder (the remote side).
    pub sync_folder: PathBuf,

    /// Watcher poll interval in seconds.
    #[serde(default = "default_interval")]
    pub sync_interval: u64,

    /// Glob patterns a file must match to be synced.
    ///
    /// An empty list matches nothing; explicit patterns are required.
    #[serde(default)]
    pub include_files: Vec<String>,

    /// Glob patterns that exclude a file even when included.
    #[serde(default)]
    pub ignore_files: Vec<String>,

    /// Directory names pruned before descent.
    #[serde(default)]
    pub ignore_dirs: Vec<String>,

    /// Merge (true) instead of wholesale-replace (false) when syncing
    /// the installed-package-list file.
    #[serde(default = "default_preserve")]
    pub preserve_packages: bool,

    /// Relative key of the package manager's installed-package-list file.
    #[serde(default = "default_package_list")]
    pub package_list_file: String,

    /// Where the last-run state is persisted. Defaults to the platform
    /// data directory.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl SyncSettings {
    /// Minimal settings for the given roots, with everything included.
    #[must_use]
    pub fn new(local_folder: PathBuf, sync_folder: PathBuf) -> Self {
        Self {
            local_folder,
            sync_folder,
            sync_interval: default_interval(),
            include_files: vec!["*".to_string()],
            ignore_files: Vec::new(),
            ignore_dirs: Vec::new(),
            preserve_packages: default_preserve(),
            package_list_file: default_package_list(),
            state_file: None,
        }
        .normalized()
    }

    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        let settings = settings.normalized();
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from an explicit path or discover them under the
    /// platform config directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotConfigured`] if no settings file exists.
    pub fn discover(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load(path);
        }
        let global = dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
            .filter(|p| p.is_file());
        match global {
            Some(path) => Self::load(&path),
            None => Err(ConfigError::NotConfigured.into()),
        }
    }

    /// The engine's own files must never sync themselves.
    fn normalized(mut self) -> Self {
        for name in [SETTINGS_FILE, STATE_FILE] {
            if !self.ignore_files.iter().any(|p| p == name) {
                self.ignore_files.push(name.to_string());
            }
        }
        if let Some(name) = self
            .state_file
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            && !self.ignore_files.iter().any(|p| *p == name)
        {
            self.ignore_files.push(name);
        }
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for empty patterns or a zero poll interval.
    /// Root paths are checked by the engine at operation start instead,
    /// so a temporarily unmounted sync folder only fails the operation
    /// that needs it.
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval == 0 {
            return Err(ConfigError::InvalidInterval.into());
        }
        for pattern in &self.include_files {
            if pattern.trim().is_empty() {
                return Err(ConfigError::EmptyPattern("include").into());
            }
        }
        for pattern in &self.ignore_files {
            if pattern.trim().is_empty() {
                return Err(ConfigError::EmptyPattern("ignore").into());
            }
        }
        Ok(())
    }

    /// Path of the persisted sync-state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
                .join(STATE_FILE)
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_new_has_defaults() {
        let settings = SyncSettings::new(PathBuf::from("/local"), PathBuf::from("/remote"));

        assert_eq!(settings.sync_interval, 1);
        assert!(settings.preserve_packages);
        assert_eq!(settings.package_list_file, "packages.json");
        assert_eq!(settings.include_files, vec!["*".to_string()]);
    }

    #[test]
    fn test_own_files_are_ignored() {
        let settings = SyncSettings::new(PathBuf::from("/local"), PathBuf::from("/remote"));

        assert!(settings.ignore_files.iter().any(|p| p == SETTINGS_FILE));
        assert!(settings.ignore_files.iter().any(|p| p == STATE_FILE));
    }

    #[test]
    fn test_load_from_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            r#"
local_folder = "/home/user/.editor/User"
sync_folder = "/mnt/dropbox/editor"
sync_interval = 5
include_files = ["*.json", "*.snippet"]
ignore_files = ["*.cache"]
ignore_dirs = ["trash"]
preserve_packages = false
"#,
        )
        .unwrap();

        let settings = SyncSettings::load(&path).unwrap();
        assert_eq!(settings.sync_interval, 5);
        assert_eq!(settings.include_files.len(), 2);
        assert!(!settings.preserve_packages);
        assert!(settings.ignore_files.iter().any(|p| p == "*.cache"));
        assert!(settings.ignore_files.iter().any(|p| p == SETTINGS_FILE));
    }

    #[test]
    fn test_load_rejects_zero_interval() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            r#"
local_folder = "/a"
sync_folder = "/b"
sync_interval = 0
include_files = ["*"]
"#,
        )
        .unwrap();

        let result = SyncSettings::load(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("sync_interval"));
    }

    #[test]
    fn test_load_rejects_empty_pattern() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            r#"
local_folder = "/a"
sync_folder = "/b"
include_files = ["  "]
"#,
        )
        .unwrap();

        let result = SyncSettings::load(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_discover_without_config_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.toml");

        assert!(SyncSettings::discover(Some(&missing)).is_err());
    }

    #[test]
    fn test_state_path_override() {
        let mut settings = SyncSettings::new(PathBuf::from("/a"), PathBuf::from("/b"));
        settings.state_file = Some(PathBuf::from("/tmp/custom-state.json"));

        assert_eq!(settings.state_path(), PathBuf::from("/tmp/custom-state.json"));
    }
}
