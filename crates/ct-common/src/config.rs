//! Watch configuration loading and validation.
//!
//! Settings live in `config.json` inside the config directory
//! (`CMDTRAIL_CONFIG_DIR`, else `$XDG_CONFIG_HOME/cmdtrail`). A missing file
//! yields built-in defaults: watch the caller's home directory for both read
//! and write events, hash written files, keep read bodies up to 500 KiB.
//!
//! The data directory (store + archived file bodies) resolves from
//! `CMDTRAIL_DATA`, else `$XDG_DATA_HOME/cmdtrail`.

use crate::error::{Error, Result};
use crate::pathtree::PathTree;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_DIR: &str = "CMDTRAIL_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "CMDTRAIL_DATA";

const DIR_NAME: &str = "cmdtrail";
const CONFIG_FILE: &str = "config.json";

/// Default group whose members' rendezvous processes may be joined via
/// `--msenter`. Overridable in the config file.
pub const DEFAULT_MSENTER_GROUP: &str = "msenter-cmdtrail";

fn default_msenter_group() -> String {
    DEFAULT_MSENTER_GROUP.to_string()
}

/// Settings for observed write events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteEventSettings {
    pub enabled: bool,
    pub include: PathTree,
    pub exclude: PathTree,
    /// Events for files larger than this are dropped.
    pub max_event_size: u64,
    /// Compute a content fingerprint per written file.
    pub hash: bool,
    /// Copy written-file bodies into the content-addressed archive.
    pub archive: bool,
    /// Flush to the store mid-command once this many writes are cached.
    pub flush_event_count: usize,
}

impl Default for WriteEventSettings {
    fn default() -> Self {
        WriteEventSettings {
            enabled: true,
            include: home_tree(),
            exclude: PathTree::new(),
            max_event_size: 4 << 30,
            hash: true,
            archive: false,
            flush_event_count: 5000,
        }
    }
}

/// Settings for observed read events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadEventSettings {
    pub enabled: bool,
    pub include: PathTree,
    pub exclude: PathTree,
    /// Events for files larger than this are dropped.
    pub max_event_size: u64,
    /// Keep the body of read files (up to `max_stored_bytes`) in the store.
    pub store_bytes: bool,
    /// Bodies are captured only for files at most this large.
    pub max_stored_bytes: u64,
    /// Flush to the store mid-command once cached bodies exceed this total.
    pub flush_total_bytes: u64,
}

impl Default for ReadEventSettings {
    fn default() -> Self {
        ReadEventSettings {
            enabled: true,
            include: home_tree(),
            exclude: PathTree::new(),
            max_event_size: 4 << 30,
            store_bytes: true,
            max_stored_bytes: 500 << 10,
            flush_total_bytes: 30 << 20,
        }
    }
}

/// The complete watch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub write_events: WriteEventSettings,
    pub read_events: ReadEventSettings,
    #[serde(default = "default_msenter_group")]
    pub msenter_group: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            write_events: WriteEventSettings::default(),
            read_events: ReadEventSettings::default(),
            msenter_group: default_msenter_group(),
        }
    }
}

impl Settings {
    /// Load settings from the config directory, falling back to defaults
    /// when no config file exists.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILE);
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for tree in [
            &self.write_events.include,
            &self.write_events.exclude,
            &self.read_events.include,
            &self.read_events.exclude,
        ] {
            if let Some(p) = tree.iter().find(|p| !p.is_absolute()) {
                return Err(Error::Config(format!(
                    "watch paths must be absolute, got {}",
                    p.display()
                )));
            }
        }
        if self.msenter_group.is_empty() {
            return Err(Error::Config("msenter_group must not be empty".into()));
        }
        Ok(())
    }

    /// Union of the read and write include roots; these are the paths whose
    /// mounts receive kernel marks.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        for tree in [&self.write_events.include, &self.read_events.include] {
            for p in tree.iter() {
                if !roots.contains(p) {
                    roots.push(p.clone());
                }
            }
        }
        roots
    }
}

fn home_tree() -> PathTree {
    match dirs::home_dir() {
        Some(home) => PathTree::from_paths([home]),
        None => PathTree::new(),
    }
}

/// Resolve the config directory: env override, then XDG.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|base| base.join(DIR_NAME))
        .ok_or_else(|| Error::Config(format!("cannot resolve config dir (set {})", ENV_CONFIG_DIR)))
}

/// Resolve the data directory (store + archive): env override, then XDG.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|base| base.join(DIR_NAME))
        .ok_or_else(|| Error::Config(format!("cannot resolve data dir (set {})", ENV_DATA_DIR)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert!(settings.write_events.hash);
        assert!(!settings.write_events.archive);
        assert_eq!(settings.msenter_group, DEFAULT_MSENTER_GROUP);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("config.json")).unwrap();
        assert!(settings.read_events.store_bytes);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut settings = Settings::default();
        settings.write_events.include = PathTree::from_paths(["/tmp"]);
        settings.write_events.flush_event_count = 2;
        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.write_events.flush_event_count, 2);
        assert!(loaded
            .write_events
            .include
            .contains_ancestor_of(Path::new("/tmp/x")));
    }

    #[test]
    fn relative_watch_path_is_rejected() {
        let mut settings = Settings::default();
        settings.read_events.include = PathTree::from_paths(["relative/path"]);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn watch_roots_dedup() {
        let mut settings = Settings::default();
        settings.write_events.include = PathTree::from_paths(["/tmp", "/var"]);
        settings.read_events.include = PathTree::from_paths(["/tmp"]);
        let roots = settings.watch_roots();
        assert_eq!(roots.len(), 2);
    }
}
