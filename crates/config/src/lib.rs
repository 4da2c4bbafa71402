//! Where Tally keeps its files
//!
//! Credentials and settings live as JSON under the platform config
//! directory (`~/.config/tally/` on Linux). The replica database lives
//! under the platform data directory (`~/.local/share/tally/`).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "tally";

/// Which platform base directory a path is resolved against
#[derive(Debug, Clone, Copy)]
enum Base {
    Config,
    Data,
}

impl Base {
    fn dir(self) -> Option<PathBuf> {
        let base = match self {
            Base::Config => dirs::config_dir(),
            Base::Data => dirs::data_dir(),
        };
        base.map(|p| p.join(APP_DIR))
    }

    fn label(self) -> &'static str {
        match self {
            Base::Config => "config",
            Base::Data => "data",
        }
    }

    fn ensure(self) -> Result<PathBuf> {
        let dir = self
            .dir()
            .with_context(|| format!("Could not determine {} directory", self.label()))?;
        std::fs::create_dir_all(&dir).with_context(|| {
            format!("Failed to create {} directory: {}", self.label(), dir.display())
        })?;
        Ok(dir)
    }
}

/// Create the config directory at startup so users know where files go
pub fn init() -> Result<PathBuf> {
    Base::Config.ensure()
}

/// Path of `filename` inside the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    Base::Config.dir().map(|p| p.join(filename))
}

pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.is_file())
}

/// Read `filename` from the config directory as JSON
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Read an explicit JSON file, e.g. one passed with `--settings`
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Data directory, created if missing
pub fn ensure_data_dir() -> Result<PathBuf> {
    Base::Data.ensure()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_app_scoped() {
        let settings = config_path("settings.json").unwrap();
        assert!(settings.ends_with("tally/settings.json"));
        assert!(Base::Data.dir().unwrap().ends_with("tally"));
    }

    #[test]
    fn test_missing_file_does_not_exist() {
        assert!(!config_exists("no-such-file-for-tally-tests.json"));
    }

    #[test]
    fn test_load_json_file() {
        let dir = std::env::temp_dir().join(format!("tally-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("value.json");
        std::fs::write(&path, r#"{"answer": 42}"#).unwrap();

        let value: serde_json::Value = load_json_file(&path).unwrap();
        assert_eq!(value["answer"], 42);

        std::fs::write(&path, "{not json").unwrap();
        let err = load_json_file::<serde_json::Value>(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid JSON"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
