use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::TransactionIsolation;

/// Execution defaults applied to every query a `Db` builds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Statement timeout in seconds; 0 leaves the driver default.
    pub timeout_secs: u64,
    pub poolable: bool,
    pub escape_processing: bool,
    pub batch: bool,
    pub large: bool,
    pub isolation: Option<TransactionIsolation>,
    /// Rows fetched per round trip; 0 leaves the driver default.
    pub fetch_size: u32,
    /// Upper bound on rows returned by a query; 0 means no limit.
    pub max_rows: u64,
}

impl QueryConfig {
    pub fn new() -> Self {
        Self {
            timeout_secs: 0,
            poolable: false,
            escape_processing: true,
            batch: false,
            large: false,
            isolation: None,
            fetch_size: 0,
            max_rows: 0,
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("query_flow");
            path.push("config.json");
            path
        })
    }

    /// Loads the user config, falling back to defaults when it is missing or
    /// cannot be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::new(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(err) => {
                    log::warn!("Ignoring invalid config {}: {err}", path.display());
                    Self::new()
                }
            },
            Err(err) => {
                log::warn!("Cannot read config {}: {err}", path.display());
                Self::new()
            }
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                log::error!("Config persistence error: {err}");
                return Err(Box::new(err));
            }
        }
        let content = match serde_json::to_string_pretty(self) {
            Ok(content) => content,
            Err(err) => {
                log::error!("Config persistence error: {err}");
                return Err(Box::new(err));
            }
        };
        if let Err(err) = fs::write(path, content) {
            log::error!("Config persistence error: {err}");
            return Err(Box::new(err));
        }
        Ok(())
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ExecOptions;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = QueryConfig {
            timeout_secs: 30,
            isolation: Some(TransactionIsolation::Serializable),
            fetch_size: 500,
            ..QueryConfig::new()
        };
        config.save_to(&path).unwrap();
        assert_eq!(QueryConfig::load_from(&path), config);
    }

    #[test]
    fn missing_or_invalid_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert_eq!(QueryConfig::load_from(&path), QueryConfig::new());

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(QueryConfig::load_from(&path), QueryConfig::new());
    }

    #[test]
    fn partial_file_keeps_defaults_for_absent_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_rows": 10 }"#).unwrap();
        let config = QueryConfig::load_from(&path);
        assert_eq!(config.max_rows, 10);
        assert!(config.escape_processing);
        assert!(!config.batch);
    }

    #[test]
    fn zero_values_mean_driver_defaults() {
        let options = ExecOptions::from(&QueryConfig::new());
        assert_eq!(options.timeout, None);
        assert_eq!(options.fetch_size, None);
        assert_eq!(options.max_rows, None);

        let options = ExecOptions::from(&QueryConfig {
            timeout_secs: 5,
            ..QueryConfig::new()
        });
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
    }
}
