//! Configuration management for rentgrid using the prefer crate.

mod loader;
mod settings;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::periodic::{PeriodicArgs, PeriodicOperation, MAX_AGE_HOURS};

pub use loader::{load_settings_with_options, LoadOptions};
pub use settings::Settings;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "rentgrid.db";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("{0} is not configured")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One periodic operation submitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Operation name, e.g. `refresh_calendars`.
    pub operation: String,
    /// Interval between submissions.
    pub every_hours: f64,
    /// Keyword arguments passed to the operation.
    #[serde(default = "empty_kwargs")]
    pub kwargs: serde_json::Value,
}

fn empty_kwargs() -> serde_json::Value {
    serde_json::json!({})
}

impl ScheduleEntry {
    /// Check the operation name, interval and kwargs before anything is submitted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation.is_empty() {
            return Err(ConfigError::Invalid(
                "schedule entry without an operation".to_string(),
            ));
        }
        if PeriodicOperation::from_str(&self.operation).is_none() {
            let known: Vec<&str> = PeriodicOperation::ALL.iter().map(|op| op.as_str()).collect();
            return Err(ConfigError::Invalid(format!(
                "schedule entry {:?} is not a periodic operation (expected one of: {})",
                self.operation,
                known.join(", ")
            )));
        }
        if self.interval().is_none() {
            return Err(ConfigError::Invalid(format!(
                "schedule entry {} needs every_hours between 0 and {}",
                self.operation, MAX_AGE_HOURS
            )));
        }
        PeriodicArgs::from_kwargs(&self.kwargs).map_err(|e| {
            ConfigError::Invalid(format!("schedule entry {}: {}", self.operation, e))
        })?;
        Ok(())
    }

    /// Time between submissions, or `None` when `every_hours` is out of range.
    pub fn interval(&self) -> Option<chrono::Duration> {
        if !self.every_hours.is_finite() || self.every_hours <= 0.0 || self.every_hours > MAX_AGE_HOURS {
            return None;
        }
        chrono::Duration::try_seconds((self.every_hours * 3600.0) as i64)
    }
}

/// Retry section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_max_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
}

impl RetryConfig {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename or URL.
    /// A plain filename is joined with data_dir; a `sqlite:` URL is used as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Base URL of the vendor API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Delay after each request in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    /// HTTP or SOCKS proxy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Search results requested per page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Deepest tile the crawler subdivides to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages_per_tile: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_move_threshold_m: Option<f64>,
    /// Zoom used when seeding an AOI's grid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_zoom: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_poll_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "RetryConfig::is_default")]
    pub retry: RetryConfig,
    /// Periodic operations submitted by `rentgrid beat`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<ScheduleEntry>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a rentgrid config file in the standard locations.
    ///
    /// Returns the default config when none is found.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load("rentgrid").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default()),
            },
            Err(e) => {
                tracing::debug!("No config file discovered: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the file extension: TOML, YAML, or JSON otherwise.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))?,
        };

        config.source_path = Some(path.to_path_buf());
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Directory of the config file, if loaded from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            if database.starts_with("sqlite:") || database.contains("://") {
                settings.database_url = Some(database.clone());
            } else {
                settings.database_filename = database.clone();
            }
        }
        if let Some(ref api_base) = self.api_base {
            settings.api_base = Some(api_base.trim_end_matches('/').to_string());
        }
        if let Some(ref api_key) = self.api_key {
            settings.api_key = Some(api_key.clone());
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(ref proxy) = self.proxy {
            settings.proxy = Some(proxy.clone());
        }
        if let Some(page_size) = self.page_size {
            settings.page_size = page_size;
        }
        if let Some(max_depth) = self.max_depth {
            settings.max_depth = max_depth;
        }
        if let Some(max_pages) = self.max_pages_per_tile {
            settings.max_pages_per_tile = max_pages;
        }
        if let Some(threshold) = self.listing_move_threshold_m {
            settings.listing_move_threshold_m = threshold;
        }
        if let Some(seed_zoom) = self.seed_zoom {
            settings.seed_zoom = seed_zoom;
        }
        if let Some(poll) = self.worker_poll_ms {
            settings.worker_poll_ms = poll;
        }

        let retry = &self.retry;
        if let Some(max_retries) = retry.max_retries {
            settings.retry.max_retries = max_retries;
        }
        if let Some(base) = retry.backoff_base_secs {
            settings.retry.backoff_base = std::time::Duration::from_secs(base);
        }
        if let Some(max) = retry.backoff_max_secs {
            settings.retry.backoff_max = std::time::Duration::from_secs(max);
        }
        if let Some(jitter) = retry.jitter {
            settings.retry.jitter = jitter;
        }

        if !self.schedule.is_empty() {
            settings.schedule = self.schedule.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn toml_config_applies_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rentgrid.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "crawl"
api_base = "https://vendor.test/api/"
page_size = 20
max_depth = 18

[retry]
max_retries = 5
backoff_base_secs = 10

[[schedule]]
operation = "refresh_calendars"
every_hours = 6
kwargs = { how_many = 500, age_hours = 24 }
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, &config.base_dir().unwrap());

        assert_eq!(settings.data_dir, dir.path().join("crawl"));
        assert_eq!(settings.api_base.as_deref(), Some("https://vendor.test/api"));
        assert_eq!(settings.page_size, 20);
        assert_eq!(settings.max_depth, 18);
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.backoff_base.as_secs(), 10);
        assert_eq!(settings.retry.backoff_max.as_secs(), 900);
        assert_eq!(settings.schedule.len(), 1);
        assert_eq!(settings.schedule[0].kwargs["how_many"], 500);
        assert!(settings.validate().is_ok());
    }

    #[tokio::test]
    async fn yaml_and_json_are_detected_by_extension() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("rentgrid.yaml");
        std::fs::write(&yaml, "seed_zoom: 12\nproxy: socks5://127.0.0.1:9050\n").unwrap();
        let json = dir.path().join("rentgrid.json");
        std::fs::write(&json, r#"{"request_delay_ms": 250}"#).unwrap();

        let from_yaml = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(from_yaml.seed_zoom, Some(12));
        assert_eq!(from_yaml.proxy.as_deref(), Some("socks5://127.0.0.1:9050"));

        let from_json = Config::load_from_path(&json).await.unwrap();
        assert_eq!(from_json.request_delay_ms, Some(250));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rentgrid.toml");
        std::fs::write(&path, "page_size = \"lots\"").unwrap();

        let err = Config::load_from_path(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn database_value_can_be_filename_or_url() {
        let base = Path::new("/srv/rentgrid");
        let mut settings = Settings::default();
        let config = Config {
            data_dir: Some("/data".into()),
            database: Some("crawl.db".into()),
            ..Default::default()
        };
        config.apply_to_settings(&mut settings, base);
        assert_eq!(settings.database_url(), "sqlite:/data/crawl.db");

        let config = Config {
            database: Some("sqlite:/tmp/other.db".into()),
            ..Default::default()
        };
        config.apply_to_settings(&mut settings, base);
        assert_eq!(settings.database_url(), "sqlite:/tmp/other.db");
    }
}
