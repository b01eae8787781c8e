//! Application settings.

use std::fs;
use std::path::PathBuf;

use crate::grid::MAX_ZOOM;
use crate::repository::util::is_postgres_url;
use crate::work_queue::RetryPolicy;

use super::{ConfigError, ScheduleEntry, DEFAULT_DATABASE_FILENAME};

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Vendor API base URL, without a trailing slash.
    pub api_base: Option<String>,
    /// Sent as `X-Api-Key` when set.
    pub api_key: Option<String>,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Delay after each request in milliseconds.
    pub request_delay_ms: u64,
    pub proxy: Option<String>,
    /// Search results per page (`items_per_grid`).
    pub page_size: u32,
    /// Tiles at this depth paginate instead of subdividing.
    pub max_depth: u8,
    /// Upper bound on a pagination-follow chain.
    pub max_pages_per_tile: u32,
    /// Ground distance in meters beyond which a rediscovered listing counts as moved.
    pub listing_move_threshold_m: f64,
    /// Zoom used to seed an AOI's grid.
    pub seed_zoom: u8,
    pub retry: RetryPolicy,
    /// Idle sleep between queue polls.
    pub worker_poll_ms: u64,
    pub schedule: Vec<ScheduleEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rentgrid");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            api_base: None,
            api_key: None,
            user_agent: format!("rentgrid/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: 30,
            request_delay_ms: 500,
            proxy: None,
            page_size: 50,
            max_depth: 22,
            max_pages_per_tile: 50,
            listing_move_threshold_m: 100.0,
            seed_zoom: 10,
            retry: RetryPolicy::default(),
            worker_poll_ms: 1000,
            schedule: Vec::new(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Full path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Check if the database appears to be initialized.
    pub fn database_exists(&self) -> bool {
        match self.database_url {
            Some(ref url) => {
                let path = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
                path == ":memory:" || std::path::Path::new(path).exists()
            }
            None => self.database_path().exists(),
        }
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    /// The vendor base URL, or an error when none is configured.
    pub fn require_api_base(&self) -> Result<&str, ConfigError> {
        self.api_base
            .as_deref()
            .filter(|base| !base.is_empty())
            .ok_or(ConfigError::Missing("api_base (set RENTGRID_API_BASE or api_base in config)"))
    }

    /// Reject settings the crawler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.as_deref().is_some_and(is_postgres_url) {
            return Err(ConfigError::Invalid(
                "only sqlite databases are supported".to_string(),
            ));
        }
        if let Some(ref base) = self.api_base {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "api_base must be an http(s) URL, got {base:?}"
                )));
            }
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".to_string()));
        }
        if self.max_depth == 0 || self.max_depth >= MAX_ZOOM {
            return Err(ConfigError::Invalid(format!(
                "max_depth must be between 1 and {}, got {}",
                MAX_ZOOM - 1,
                self.max_depth
            )));
        }
        if self.seed_zoom > self.max_depth {
            return Err(ConfigError::Invalid(format!(
                "seed_zoom {} is deeper than max_depth {}",
                self.seed_zoom, self.max_depth
            )));
        }
        if self.max_pages_per_tile == 0 {
            return Err(ConfigError::Invalid(
                "max_pages_per_tile must be positive".to_string(),
            ));
        }
        if self.listing_move_threshold_m.is_nan() || self.listing_move_threshold_m < 0.0 {
            return Err(ConfigError::Invalid(
                "listing_move_threshold_m must be a non-negative number of meters".to_string(),
            ));
        }
        if self.retry.backoff_base > self.retry.backoff_max {
            return Err(ConfigError::Invalid(
                "retry.backoff_base_secs exceeds retry.backoff_max_secs".to_string(),
            ));
        }
        for entry in &self.schedule {
            entry.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::with_data_dir(PathBuf::from("/tmp/rentgrid"));
        assert!(settings.validate().is_ok());
        assert_eq!(settings.database_url(), "sqlite:/tmp/rentgrid/rentgrid.db");
        assert!(matches!(
            settings.require_api_base(),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut settings = Settings {
            max_depth: MAX_ZOOM,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.max_depth = 12;
        settings.seed_zoom = 14;
        assert!(settings.validate().is_err());

        settings.seed_zoom = 10;
        settings.listing_move_threshold_m = f64::NAN;
        assert!(settings.validate().is_err());

        settings.listing_move_threshold_m = 50.0;
        settings.database_url = Some("postgres://localhost/rentgrid".into());
        assert!(settings.validate().is_err());
    }

    fn entry(operation: &str, every_hours: f64, kwargs: serde_json::Value) -> ScheduleEntry {
        ScheduleEntry {
            operation: operation.into(),
            every_hours,
            kwargs,
        }
    }

    #[test]
    fn schedule_entries_are_checked_up_front() {
        let mut settings = Settings::default();
        settings.schedule = vec![entry("refresh_calendars", 6.0, json!({"how_many": 500}))];
        assert!(settings.validate().is_ok());

        for bad in [
            entry("refresh_calendars", 6.0, json!({"how_many": -5})),
            entry("refresh_calendars", 6.0, json!({"age_hours": "old"})),
            entry("no_such_op", 6.0, json!({})),
            entry("", 6.0, json!({})),
            entry("scan_stale_tiles", 0.0, json!({})),
            entry("scan_stale_tiles", 1e12, json!({})),
        ] {
            settings.schedule = vec![bad.clone()];
            assert!(
                matches!(settings.validate(), Err(ConfigError::Invalid(_))),
                "{bad:?} accepted"
            );
        }
    }
}
