//! Configuration loading and environment overrides.

use std::path::{Path, PathBuf};

use super::{Config, ConfigError, Settings};

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory or database file (--data flag).
    pub data: Option<PathBuf>,
}

/// Look for a config file next to the database.
fn find_config_next_to_db(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["toml", "yaml", "yml", "json"];
    let basenames = ["rentgrid", "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

/// Split a `--data` value into a directory and an optional database filename.
fn resolve_data_path(path: &Path) -> (PathBuf, Option<String>) {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    let is_db_file = path
        .extension()
        .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3");
    if is_db_file {
        let filename = path.file_name().and_then(|n| n.to_str()).map(String::from);
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        (dir, filename)
    } else {
        (path, None)
    }
}

async fn load_file_config(
    options: &LoadOptions,
    data_dir_override: Option<&PathBuf>,
) -> Result<Config, ConfigError> {
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path).await;
    }

    if let Some(data_dir) = data_dir_override {
        if let Some(config_path) = find_config_next_to_db(data_dir) {
            tracing::debug!("Found config next to data dir: {}", config_path.display());
            return Config::load_from_path(&config_path).await;
        }
    }

    Config::load().await
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Apply environment variables, which take precedence over the config file.
fn apply_env_overrides(settings: &mut Settings) {
    if let Some(database_url) = env_override("DATABASE_URL") {
        tracing::debug!("Using DATABASE_URL from environment: {}", database_url);
        settings.database_url = Some(database_url);
    }
    if let Some(api_base) = env_override("RENTGRID_API_BASE") {
        tracing::debug!("Using RENTGRID_API_BASE from environment: {}", api_base);
        settings.api_base = Some(api_base.trim_end_matches('/').to_string());
    }
    if let Some(api_key) = env_override("RENTGRID_API_KEY") {
        tracing::debug!("Using RENTGRID_API_KEY from environment");
        settings.api_key = Some(api_key);
    }
    if let Some(proxy) = env_override("RENTGRID_PROXY") {
        tracing::debug!("Using RENTGRID_PROXY from environment: {}", proxy);
        settings.proxy = Some(proxy);
    }
}

/// Load and validate settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let data_override = options.data.as_deref().map(resolve_data_path);
    let data_dir_override = data_override.as_ref().map(|(dir, _)| dir.clone());

    let config = load_file_config(&options, data_dir_override.as_ref()).await?;

    let mut settings = Settings::default();

    let base_dir = if options.use_cwd {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    } else {
        config
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    };

    config.apply_to_settings(&mut settings, &base_dir);

    // --data takes precedence over the config file
    if let Some((data_dir, filename)) = data_override {
        settings.data_dir = data_dir;
        if let Some(filename) = filename {
            settings.database_filename = filename;
        }
    }

    apply_env_overrides(&mut settings);
    settings.validate()?;

    Ok((settings, config))
}
