//! Shared helper functions for CLI commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::repository::Repositories;
use crate::work_queue::{DbTaskQueue, TaskQueue};

/// Open the database, applying pending migrations.
pub async fn open_repos(settings: &Settings) -> anyhow::Result<Repositories> {
    settings.ensure_directories()?;
    Ok(Repositories::open(&settings.database_url()).await?)
}

/// Queue for commands that only submit work.
pub fn queue(settings: &Settings, repos: &Repositories) -> Arc<dyn TaskQueue> {
    Arc::new(DbTaskQueue::new(
        repos.tasks.clone(),
        settings.retry.max_retries,
    ))
}

/// Format an optional timestamp for tables.
pub fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate a string for display.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long note", 10), "a rathe...");
    }
}
