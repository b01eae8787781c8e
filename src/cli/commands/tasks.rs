//! Task queue inspection commands.

use console::style;

use crate::config::Settings;
use crate::models::TaskStatus;
use crate::work_queue::{DbTaskQueue, QueueError};

use super::helpers::{format_time, open_repos, truncate};

/// List recent tasks.
pub async fn cmd_tasks(
    settings: &Settings,
    status: Option<&str>,
    group: Option<&str>,
    limit: i64,
) -> anyhow::Result<()> {
    let status = match status {
        Some(s) => Some(
            TaskStatus::from_str(s).ok_or_else(|| anyhow::anyhow!("unknown task status {s:?}"))?,
        ),
        None => None,
    };
    let repos = open_repos(settings).await?;

    let counts = repos.tasks.count_by_status().await?;
    if !counts.is_empty() {
        let summary: Vec<String> = counts
            .iter()
            .map(|(status, count)| format!("{status}: {count}"))
            .collect();
        println!("{}", style(summary.join("  ")).dim());
    }

    let tasks = repos.tasks.list(status, group, limit).await?;
    if tasks.is_empty() {
        println!("{} No tasks", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<36} {:<24} {:<9} {:>3} {:<16} {}",
        "ID", "Operation", "Status", "Try", "Submitted", "Args"
    );
    println!("{}", "-".repeat(110));
    for task in tasks {
        let status = match task.status {
            TaskStatus::Success => style(task.status.as_str()).green(),
            TaskStatus::Failure => style(task.status.as_str()).red(),
            TaskStatus::Retry | TaskStatus::Revoked => style(task.status.as_str()).yellow(),
            TaskStatus::Submitted | TaskStatus::Started => style(task.status.as_str()).cyan(),
        };
        println!(
            "{:<36} {:<24} {:<9} {:>3} {:<16} {}",
            task.id,
            truncate(&task.operation, 24),
            status,
            task.retries,
            format_time(Some(task.submitted_at)),
            truncate(&task.kwargs.to_string(), 40),
        );
        if let Some(error) = task.error {
            println!("    {}", style(truncate(&error, 100)).red());
        }
    }
    Ok(())
}

/// Revoke a task that has not finished.
pub async fn cmd_revoke(settings: &Settings, task_id: &str) -> anyhow::Result<()> {
    let repos = open_repos(settings).await?;
    let queue = DbTaskQueue::new(repos.tasks.clone(), settings.retry.max_retries);

    match queue.revoke(task_id, "revoked by user").await {
        Ok(TaskStatus::Revoked) => {
            println!("{} Revoked task {}", style("✓").green(), task_id)
        }
        Ok(status) => println!(
            "{} Task {} finished as {} before it could be revoked",
            style("!").yellow(),
            task_id,
            status
        ),
        Err(QueueError::NotFound(_)) => {
            eprintln!("{} Task {} not found", style("!").yellow(), task_id)
        }
        Err(QueueError::Transition(e)) => {
            eprintln!(
                "{} Task {} is already {}",
                style("!").yellow(),
                task_id,
                e.from
            )
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
