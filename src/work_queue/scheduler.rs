//! Beat scheduler: submits configured periodic operations when they are due.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::{QueueError, TaskHandle, TaskQueue, TaskSpec};
use crate::config::ScheduleEntry;
use crate::repository::TaskRepository;

pub struct Scheduler {
    tasks: TaskRepository,
    queue: Arc<dyn TaskQueue>,
    entries: Vec<ScheduleEntry>,
}

impl Scheduler {
    pub fn new(tasks: TaskRepository, queue: Arc<dyn TaskQueue>, entries: Vec<ScheduleEntry>) -> Self {
        Self {
            tasks,
            queue,
            entries,
        }
    }

    /// Submit every entry whose interval has elapsed since its last submission.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<TaskHandle>, QueueError> {
        let mut submitted = Vec::new();
        for entry in &self.entries {
            if let Err(e) = entry.validate() {
                tracing::error!("Skipping schedule entry: {}", e);
                continue;
            }
            let Some(interval) = entry.interval() else {
                continue;
            };
            let due = match self.tasks.last_submitted(&entry.operation).await? {
                Some(last) => now - last >= interval,
                None => true,
            };
            if !due {
                continue;
            }
            let handle = self
                .queue
                .submit(TaskSpec::new(entry.operation.clone(), entry.kwargs.clone()))
                .await?;
            tracing::info!("Scheduled {} as task {}", entry.operation, handle.id);
            submitted.push(handle);
        }
        Ok(submitted)
    }

    /// Tick every `interval` until `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if let Err(e) = self.tick(Utc::now()).await {
                tracing::error!("Scheduler tick failed: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}
