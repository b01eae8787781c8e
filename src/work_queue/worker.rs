//! Worker loops that claim tasks and record their outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use super::registry::{OperationRegistry, TaskFailure, TaskInvocation, TaskOutcome};
use super::QueueError;
use crate::models::{Task, TaskEvent, TaskStatus};
use crate::repository::{TaskRepository, TaskTransition};

/// Claims and runs tasks from the shared `tasks` table.
pub struct Worker {
    tasks: TaskRepository,
    registry: Arc<OperationRegistry>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(tasks: TaskRepository, registry: Arc<OperationRegistry>, poll_interval: Duration) -> Self {
        Self {
            tasks,
            registry,
            poll_interval,
        }
    }

    /// Claim and run one task. Returns the task id and the status it ended in,
    /// or `None` when nothing was runnable.
    pub async fn run_once(&self) -> Result<Option<(String, TaskStatus)>, QueueError> {
        let now = Utc::now();
        let Some(task) = self.tasks.claim(now).await? else {
            return Ok(None);
        };

        if task.is_expired(now) {
            tracing::info!("Task {} ({}) expired before it ran", task.id, task.operation);
            let to = task.status.apply(TaskEvent::Revoke)?;
            let transition = TaskTransition::new(task.status, to, now).with_error("expired");
            let status = self.record(&task, &transition).await?;
            return Ok(Some((task.id, status)));
        }

        let Some(handler) = self.registry.handler(&task.operation) else {
            tracing::error!("No handler for operation {} (task {})", task.operation, task.id);
            let to = task.status.apply(TaskEvent::Fail)?;
            let transition = TaskTransition::new(task.status, to, now)
                .with_error(format!("unknown operation: {}", task.operation));
            let status = self.record(&task, &transition).await?;
            return Ok(Some((task.id, status)));
        };

        tracing::debug!("Running {} task {} ({:?})", task.operation, task.id, task.kwargs);
        let result = handler
            .run(TaskInvocation {
                task_id: task.id.clone(),
                operation: task.operation.clone(),
                kwargs: task.kwargs.clone(),
                priority: task.priority,
                retries: task.retries,
            })
            .await;

        let transition = self.outcome_transition(&task, result)?;
        let status = self.record(&task, &transition).await?;
        Ok(Some((task.id, status)))
    }

    fn outcome_transition(
        &self,
        task: &Task,
        result: Result<TaskOutcome, TaskFailure>,
    ) -> Result<TaskTransition, QueueError> {
        let now = Utc::now();
        let transition = match result {
            Ok(outcome) => {
                let to = task.status.apply(TaskEvent::Succeed)?;
                let transition = TaskTransition::new(task.status, to, now);
                match outcome.note {
                    Some(note) => transition.with_result(note),
                    None => transition,
                }
            }
            Err(TaskFailure::Retriable(message)) if task.retries < task.max_retries => {
                let delay = self.registry.policy(&task.operation).delay(task.retries);
                let eta = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                tracing::warn!(
                    "Task {} ({}) will retry in {:?}: {}",
                    task.id,
                    task.operation,
                    delay,
                    message
                );
                let to = task.status.apply(TaskEvent::Retry)?;
                TaskTransition::new(task.status, to, now)
                    .with_retry(task.retries + 1, eta)
                    .with_error(message)
            }
            Err(TaskFailure::Retriable(message)) => {
                tracing::error!(
                    "Task {} ({}) failed after {} retries: {}",
                    task.id,
                    task.operation,
                    task.retries,
                    message
                );
                let to = task.status.apply(TaskEvent::Fail)?;
                TaskTransition::new(task.status, to, now)
                    .with_error(format!("gave up after {} retries: {}", task.retries, message))
            }
            Err(TaskFailure::Permanent(message)) => {
                tracing::error!("Task {} ({}) failed: {}", task.id, task.operation, message);
                let to = task.status.apply(TaskEvent::Fail)?;
                TaskTransition::new(task.status, to, now).with_error(message)
            }
        };
        Ok(transition)
    }

    /// Store a transition; if the row moved meanwhile (revoked), report its current status.
    async fn record(&self, task: &Task, transition: &TaskTransition) -> Result<TaskStatus, QueueError> {
        if self.tasks.transition(&task.id, transition).await? {
            return Ok(transition.to);
        }
        let current = self
            .tasks
            .get(&task.id)
            .await?
            .ok_or_else(|| QueueError::NotFound(task.id.clone()))?;
        tracing::info!(
            "Task {} moved to {} while running; outcome {} not recorded",
            task.id,
            current.status,
            transition.to
        );
        Ok(current.status)
    }

    /// Run `concurrency` loops until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, concurrency: usize, shutdown: watch::Receiver<bool>) {
        let mut loops = Vec::with_capacity(concurrency.max(1));
        for slot in 0..concurrency.max(1) {
            let worker = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            loops.push(tokio::spawn(async move {
                tracing::debug!("Worker loop {} started", slot);
                while !*shutdown.borrow() {
                    let idle = match worker.run_once().await {
                        Ok(Some((id, status))) => {
                            tracing::debug!("Task {} finished as {}", id, status);
                            false
                        }
                        Ok(None) => true,
                        Err(e) => {
                            tracing::error!("Worker loop {}: {}", slot, e);
                            true
                        }
                    };
                    if idle {
                        tokio::select! {
                            _ = tokio::time::sleep(worker.poll_interval) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                }
                tracing::debug!("Worker loop {} stopped", slot);
            }));
        }
        for handle in loops {
            if let Err(e) = handle.await {
                tracing::error!("Worker loop panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{migrations, DbPool};
    use crate::work_queue::{handler_fn, DbTaskQueue, RetryPolicy, TaskQueue, TaskSpec};
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup(registry: OperationRegistry) -> (tempfile::TempDir, TaskRepository, DbTaskQueue, Worker) {
        let dir = tempdir().unwrap();
        let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
        migrations::run_migrations(&db_url).await.unwrap();
        let tasks = TaskRepository::new(DbPool::from_url(&db_url).unwrap());
        let queue = DbTaskQueue::new(tasks.clone(), 1);
        let worker = Worker::new(tasks.clone(), Arc::new(registry), Duration::from_millis(10));
        (dir, tasks, queue, worker)
    }

    fn no_backoff() -> RetryPolicy {
        RetryPolicy {
            backoff_base: Duration::ZERO,
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_records_note() {
        let mut registry = OperationRegistry::new(no_backoff());
        registry.register(
            "noop",
            handler_fn(|_| async { Ok::<_, TaskFailure>(TaskOutcome::with_note("done")) }),
        );
        let (_dir, tasks, queue, worker) = setup(registry).await;
        let handle = queue.submit(TaskSpec::new("noop", json!({}))).await.unwrap();

        let (id, status) = worker.run_once().await.unwrap().unwrap();
        assert_eq!(id, handle.id);
        assert_eq!(status, TaskStatus::Success);
        let stored = tasks.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.result.as_deref(), Some("done"));
        assert!(stored.finished_at.is_some());
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retriable_failures_retry_then_fail() {
        let mut registry = OperationRegistry::new(no_backoff());
        registry.register(
            "flaky",
            handler_fn(|_| async { Err::<TaskOutcome, _>(TaskFailure::Retriable("HTTP 429".into())) }),
        );
        let (_dir, tasks, queue, worker) = setup(registry).await;
        let handle = queue.submit(TaskSpec::new("flaky", json!({}))).await.unwrap();

        let (_, status) = worker.run_once().await.unwrap().unwrap();
        assert_eq!(status, TaskStatus::Retry);
        assert_eq!(tasks.get(&handle.id).await.unwrap().unwrap().retries, 1);

        let (_, status) = worker.run_once().await.unwrap().unwrap();
        assert_eq!(status, TaskStatus::Failure);
        let stored = tasks.get(&handle.id).await.unwrap().unwrap();
        assert!(stored.error.unwrap().contains("HTTP 429"));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let mut registry = OperationRegistry::new(no_backoff());
        registry.register(
            "broken",
            handler_fn(|_| async { Err::<TaskOutcome, _>(TaskFailure::Permanent("HTTP 404".into())) }),
        );
        let (_dir, _tasks, queue, worker) = setup(registry).await;
        queue.submit(TaskSpec::new("broken", json!({}))).await.unwrap();

        let (_, status) = worker.run_once().await.unwrap().unwrap();
        assert_eq!(status, TaskStatus::Failure);
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_and_unknown_tasks_do_not_run() {
        let (_dir, tasks, queue, worker) = setup(OperationRegistry::new(no_backoff())).await;
        let expired = queue
            .submit(
                TaskSpec::new("anything", json!({}))
                    .with_priority(9)
                    .expires_at(Utc::now() - chrono::Duration::minutes(1)),
            )
            .await
            .unwrap();
        let unknown = queue.submit(TaskSpec::new("mystery", json!({}))).await.unwrap();

        let (id, status) = worker.run_once().await.unwrap().unwrap();
        assert_eq!((id.as_str(), status), (expired.id.as_str(), TaskStatus::Revoked));
        assert_eq!(
            tasks.get(&expired.id).await.unwrap().unwrap().error.as_deref(),
            Some("expired")
        );

        let (id, status) = worker.run_once().await.unwrap().unwrap();
        assert_eq!((id.as_str(), status), (unknown.id.as_str(), TaskStatus::Failure));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let mut registry = OperationRegistry::new(no_backoff());
        registry.register("noop", handler_fn(|_| async { Ok::<_, TaskFailure>(TaskOutcome::done()) }));
        let (_dir, tasks, queue, worker) = setup(registry).await;
        for _ in 0..3 {
            queue.submit(TaskSpec::new("noop", json!({}))).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(Arc::new(worker).run(2, rx));
        for _ in 0..200 {
            let done = tasks.list(Some(TaskStatus::Success), None, 10).await.unwrap();
            if done.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        running.await.unwrap();
        assert_eq!(tasks.list(Some(TaskStatus::Success), None, 10).await.unwrap().len(), 3);
    }
}
