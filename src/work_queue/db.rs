//! `TaskQueue` over the `tasks` table.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{GroupHandle, QueueError, TaskHandle, TaskQueue, TaskSpec, MAX_PRIORITY};
use crate::models::{NewTask, TaskEvent, TaskGroup, TaskStatus};
use crate::repository::{TaskRepository, TaskTransition};

#[derive(Clone)]
pub struct DbTaskQueue {
    tasks: TaskRepository,
    max_retries: u32,
}

impl DbTaskQueue {
    /// `max_retries` is stored on every submitted row.
    pub fn new(tasks: TaskRepository, max_retries: u32) -> Self {
        Self { tasks, max_retries }
    }

    fn new_task(&self, spec: TaskSpec, group_id: Option<&str>) -> Result<NewTask, QueueError> {
        if spec.priority > MAX_PRIORITY {
            return Err(QueueError::InvalidPriority(spec.priority));
        }
        Ok(NewTask {
            id: Uuid::new_v4().to_string(),
            operation: spec.operation,
            kwargs: spec.kwargs,
            priority: spec.priority,
            group_id: group_id.map(String::from),
            parent_id: spec.parent_id,
            max_retries: self.max_retries,
            eta: spec.eta,
            expires_at: spec.expires_at,
        })
    }

    /// Mark an unfinished task revoked. Work already running is not interrupted;
    /// its outcome is dropped when it finishes.
    pub async fn revoke(&self, id: &str, reason: &str) -> Result<TaskStatus, QueueError> {
        let task = self
            .tasks
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let next = task.status.apply(TaskEvent::Revoke)?;
        let transition = TaskTransition::new(task.status, next, Utc::now()).with_error(reason);
        if self.tasks.transition(id, &transition).await? {
            tracing::info!("Revoked task {} ({})", id, task.operation);
            return Ok(next);
        }
        // Moved on between the read and the update; report where it went.
        let current = self
            .tasks
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        Ok(current.status)
    }
}

#[async_trait]
impl TaskQueue for DbTaskQueue {
    async fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, QueueError> {
        let task = self.new_task(spec, None)?;
        let id = task.id.clone();
        self.tasks.insert(None, std::slice::from_ref(&task)).await?;
        tracing::debug!("Submitted {} task {}", task.operation, id);
        Ok(TaskHandle { id })
    }

    async fn group(
        &self,
        operation: &str,
        args: serde_json::Value,
        specs: Vec<TaskSpec>,
    ) -> Result<GroupHandle, QueueError> {
        let group = TaskGroup {
            id: Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            args,
            created_at: Utc::now(),
        };
        let tasks = specs
            .into_iter()
            .map(|spec| self.new_task(spec, Some(&group.id)))
            .collect::<Result<Vec<_>, _>>()?;
        let task_ids = tasks.iter().map(|t| t.id.clone()).collect::<Vec<_>>();

        self.tasks.insert(Some(&group), &tasks).await?;
        tracing::debug!(
            "Submitted group {} from {} with {} tasks",
            group.id,
            operation,
            task_ids.len()
        );
        Ok(GroupHandle {
            id: group.id,
            task_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{migrations, DbPool};
    use serde_json::json;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, TaskRepository, DbTaskQueue) {
        let dir = tempdir().unwrap();
        let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
        migrations::run_migrations(&db_url).await.unwrap();
        let tasks = TaskRepository::new(DbPool::from_url(&db_url).unwrap());
        (dir, tasks.clone(), DbTaskQueue::new(tasks, 3))
    }

    #[tokio::test]
    async fn submit_stores_a_submitted_row() {
        let (_dir, tasks, queue) = setup().await;
        let handle = queue
            .submit(TaskSpec::new("discover_tile", json!({"quadkey": "12"})).with_priority(4))
            .await
            .unwrap();

        let stored = tasks.get(&handle.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Submitted);
        assert_eq!(stored.priority, 4);
        assert_eq!(stored.max_retries, 3);
        assert_eq!(stored.kwargs["quadkey"], "12");
    }

    #[tokio::test]
    async fn group_links_members() {
        let (_dir, tasks, queue) = setup().await;
        let specs = ["120", "121"]
            .iter()
            .map(|qk| TaskSpec::new("discover_tile", json!({ "quadkey": qk })))
            .collect();
        let handle = queue
            .group("discover_tile", json!({"quadkey": "12"}), specs)
            .await
            .unwrap();

        assert_eq!(handle.task_ids.len(), 2);
        let members = tasks.list(None, Some(&handle.id), 10).await.unwrap();
        assert_eq!(members.len(), 2);
        let group = tasks.get_group(&handle.id).await.unwrap().unwrap();
        assert_eq!(group.operation, "discover_tile");
    }

    #[tokio::test]
    async fn rejects_priority_above_nine() {
        let (_dir, tasks, queue) = setup().await;
        let err = queue
            .group(
                "refresh_calendars",
                json!({}),
                vec![
                    TaskSpec::new("collect_calendar", json!({"listing_id": 1})),
                    TaskSpec::new("collect_calendar", json!({"listing_id": 2})).with_priority(10),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPriority(10)));
        assert!(tasks.list(None, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_only_touches_unfinished_tasks() {
        let (_dir, tasks, queue) = setup().await;
        let handle = queue
            .submit(TaskSpec::new("collect_reviews", json!({"listing_id": 5})))
            .await
            .unwrap();

        assert_eq!(queue.revoke(&handle.id, "revoked by user").await.unwrap(), TaskStatus::Revoked);
        let stored = tasks.get(&handle.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("revoked by user"));
        assert!(stored.finished_at.is_some());

        let err = queue.revoke(&handle.id, "again").await.unwrap_err();
        assert!(matches!(err, QueueError::Transition(_)));
        assert!(matches!(
            queue.revoke("missing", "x").await.unwrap_err(),
            QueueError::NotFound(_)
        ));
    }
}
