//! Task and task-group persistence for the work queue.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{NewTaskRecord, TaskChangeset, TaskGroupRecord, TaskRecord};
use super::pool::{DbPool, DieselError};
use super::util::{corrupt_column, format_datetime};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{NewTask, Task, TaskEvent, TaskGroup, TaskStatus};
use crate::schema::{task_groups, tasks};
use crate::with_conn;

impl TryFrom<TaskRecord> for Task {
    type Error = DieselError;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&record.status)
            .ok_or_else(|| corrupt_column("tasks.status", &record.status, "unknown status"))?;
        let kwargs = serde_json::from_str(&record.kwargs)
            .map_err(|e| corrupt_column("tasks.kwargs", &record.kwargs, e))?;
        Ok(Task {
            id: record.id,
            operation: record.operation,
            kwargs,
            status,
            priority: record.priority.clamp(0, 9) as u8,
            group_id: record.group_id,
            parent_id: record.parent_id,
            retries: record.retries.max(0) as u32,
            max_retries: record.max_retries.max(0) as u32,
            eta: parse_datetime_opt(record.eta),
            expires_at: parse_datetime_opt(record.expires_at),
            submitted_at: parse_datetime(&record.submitted_at),
            started_at: parse_datetime_opt(record.started_at),
            finished_at: parse_datetime_opt(record.finished_at),
            result: record.result,
            error: record.error,
        })
    }
}

impl TryFrom<TaskGroupRecord> for TaskGroup {
    type Error = DieselError;

    fn try_from(record: TaskGroupRecord) -> Result<Self, Self::Error> {
        let args = serde_json::from_str(&record.args)
            .map_err(|e| corrupt_column("task_groups.args", &record.args, e))?;
        Ok(TaskGroup {
            id: record.id,
            operation: record.operation,
            args,
            created_at: parse_datetime(&record.created_at),
        })
    }
}

fn new_task_record(task: &NewTask, submitted_at: &str) -> NewTaskRecord {
    NewTaskRecord {
        id: task.id.clone(),
        operation: task.operation.clone(),
        kwargs: task.kwargs.to_string(),
        status: TaskStatus::Submitted.as_str().to_string(),
        priority: i32::from(task.priority),
        group_id: task.group_id.clone(),
        parent_id: task.parent_id.clone(),
        retries: 0,
        max_retries: task.max_retries as i32,
        eta: task.eta.as_ref().map(format_datetime),
        expires_at: task.expires_at.as_ref().map(format_datetime),
        submitted_at: submitted_at.to_string(),
    }
}

/// A guarded state change: applied only while the task is still in `from`.
#[derive(Debug, Clone)]
pub struct TaskTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    pub retries: Option<u32>,
    pub eta: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskTransition {
    pub fn new(from: TaskStatus, to: TaskStatus, at: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            at,
            retries: None,
            eta: None,
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retry(mut self, retries: u32, eta: DateTime<Utc>) -> Self {
        self.retries = Some(retries);
        self.eta = Some(eta);
        self
    }
}

/// Diesel-based task repository.
#[derive(Clone)]
pub struct TaskRepository {
    pool: DbPool,
}

impl TaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert tasks, and their group when given, in one transaction.
    pub async fn insert(&self, group: Option<&TaskGroup>, new_tasks: &[NewTask]) -> Result<(), DieselError> {
        let now = format_datetime(&Utc::now());
        let group_record = group.map(|g| TaskGroupRecord {
            id: g.id.clone(),
            operation: g.operation.clone(),
            args: g.args.to_string(),
            created_at: format_datetime(&g.created_at),
        });
        let records: Vec<NewTaskRecord> = new_tasks.iter().map(|t| new_task_record(t, &now)).collect();

        with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(move |conn| {
                Box::pin(async move {
                    if let Some(group) = &group_record {
                        diesel::insert_into(task_groups::table)
                            .values(group)
                            .execute(conn)
                            .await?;
                    }
                    for record in &records {
                        diesel::insert_into(tasks::table)
                            .values(record)
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await
        })
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>, DieselError> {
        with_conn!(self.pool, conn, {
            tasks::table
                .find(id)
                .first::<TaskRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(Task::try_from).transpose())
        })
    }

    /// Highest-priority runnable task, oldest submission first.
    pub async fn next_ready(&self, now: DateTime<Utc>) -> Result<Option<Task>, DieselError> {
        let now = format_datetime(&now);
        with_conn!(self.pool, conn, {
            tasks::table
                .filter(tasks::status.eq_any(vec![
                    TaskStatus::Submitted.as_str(),
                    TaskStatus::Retry.as_str(),
                ]))
                .filter(tasks::eta.is_null().or(tasks::eta.le(now.as_str())))
                .order((tasks::priority.desc(), tasks::submitted_at.asc()))
                .first::<TaskRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(Task::try_from).transpose())
        })
    }

    /// Pick the next runnable task and mark it started in one transaction.
    ///
    /// The update is guarded on the status read, so two workers racing for the
    /// same row cannot both claim it.
    pub async fn claim(&self, now: DateTime<Utc>) -> Result<Option<Task>, DieselError> {
        let now = format_datetime(&now);
        let record = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(move |conn| {
                Box::pin(async move {
                    let candidate = tasks::table
                        .filter(tasks::status.eq_any(vec![
                            TaskStatus::Submitted.as_str(),
                            TaskStatus::Retry.as_str(),
                        ]))
                        .filter(tasks::eta.is_null().or(tasks::eta.le(now.as_str())))
                        .order((tasks::priority.desc(), tasks::submitted_at.asc()))
                        .first::<TaskRecord>(conn)
                        .await
                        .optional()?;
                    let Some(mut record) = candidate else {
                        return Ok(None);
                    };
                    let started = TaskStatus::from_str(&record.status)
                        .ok_or_else(|| corrupt_column("tasks.status", &record.status, "unknown status"))?
                        .apply(TaskEvent::Start)
                        .map_err(|e| corrupt_column("tasks.status", &record.status, e))?;

                    let rows = diesel::update(
                        tasks::table
                            .filter(tasks::id.eq(record.id.as_str()))
                            .filter(tasks::status.eq(record.status.as_str())),
                    )
                    .set((
                        tasks::status.eq(started.as_str()),
                        tasks::started_at.eq(Some(now.as_str())),
                    ))
                    .execute(conn)
                    .await?;
                    if rows == 0 {
                        return Ok(None);
                    }
                    record.status = started.as_str().to_string();
                    record.started_at = Some(now.clone());
                    Ok(Some(record))
                })
            })
            .await
        })?;
        record.map(Task::try_from).transpose()
    }

    /// Apply a transition if the task is still in `transition.from`.
    ///
    /// Returns false when another writer moved the task first.
    pub async fn transition(&self, id: &str, transition: &TaskTransition) -> Result<bool, DieselError> {
        let at = format_datetime(&transition.at);
        let eta = transition.eta.as_ref().map(format_datetime);
        let changes = TaskChangeset {
            status: Some(transition.to.as_str()),
            retries: transition.retries.map(|r| r as i32),
            eta: eta.as_deref(),
            started_at: (transition.to == TaskStatus::Started).then_some(at.as_str()),
            finished_at: transition.to.is_finished().then_some(at.as_str()),
            result: transition.result.as_deref(),
            error: transition.error.as_deref(),
        };

        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                tasks::table
                    .filter(tasks::id.eq(id))
                    .filter(tasks::status.eq(transition.from.as_str())),
            )
            .set(&changes)
            .execute(&mut conn)
            .await?;
            Ok(rows > 0)
        })
    }

    /// Kwargs of in-flight tasks for `operations` submitted since `since`.
    pub async fn in_flight_kwargs(
        &self,
        operations: &[&str],
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>, DieselError> {
        let since = format_datetime(&since);
        let in_flight: Vec<&str> = TaskStatus::IN_FLIGHT.iter().map(|s| s.as_str()).collect();
        let raw = with_conn!(self.pool, conn, {
            tasks::table
                .filter(tasks::operation.eq_any(operations.to_vec()))
                .filter(tasks::status.eq_any(in_flight))
                .filter(tasks::submitted_at.ge(since.as_str()))
                .select(tasks::kwargs)
                .load::<String>(&mut conn)
                .await
        })?;
        raw.into_iter()
            .map(|k| serde_json::from_str(&k).map_err(|e| corrupt_column("tasks.kwargs", &k, e)))
            .collect()
    }

    /// Most recent tasks first, optionally filtered.
    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        group_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Task>, DieselError> {
        let mut query = tasks::table
            .order((tasks::submitted_at.desc(), tasks::id.asc()))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(tasks::status.eq(status.as_str()));
        }
        if let Some(group_id) = group_id {
            query = query.filter(tasks::group_id.eq(group_id));
        }
        with_conn!(self.pool, conn, {
            query
                .limit(limit)
                .load::<TaskRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(Task::try_from).collect())
        })
    }

    pub async fn get_group(&self, id: &str) -> Result<Option<TaskGroup>, DieselError> {
        with_conn!(self.pool, conn, {
            task_groups::table
                .find(id)
                .first::<TaskGroupRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(TaskGroup::try_from).transpose())
        })
    }

    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>, DieselError> {
        with_conn!(self.pool, conn, {
            tasks::table
                .group_by(tasks::status)
                .select((tasks::status, diesel::dsl::count_star()))
                .order(tasks::status.asc())
                .load::<(String, i64)>(&mut conn)
                .await
        })
    }

    /// When `operation` was last enqueued.
    pub async fn last_submitted(&self, operation: &str) -> Result<Option<DateTime<Utc>>, DieselError> {
        let latest = with_conn!(self.pool, conn, {
            tasks::table
                .filter(tasks::operation.eq(operation))
                .select(tasks::submitted_at)
                .order(tasks::submitted_at.desc())
                .first::<String>(&mut conn)
                .await
                .optional()
        })?;
        Ok(latest.map(|s| parse_datetime(&s)))
    }
}
