//! Database-backed task queue: submission, fan-out groups, workers and the beat scheduler.
//!
//! Tasks are rows in the `tasks` table. Workers claim runnable rows, dispatch
//! them to the handler registered for their operation and record the outcome
//! as a lifecycle event. Any number of worker processes can share one database.

mod db;
mod error;
pub mod registry;
mod scheduler;
mod worker;

pub use db::DbTaskQueue;
pub use error::QueueError;
pub use registry::{
    handler_fn, OperationRegistry, RetryPolicy, TaskFailure, TaskHandler, TaskInvocation,
    TaskOutcome,
};
pub use scheduler::Scheduler;
pub use worker::Worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Highest task priority.
pub const MAX_PRIORITY: u8 = 9;

/// A unit of work to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub operation: String,
    pub kwargs: serde_json::Value,
    /// 0..=9, higher runs first.
    pub priority: u8,
    /// Task that submitted this one as its continuation.
    pub parent_id: Option<String>,
    pub eta: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TaskSpec {
    pub fn new(operation: impl Into<String>, kwargs: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            kwargs,
            priority: 0,
            parent_id: None,
            eta: None,
            expires_at: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent(mut self, parent_id: Option<&str>) -> Self {
        self.parent_id = parent_id.map(String::from);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Id of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
}

/// Ids of a submitted fan-out group and its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    pub id: String,
    pub task_ids: Vec<String>,
}

/// Where units of work are submitted.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue one task.
    async fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, QueueError>;

    /// Enqueue tasks as one group, recording the operation and args that produced them.
    async fn group(
        &self,
        operation: &str,
        args: serde_json::Value,
        specs: Vec<TaskSpec>,
    ) -> Result<GroupHandle, QueueError>;
}

/// End of the current UTC day, used as the expiry of follow-up work.
pub fn end_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn end_of_day_is_next_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 17, 45, 0).unwrap();
        assert_eq!(end_of_day(now), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }
}
