//! Background task models and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Submitted,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
}

/// Something that happens to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    Start,
    Succeed,
    Fail,
    Retry,
    Revoke,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("task cannot go from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub event: TaskEvent,
}

impl TaskStatus {
    pub const IN_FLIGHT: [TaskStatus; 3] = [Self::Submitted, Self::Started, Self::Retry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Started => "started",
            Self::Retry => "retry",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Revoked => "revoked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "started" => Some(Self::Started),
            "retry" => Some(Self::Retry),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_finished()
    }

    /// Next state after `event`, or an error if the move is not allowed.
    pub fn apply(self, event: TaskEvent) -> Result<TaskStatus, InvalidTransition> {
        use TaskEvent as E;
        use TaskStatus as S;
        match (self, event) {
            (S::Submitted | S::Retry, E::Start) => Ok(S::Started),
            (S::Started, E::Succeed) => Ok(S::Success),
            (S::Started, E::Fail) => Ok(S::Failure),
            (S::Started, E::Retry) => Ok(S::Retry),
            (S::Submitted | S::Started | S::Retry, E::Revoke) => Ok(S::Revoked),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub operation: String,
    pub kwargs: serde_json::Value,
    pub status: TaskStatus,
    /// 0..=9, higher runs first.
    pub priority: u8,
    pub group_id: Option<String>,
    pub parent_id: Option<String>,
    pub retries: u32,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Not runnable before this instant.
    pub eta: Option<DateTime<Utc>>,
    /// Refused by workers after this instant.
    pub expires_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Task {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A task about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub operation: String,
    pub kwargs: serde_json::Value,
    pub priority: u8,
    pub group_id: Option<String>,
    pub parent_id: Option<String>,
    pub max_retries: u32,
    pub eta: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A fan-out of sibling tasks submitted together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: String,
    pub operation: String,
    pub args: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
