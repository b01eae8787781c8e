//! Task queue error types.

use thiserror::Error;

use crate::models::InvalidTransition;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("priority {0} is outside 0..=9")]
    InvalidPriority(u8),
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}
