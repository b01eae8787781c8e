//! Operation handlers and their retry policies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Everything a handler gets to know about the task it runs.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub task_id: String,
    pub operation: String,
    pub kwargs: serde_json::Value,
    pub priority: u8,
    /// Retries already spent.
    pub retries: u32,
}

impl TaskInvocation {
    /// String argument from kwargs.
    pub fn str_arg(&self, name: &str) -> Result<&str, TaskFailure> {
        self.kwargs
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskFailure::Permanent(format!("missing string argument '{name}'")))
    }

    /// Integer argument from kwargs. Numeric strings are accepted.
    pub fn i64_arg(&self, name: &str) -> Result<i64, TaskFailure> {
        let value = self.kwargs.get(name);
        value
            .and_then(|v| v.as_i64())
            .or_else(|| value.and_then(|v| v.as_str()).and_then(|s| s.parse().ok()))
            .ok_or_else(|| TaskFailure::Permanent(format!("missing integer argument '{name}'")))
    }
}

/// A finished task, with an optional note stored as its result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    pub note: Option<String>,
}

impl TaskOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
        }
    }
}

/// Why a task did not finish.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskFailure {
    /// Worth another attempt after a backoff.
    #[error("{0}")]
    Retriable(String),
    #[error("{0}")]
    Permanent(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, invocation: TaskInvocation) -> Result<TaskOutcome, TaskFailure>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutcome, TaskFailure>> + Send,
{
    async fn run(&self, invocation: TaskInvocation) -> Result<TaskOutcome, TaskFailure> {
        (self.0)(invocation).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutcome, TaskFailure>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Exponential backoff for retriable failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Full jitter: pick uniformly in `0..=delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(900),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay before retry number `retries + 1`.
    pub fn ceiling(&self, retries: u32) -> Duration {
        let factor = 2u32.saturating_pow(retries.min(31));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    pub fn delay(&self, retries: u32) -> Duration {
        let ceiling = self.ceiling(retries);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = ceiling.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }
}

struct Registration {
    handler: Arc<dyn TaskHandler>,
    policy: RetryPolicy,
}

/// Maps operation names to handlers.
pub struct OperationRegistry {
    operations: HashMap<String, Registration>,
    default_policy: RetryPolicy,
}

impl OperationRegistry {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self {
            operations: HashMap::new(),
            default_policy,
        }
    }

    /// Register with the default retry policy.
    pub fn register(&mut self, operation: &str, handler: Arc<dyn TaskHandler>) -> &mut Self {
        let policy = self.default_policy.clone();
        self.register_with_policy(operation, handler, policy)
    }

    pub fn register_with_policy(
        &mut self,
        operation: &str,
        handler: Arc<dyn TaskHandler>,
        policy: RetryPolicy,
    ) -> &mut Self {
        self.operations
            .insert(operation.to_string(), Registration { handler, policy });
        self
    }

    pub fn handler(&self, operation: &str) -> Option<Arc<dyn TaskHandler>> {
        self.operations.get(operation).map(|r| r.handler.clone())
    }

    pub fn policy(&self, operation: &str) -> &RetryPolicy {
        self.operations
            .get(operation)
            .map(|r| &r.policy)
            .unwrap_or(&self.default_policy)
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(policy.delay(0), Duration::from_secs(30));
        assert_eq!(policy.delay(1), Duration::from_secs(60));
        assert_eq!(policy.delay(4), Duration::from_secs(480));
        assert_eq!(policy.delay(5), Duration::from_secs(900));
        assert_eq!(policy.delay(40), Duration::from_secs(900));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_under_ceiling(retries in 0u32..64) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.delay(retries) <= policy.ceiling(retries));
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut registry = OperationRegistry::new(RetryPolicy::default());
        registry.register(
            "echo",
            handler_fn(|inv: TaskInvocation| async move {
                Ok::<_, TaskFailure>(TaskOutcome::with_note(inv.str_arg("text")?.to_string()))
            }),
        );

        let handler = registry.handler("echo").unwrap();
        let outcome = handler
            .run(TaskInvocation {
                task_id: "t".into(),
                operation: "echo".into(),
                kwargs: serde_json::json!({"text": "hi"}),
                priority: 0,
                retries: 0,
            })
            .await
            .unwrap();
        assert_eq!(outcome.note.as_deref(), Some("hi"));
        assert!(registry.handler("missing").is_none());
        assert_eq!(registry.policy("missing").max_retries, 2);
        assert_eq!(registry.operations(), vec!["echo"]);
    }

    #[test]
    fn integer_arguments_accept_strings() {
        let inv = TaskInvocation {
            task_id: "t".into(),
            operation: "op".into(),
            kwargs: serde_json::json!({"a": 5, "b": "6", "c": "x"}),
            priority: 0,
            retries: 0,
        };
        assert_eq!(inv.i64_arg("a").unwrap(), 5);
        assert_eq!(inv.i64_arg("b").unwrap(), 6);
        assert!(matches!(inv.i64_arg("c"), Err(TaskFailure::Permanent(_))));
    }
}
