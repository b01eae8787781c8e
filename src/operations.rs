//! Crawl operations as queue handlers.

use std::fmt::Display;

use chrono::Utc;

use crate::context::CrawlContext;
use crate::discovery::{DiscoveryError, PageCursor, DISCOVER_TILE, DISCOVER_TILE_PAGE};
use crate::grid::Quadkey;
use crate::periodic::{PeriodicArgs, PeriodicOperation, SelectionError};
use crate::refresh::RefreshError;
use crate::work_queue::{handler_fn, OperationRegistry, TaskFailure, TaskInvocation, TaskOutcome};

pub const COLLECT_USER_DETAIL: &str = "collect_user_detail";

fn failure(retriable: bool, error: impl Display) -> TaskFailure {
    if retriable {
        TaskFailure::Retriable(error.to_string())
    } else {
        TaskFailure::Permanent(error.to_string())
    }
}

impl From<DiscoveryError> for TaskFailure {
    fn from(e: DiscoveryError) -> Self {
        failure(e.is_retriable(), e)
    }
}

impl From<RefreshError> for TaskFailure {
    fn from(e: RefreshError) -> Self {
        failure(e.is_retriable(), e)
    }
}

impl From<SelectionError> for TaskFailure {
    fn from(e: SelectionError) -> Self {
        let retriable = !matches!(e, SelectionError::Invalid(_));
        failure(retriable, e)
    }
}

fn quadkey_arg(invocation: &TaskInvocation) -> Result<Quadkey, TaskFailure> {
    let raw = invocation.str_arg("quadkey")?;
    Quadkey::parse(raw).map_err(|e| TaskFailure::Permanent(e.to_string()))
}

fn u32_arg(invocation: &TaskInvocation, name: &str) -> Result<u32, TaskFailure> {
    let value = invocation.i64_arg(name)?;
    u32::try_from(value)
        .map_err(|_| TaskFailure::Permanent(format!("argument '{name}' out of range: {value}")))
}

/// Registry with every crawl operation, using the configured retry policy.
pub fn registry(ctx: &CrawlContext) -> OperationRegistry {
    let mut registry = OperationRegistry::new(ctx.settings.retry.clone());

    let discovery = ctx.discovery();
    registry.register(
        DISCOVER_TILE,
        handler_fn(move |inv: TaskInvocation| {
            let discovery = discovery.clone();
            async move {
                let quadkey = quadkey_arg(&inv)?;
                let report = discovery
                    .process(&quadkey, Some(inv.task_id.as_str()), inv.priority)
                    .await?;
                Ok::<_, TaskFailure>(TaskOutcome::with_note(report.to_string()))
            }
        }),
    );

    let discovery = ctx.discovery();
    registry.register(
        DISCOVER_TILE_PAGE,
        handler_fn(move |inv: TaskInvocation| {
            let discovery = discovery.clone();
            async move {
                let quadkey = quadkey_arg(&inv)?;
                let cursor = PageCursor {
                    items_offset: u32_arg(&inv, "items_offset")?,
                    page: u32_arg(&inv, "page").unwrap_or(2),
                };
                let report = discovery
                    .follow_page(&quadkey, cursor, Some(inv.task_id.as_str()), inv.priority)
                    .await?;
                Ok::<_, TaskFailure>(TaskOutcome::with_note(report.to_string()))
            }
        }),
    );

    for operation in PeriodicOperation::ALL {
        let periodic = ctx.periodic();
        registry.register(
            operation.as_str(),
            handler_fn(move |inv: TaskInvocation| {
                let periodic = periodic.clone();
                async move {
                    let args = PeriodicArgs::from_kwargs(&inv.kwargs)?;
                    let report = periodic.run(operation, &args, Utc::now()).await?;
                    Ok::<_, TaskFailure>(TaskOutcome::with_note(format!(
                        "selected {}",
                        report.selected.len()
                    )))
                }
            }),
        );

        let Some(resource) = operation.resource() else {
            continue;
        };
        let refresher = ctx.refresher();
        registry.register(
            operation.child_operation(),
            handler_fn(move |inv: TaskInvocation| {
                let refresher = refresher.clone();
                async move {
                    let listing_id = inv.i64_arg("listing_id")?;
                    let outcome = refresher
                        .refresh(listing_id, resource, Some(inv.task_id.as_str()))
                        .await?;
                    Ok::<_, TaskFailure>(TaskOutcome::with_note(outcome.note()))
                }
            }),
        );
    }

    let refresher = ctx.refresher();
    registry.register(
        COLLECT_USER_DETAIL,
        handler_fn(move |inv: TaskInvocation| {
            let refresher = refresher.clone();
            async move {
                let user_id = inv.i64_arg("user_id")?;
                let response_id = refresher.collect_user(user_id, Some(inv.task_id.as_str())).await?;
                Ok::<_, TaskFailure>(TaskOutcome::with_note(format!("response {response_id}")))
            }
        }),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::repository::{migrations, DbPool, Repositories};
    use crate::vendor::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn context() -> (tempfile::TempDir, CrawlContext) {
        let dir = tempdir().unwrap();
        let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
        migrations::run_migrations(&db_url).await.unwrap();
        let repos = Repositories::new(DbPool::from_url(&db_url).unwrap());
        let settings = Settings::with_data_dir(dir.path().to_path_buf());
        let ctx = CrawlContext::with_transport(
            settings,
            repos,
            Arc::new(ScriptedTransport::always(500, "")),
        );
        (dir, ctx)
    }

    fn invocation(operation: &str, kwargs: serde_json::Value) -> TaskInvocation {
        TaskInvocation {
            task_id: "t-1".into(),
            operation: operation.into(),
            kwargs,
            priority: 0,
            retries: 0,
        }
    }

    #[tokio::test]
    async fn registers_every_crawl_operation() {
        let (_dir, ctx) = context().await;
        let registry = registry(&ctx);
        for op in [
            "discover_tile",
            "discover_tile_page",
            "scan_stale_tiles",
            "refresh_calendars",
            "refresh_reviews",
            "refresh_listing_details",
            "refresh_booking_quotes",
            "collect_calendar",
            "collect_reviews",
            "collect_listing_details",
            "collect_booking_quote",
            "collect_user_detail",
        ] {
            assert!(registry.contains(op), "{op} missing");
        }
    }

    #[tokio::test]
    async fn malformed_arguments_fail_permanently() {
        let (_dir, ctx) = context().await;
        let registry = registry(&ctx);

        let handler = registry.handler("discover_tile").unwrap();
        let err = handler
            .run(invocation("discover_tile", json!({"quadkey": "1249"})))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskFailure::Permanent(_)));

        let handler = registry.handler("refresh_calendars").unwrap();
        let err = handler
            .run(invocation("refresh_calendars", json!({"priority": 12})))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskFailure::Permanent(_)));
    }

    #[tokio::test]
    async fn missing_tile_is_a_permanent_failure() {
        let (_dir, ctx) = context().await;
        let handler = registry(&ctx).handler("discover_tile").unwrap();
        let err = handler
            .run(invocation("discover_tile", json!({"quadkey": "0123"})))
            .await
            .unwrap_err();
        assert_eq!(err, TaskFailure::Permanent("tile 0123 not found".into()));
    }
}
