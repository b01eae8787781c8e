//! End-to-end crawl flows: worker, queue, discovery and periodic selection
//! over a temporary SQLite store and a scripted vendor.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tempfile::TempDir;

use rentgrid::config::Settings;
use rentgrid::context::CrawlContext;
use rentgrid::discovery::{DiscoveryError, ProbeError, DISCOVER_TILE, DISCOVER_TILE_PAGE};
use rentgrid::grid::{BBox, Quadkey};
use rentgrid::models::{ListingResource, NewTile, TaskStatus};
use rentgrid::periodic::{PeriodicArgs, PeriodicOperation, Selected, COLLECT_CALENDAR};
use rentgrid::repository::{migrations, DbPool, Repositories};
use rentgrid::vendor::{ScriptedTransport, TransportError};
use rentgrid::work_queue::{GroupHandle, QueueError, RetryPolicy, TaskHandle, TaskQueue, TaskSpec};

fn qk(s: &str) -> Quadkey {
    Quadkey::parse(s).unwrap()
}

fn search_body(count: usize, total: i64, has_next_page: bool, next_offset: u32) -> String {
    let results: Vec<_> = (0..count)
        .map(|i| json!({ "id": 1000 + next_offset as i64 + i as i64, "lat": 10.0 + i as f64 * 0.01, "lng": 20.0 }))
        .collect();
    json!({
        "results": results,
        "total_count": total,
        "pagination": { "has_next_page": has_next_page, "items_offset": next_offset },
    })
    .to_string()
}

fn offset_of(query: &[(String, String)]) -> u32 {
    query
        .iter()
        .find(|(k, _)| k == "items_offset")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

async fn setup(
    transport: ScriptedTransport,
    configure: impl FnOnce(&mut Settings),
) -> (TempDir, CrawlContext) {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
    migrations::run_migrations(&db_url).await.unwrap();

    let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
    settings.database_url = Some(db_url.clone());
    settings.page_size = 50;
    settings.retry = RetryPolicy {
        max_retries: 2,
        backoff_base: Duration::ZERO,
        backoff_max: Duration::ZERO,
        jitter: false,
    };
    configure(&mut settings);

    let repos = Repositories::new(DbPool::from_url(&db_url).unwrap());
    let ctx = CrawlContext::with_transport(settings, repos, Arc::new(transport));
    (dir, ctx)
}

async fn add_tile(ctx: &CrawlContext, quadkey: &str) {
    ctx.repos
        .grid
        .insert_tile(&NewTile::from_quadkey(&qk(quadkey)))
        .await
        .unwrap();
}

async fn submit_discover(ctx: &CrawlContext, quadkey: &str) -> String {
    ctx.queue
        .submit(TaskSpec::new(DISCOVER_TILE, json!({ "quadkey": quadkey })))
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn tile_that_fits_one_page_is_accepted() {
    let transport = ScriptedTransport::from_fn(|path, _| {
        Ok(ScriptedTransport::response(path, 200, search_body(3, 37, false, 3)))
    });
    let (_dir, ctx) = setup(transport, |_| {}).await;
    add_tile(&ctx, "12").await;
    let id = submit_discover(&ctx, "12").await;

    let (ran, status) = ctx.worker().run_once().await.unwrap().unwrap();
    assert_eq!(ran, id);
    assert_eq!(status, TaskStatus::Success);

    let tile = ctx.repos.grid.get(&qk("12")).await.unwrap().unwrap();
    assert_eq!(tile.estimated_count(), Some(37));
    assert!(tile.count_updated_at.is_some());
    assert!(tile.scanned_at.is_some());
    assert_eq!(ctx.repos.grid.count().await.unwrap(), 1);
    assert_eq!(ctx.repos.listings.count().await.unwrap(), 3);

    let task = ctx.repos.tasks.get(&id).await.unwrap().unwrap();
    assert!(task.result.unwrap().contains("37"));
    assert!(ctx.worker().run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn crowded_tile_is_replaced_by_its_children() {
    let transport = ScriptedTransport::from_fn(|path, _| {
        Ok(ScriptedTransport::response(path, 200, search_body(50, 900, true, 50)))
    });
    let (_dir, ctx) = setup(transport, |_| {}).await;
    add_tile(&ctx, "12").await;
    let parent = submit_discover(&ctx, "12").await;

    let (_, status) = ctx.worker().run_once().await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Success);

    assert!(ctx.repos.grid.get(&qk("12")).await.unwrap().is_none());
    let quadkeys: Vec<String> = ctx
        .repos
        .grid
        .all_quadkeys()
        .await
        .unwrap()
        .iter()
        .map(|q| q.as_str().to_string())
        .collect();
    assert_eq!(quadkeys, vec!["120", "121", "122", "123"]);

    let children = ctx
        .repos
        .tasks
        .list(Some(TaskStatus::Submitted), None, 10)
        .await
        .unwrap();
    assert_eq!(children.len(), 4);
    let group_id = children[0].group_id.clone().unwrap();
    for child in &children {
        assert_eq!(child.operation, DISCOVER_TILE);
        assert_eq!(child.group_id.as_deref(), Some(group_id.as_str()));
        assert_eq!(child.parent_id.as_deref(), Some(parent.as_str()));
        assert!(child.expires_at.is_some());
    }
    let group = ctx.repos.tasks.get_group(&group_id).await.unwrap().unwrap();
    assert_eq!(group.operation, DISCOVER_TILE);
    assert_eq!(group.args, json!({ "quadkey": "12" }));
}

#[tokio::test]
async fn tile_at_depth_cap_paginates_instead_of_splitting() {
    let transport = ScriptedTransport::from_fn(|path, _| {
        Ok(ScriptedTransport::response(path, 200, search_body(50, 120, true, 50)))
    });
    let (_dir, ctx) = setup(transport, |s| s.max_depth = 2).await;
    add_tile(&ctx, "12").await;
    let first = submit_discover(&ctx, "12").await;

    let (_, status) = ctx.worker().run_once().await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Success);
    assert_eq!(ctx.repos.grid.count().await.unwrap(), 1);

    let tile = ctx.repos.grid.get(&qk("12")).await.unwrap().unwrap();
    assert_eq!(tile.estimated_count(), Some(120));
    assert!(tile.scanned_at.is_none());

    let pending = ctx
        .repos
        .tasks
        .list(Some(TaskStatus::Submitted), None, 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    let page = &pending[0];
    assert_eq!(page.operation, DISCOVER_TILE_PAGE);
    assert_eq!(page.parent_id.as_deref(), Some(first.as_str()));
    assert_eq!(page.kwargs["quadkey"], "12");
    assert_eq!(page.kwargs["items_offset"], 50);
    assert_eq!(page.kwargs["page"], 2);
    assert_eq!(page.kwargs["continuation_of"], first.as_str());
}

#[tokio::test]
async fn page_chain_stops_when_results_run_out() {
    let transport = ScriptedTransport::from_fn(|path, query| {
        let offset = offset_of(query);
        let more = offset < 100;
        Ok(ScriptedTransport::response(
            path,
            200,
            search_body(50, 150, more, offset + 50),
        ))
    });
    let (_dir, ctx) = setup(transport.clone(), |s| s.max_depth = 2).await;
    add_tile(&ctx, "12").await;
    submit_discover(&ctx, "12").await;

    let worker = ctx.worker();
    let mut runs = 0;
    while let Some((_, status)) = worker.run_once().await.unwrap() {
        assert_eq!(status, TaskStatus::Success);
        runs += 1;
    }
    assert_eq!(runs, 3);

    let offsets: Vec<u32> = transport.calls().iter().map(|c| offset_of(&c.query)).collect();
    assert_eq!(offsets, vec![0, 50, 100]);

    let tile = ctx.repos.grid.get(&qk("12")).await.unwrap().unwrap();
    assert!(tile.scanned_at.is_some());
    assert_eq!(ctx.repos.listings.count().await.unwrap(), 150);
}

#[tokio::test]
async fn page_chain_is_bounded() {
    let transport = ScriptedTransport::from_fn(|path, query| {
        let offset = offset_of(query);
        Ok(ScriptedTransport::response(
            path,
            200,
            search_body(50, 100_000, true, offset + 50),
        ))
    });
    let (_dir, ctx) = setup(transport.clone(), |s| {
        s.max_depth = 2;
        s.max_pages_per_tile = 3;
    })
    .await;
    add_tile(&ctx, "12").await;
    submit_discover(&ctx, "12").await;

    let worker = ctx.worker();
    let mut last = None;
    while let Some((id, status)) = worker.run_once().await.unwrap() {
        assert_eq!(status, TaskStatus::Success);
        last = Some(id);
    }
    assert_eq!(transport.calls().len(), 3);

    let last = ctx.repos.tasks.get(&last.unwrap()).await.unwrap().unwrap();
    assert!(last.result.unwrap().contains("cut off"));
    let tile = ctx.repos.grid.get(&qk("12")).await.unwrap().unwrap();
    assert!(tile.scanned_at.is_some());
}

#[tokio::test]
async fn stale_selection_skips_recent_and_in_flight_listings() {
    let (_dir, ctx) = setup(ScriptedTransport::always(200, "{}"), |_| {}).await;
    let now = Utc::now();
    for id in 1..=10 {
        ctx.repos.listings.register(id, 38.7, -9.1, 100.0).await.unwrap();
        let age = if id <= 6 {
            ChronoDuration::hours(48 + id)
        } else {
            ChronoDuration::hours(1)
        };
        ctx.repos
            .listings
            .touch(id, ListingResource::Calendar, now - age)
            .await
            .unwrap();
    }
    for busy in [2, 4] {
        ctx.queue
            .submit(TaskSpec::new(COLLECT_CALENDAR, json!({ "listing_id": busy })))
            .await
            .unwrap();
    }

    let args = PeriodicArgs {
        how_many: 100,
        age_hours: 24.0,
        ..Default::default()
    };
    let report = ctx
        .periodic()
        .run(PeriodicOperation::RefreshCalendars, &args, now)
        .await
        .unwrap();

    let mut ids: Vec<i64> = report
        .selected
        .iter()
        .map(|s| match s {
            Selected::Listing(id) => *id,
            Selected::Tile(qk) => panic!("unexpected tile {qk}"),
        })
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3, 5, 6]);
    assert_eq!(report.group.unwrap().task_ids.len(), 4);

    let again = ctx
        .periodic()
        .run(PeriodicOperation::RefreshCalendars, &args, now)
        .await
        .unwrap();
    assert!(again.selected.is_empty());
    assert!(again.group.is_none());
}

#[tokio::test]
async fn missing_pagination_is_a_parse_error() {
    let body = json!({ "results": [], "total_count": 4 }).to_string();
    let (_dir, ctx) = setup(ScriptedTransport::always(200, body), |_| {}).await;
    add_tile(&ctx, "12").await;
    let bbox: BBox = qk("12").bbox();

    let err = ctx.probe().probe(&bbox, 0, None).await.unwrap_err();
    assert!(matches!(err, ProbeError::Parse { .. }));
    assert!(!err.is_retriable());

    let id = submit_discover(&ctx, "12").await;
    let (_, status) = ctx.worker().run_once().await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Failure);

    let task = ctx.repos.tasks.get(&id).await.unwrap().unwrap();
    assert_eq!(task.retries, 0);
    let tile = ctx.repos.grid.get(&qk("12")).await.unwrap().unwrap();
    assert!(tile.count_updated_at.is_none());
    assert!(tile.scanned_at.is_none());
    assert_eq!(ctx.repos.responses.for_task(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn throttled_search_retries_then_gives_up() {
    let (_dir, ctx) = setup(ScriptedTransport::always(429, "slow down"), |_| {}).await;
    add_tile(&ctx, "12").await;
    let id = submit_discover(&ctx, "12").await;
    let worker = ctx.worker();

    let (_, first) = worker.run_once().await.unwrap().unwrap();
    assert_eq!(first, TaskStatus::Retry);
    let (_, second) = worker.run_once().await.unwrap().unwrap();
    assert_eq!(second, TaskStatus::Retry);
    let (_, third) = worker.run_once().await.unwrap().unwrap();
    assert_eq!(third, TaskStatus::Failure);
    assert!(worker.run_once().await.unwrap().is_none());

    let task = ctx.repos.tasks.get(&id).await.unwrap().unwrap();
    assert_eq!(task.retries, 2);
    assert!(task.error.unwrap().starts_with("gave up after 2 retries"));

    let archived = ctx.repos.responses.for_task(&id).await.unwrap();
    assert_eq!(archived.len(), 3);
    assert!(archived.iter().all(|r| r.status_code == 429));
    assert!(ctx.repos.grid.has_tile(&qk("12")).await.unwrap());
}

#[tokio::test]
async fn transport_failure_is_archived_and_retried() {
    let transport = ScriptedTransport::from_fn(|path, _| {
        Err(TransportError::Timeout {
            url: format!("scripted://vendor{path}"),
        })
    });
    let (_dir, ctx) = setup(transport, |_| {}).await;
    add_tile(&ctx, "12").await;
    let id = submit_discover(&ctx, "12").await;

    let (_, status) = ctx.worker().run_once().await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Retry);
    let archived = ctx.repos.responses.for_task(&id).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].status_code, 0);
}

#[tokio::test]
async fn tile_split_by_another_worker_mid_search_is_not_found() {
    let db_file: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));
    let slot = db_file.clone();
    let transport = ScriptedTransport::from_fn(move |path, _| {
        // Another worker wins the race and removes the tile while we wait on the vendor.
        if let Some(file) = slot.lock().unwrap().clone() {
            let conn = rusqlite::Connection::open(file).unwrap();
            conn.execute("DELETE FROM grid_tiles WHERE quadkey = '12'", ())
                .unwrap();
        }
        Ok(ScriptedTransport::response(path, 200, search_body(50, 900, true, 50)))
    });
    let (dir, ctx) = setup(transport, |_| {}).await;
    add_tile(&ctx, "12").await;
    *db_file.lock().unwrap() = Some(dir.path().join("test.db"));

    let err = ctx
        .discovery()
        .process(&qk("12"), Some("task-1"), 5)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::TileNotFound(ref q) if q.as_str() == "12"));
    assert!(!err.is_retriable());

    assert_eq!(ctx.repos.grid.count().await.unwrap(), 0);
    assert!(ctx.repos.tasks.list(None, None, 10).await.unwrap().is_empty());
    assert_eq!(ctx.repos.responses.for_task("task-1").await.unwrap().len(), 1);
}

/// Accepts single tasks but refuses every group.
struct GroupRefusingQueue(Arc<dyn TaskQueue>);

#[async_trait::async_trait]
impl TaskQueue for GroupRefusingQueue {
    async fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, QueueError> {
        self.0.submit(spec).await
    }

    async fn group(
        &self,
        operation: &str,
        _args: serde_json::Value,
        _specs: Vec<TaskSpec>,
    ) -> Result<GroupHandle, QueueError> {
        Err(QueueError::UnknownOperation(operation.to_string()))
    }
}

#[tokio::test]
async fn children_left_unqueued_are_recovered_by_the_stale_scan() {
    let transport = ScriptedTransport::from_fn(|path, _| {
        Ok(ScriptedTransport::response(path, 200, search_body(50, 900, true, 50)))
    });
    let (_dir, mut ctx) = setup(transport, |_| {}).await;
    add_tile(&ctx, "12").await;
    let real_queue = ctx.queue.clone();
    ctx.queue = Arc::new(GroupRefusingQueue(real_queue.clone()));

    let err = ctx
        .discovery()
        .process(&qk("12"), None, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Queue(_)));

    // The split itself is committed even though no child task exists.
    assert!(ctx.repos.grid.get(&qk("12")).await.unwrap().is_none());
    assert_eq!(ctx.repos.grid.count().await.unwrap(), 4);
    assert!(ctx.repos.tasks.list(None, None, 10).await.unwrap().is_empty());

    ctx.queue = real_queue;
    let report = ctx
        .periodic()
        .run(PeriodicOperation::ScanStaleTiles, &PeriodicArgs::default(), Utc::now())
        .await
        .unwrap();
    let mut quadkeys: Vec<String> = report
        .selected
        .iter()
        .map(|s| match s {
            Selected::Tile(qk) => qk.as_str().to_string(),
            Selected::Listing(id) => panic!("unexpected listing {id}"),
        })
        .collect();
    quadkeys.sort();
    assert_eq!(quadkeys, vec!["120", "121", "122", "123"]);
    assert_eq!(report.group.unwrap().task_ids.len(), 4);
}
