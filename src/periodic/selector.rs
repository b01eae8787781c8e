use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use super::{PeriodicArgs, PeriodicOperation, SelectionError};
use crate::grid::Quadkey;
use crate::models::Aoi;
use crate::repository::{AoiRepository, GridRepository, ListingRepository, Repositories, TaskRepository};
use crate::work_queue::{end_of_day, GroupHandle, TaskQueue, TaskSpec};

/// Rows fetched per round trip while filtering.
const CHUNK: i64 = 500;
/// Unfinished tasks older than this no longer block reselection.
const IN_FLIGHT_WINDOW_HOURS: i64 = 24;

/// An entity picked for refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum Selected {
    Tile(Quadkey),
    Listing(i64),
}

impl Selected {
    /// The entity's value under its operation's entity key.
    pub fn key(&self) -> String {
        match self {
            Self::Tile(quadkey) => quadkey.as_str().to_string(),
            Self::Listing(id) => id.to_string(),
        }
    }

    fn kwargs(&self) -> serde_json::Value {
        match self {
            Self::Tile(quadkey) => json!({ "quadkey": quadkey.as_str() }),
            Self::Listing(id) => json!({ "listing_id": id }),
        }
    }
}

/// What one periodic run submitted.
#[derive(Debug, Clone)]
pub struct PeriodicReport {
    pub operation: PeriodicOperation,
    pub selected: Vec<Selected>,
    /// `None` when nothing was selected.
    pub group: Option<GroupHandle>,
}

/// Entity key as it appears in stored kwargs; ids may be numbers or strings.
fn kwarg_key(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Clone)]
pub struct PeriodicSelector {
    grid: GridRepository,
    listings: ListingRepository,
    tasks: TaskRepository,
    aois: AoiRepository,
    queue: Arc<dyn TaskQueue>,
}

impl PeriodicSelector {
    pub fn new(repos: &Repositories, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            grid: repos.grid.clone(),
            listings: repos.listings.clone(),
            tasks: repos.tasks.clone(),
            aois: repos.aois.clone(),
            queue,
        }
    }

    /// Select stale entities for `operation` and fan out one task per entity.
    pub async fn run(
        &self,
        operation: PeriodicOperation,
        args: &PeriodicArgs,
        now: DateTime<Utc>,
    ) -> Result<PeriodicReport, SelectionError> {
        args.validate()?;
        let selected = self.select(operation, args, now).await?;
        if selected.is_empty() {
            tracing::info!("{}: nothing to refresh", operation);
            return Ok(PeriodicReport {
                operation,
                selected,
                group: None,
            });
        }

        let priority = args.queue_priority();
        let expires = end_of_day(now);
        let specs = selected
            .iter()
            .map(|entity| {
                let spec = TaskSpec::new(operation.child_operation(), entity.kwargs())
                    .with_priority(priority);
                match entity {
                    Selected::Tile(_) => spec.expires_at(expires),
                    Selected::Listing(_) => spec,
                }
            })
            .collect();
        let args_json = serde_json::to_value(args)
            .map_err(|e| SelectionError::Invalid(e.to_string()))?;
        let group = self.queue.group(operation.as_str(), args_json, specs).await?;

        tracing::info!(
            "{}: submitted {} {} tasks as group {}",
            operation,
            selected.len(),
            operation.child_operation(),
            group.id
        );
        Ok(PeriodicReport {
            operation,
            selected,
            group: Some(group),
        })
    }

    /// Stale entities for `operation`, oldest first, at most `how_many`.
    pub async fn select(
        &self,
        operation: PeriodicOperation,
        args: &PeriodicArgs,
        now: DateTime<Utc>,
    ) -> Result<Vec<Selected>, SelectionError> {
        args.validate()?;
        let limit = args.how_many as usize;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let aois = if args.use_aoi {
            let aois = self.aois.with_flag(operation.aoi_flag()).await?;
            if aois.is_empty() {
                tracing::debug!(
                    "{}: no AOI enables {}",
                    operation,
                    operation.aoi_flag().as_str()
                );
                return Ok(Vec::new());
            }
            Some(aois)
        } else {
            None
        };

        let busy = self.in_flight(operation, now).await?;
        let cutoff = args.cutoff(now)?;
        let mut selected = Vec::new();
        let mut offset = 0;

        loop {
            let (batch, fetched) = match operation.resource() {
                None => {
                    let tiles = self.grid.select_stale(cutoff, offset, CHUNK).await?;
                    let fetched = tiles.len();
                    let batch = tiles
                        .into_iter()
                        .filter(|tile| within(&aois, |aoi| aoi.intersects_bbox(&tile.bbox)))
                        .map(|tile| Selected::Tile(tile.quadkey))
                        .collect::<Vec<_>>();
                    (batch, fetched)
                }
                Some(resource) => {
                    let listings = self
                        .listings
                        .select_stale(resource, cutoff, offset, CHUNK)
                        .await?;
                    let fetched = listings.len();
                    let batch = listings
                        .into_iter()
                        .filter(|l| within(&aois, |aoi| aoi.contains_point(l.lat, l.lng)))
                        .map(|l| Selected::Listing(l.id))
                        .collect::<Vec<_>>();
                    (batch, fetched)
                }
            };

            for entity in batch {
                if busy.contains(&entity.key()) {
                    continue;
                }
                selected.push(entity);
                if selected.len() == limit {
                    return Ok(selected);
                }
            }
            if (fetched as i64) < CHUNK {
                return Ok(selected);
            }
            offset += CHUNK;
        }
    }

    /// Keys of entities with unfinished work submitted recently.
    async fn in_flight(
        &self,
        operation: PeriodicOperation,
        now: DateTime<Utc>,
    ) -> Result<HashSet<String>, SelectionError> {
        let since = now - Duration::hours(IN_FLIGHT_WINDOW_HOURS);
        let kwargs = self
            .tasks
            .in_flight_kwargs(&operation.in_flight_operations(), since)
            .await?;
        Ok(kwargs
            .iter()
            .filter_map(|k| k.get(operation.entity_key()).and_then(kwarg_key))
            .collect())
    }
}

fn within(aois: &Option<Vec<Aoi>>, test: impl Fn(&Aoi) -> bool) -> bool {
    match aois {
        Some(aois) => aois.iter().any(test),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BBox;
    use crate::models::{AoiFlags, ListingResource, NewAoi, NewTile, TaskStatus};
    use crate::repository::{migrations, DbPool};
    use crate::work_queue::DbTaskQueue;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, Repositories, PeriodicSelector) {
        let dir = tempdir().unwrap();
        let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
        migrations::run_migrations(&db_url).await.unwrap();
        let repos = Repositories::new(DbPool::from_url(&db_url).unwrap());
        let queue = Arc::new(DbTaskQueue::new(repos.tasks.clone(), 2));
        let selector = PeriodicSelector::new(&repos, queue);
        (dir, repos, selector)
    }

    fn qk(s: &str) -> Quadkey {
        Quadkey::parse(s).unwrap()
    }

    async fn add_tiles(repos: &Repositories, quadkeys: &[&str]) {
        for q in quadkeys {
            repos.grid.insert_tile(&NewTile::from_quadkey(&qk(q))).await.unwrap();
        }
    }

    fn args(how_many: i64) -> PeriodicArgs {
        PeriodicArgs {
            how_many,
            ..PeriodicArgs::default()
        }
    }

    #[tokio::test]
    async fn tiles_are_selected_oldest_first_and_truncated() {
        let (_dir, repos, selector) = setup().await;
        add_tiles(&repos, &["0", "1", "2", "3"]).await;
        let now = Utc::now();
        repos.grid.mark_scanned(&qk("0"), now - Duration::days(3)).await.unwrap();
        repos.grid.mark_scanned(&qk("1"), now - Duration::days(2)).await.unwrap();
        repos.grid.mark_scanned(&qk("2"), now - Duration::hours(1)).await.unwrap();

        let selected = selector
            .select(PeriodicOperation::ScanStaleTiles, &args(2), now)
            .await
            .unwrap();
        assert_eq!(
            selected,
            vec![Selected::Tile(qk("3")), Selected::Tile(qk("0"))]
        );
    }

    #[tokio::test]
    async fn run_fans_out_a_group_and_then_skips_in_flight_tiles() {
        let (_dir, repos, selector) = setup().await;
        add_tiles(&repos, &["0", "3"]).await;
        let now = Utc::now();

        let report = selector
            .run(PeriodicOperation::ScanStaleTiles, &args(10), now)
            .await
            .unwrap();
        let group = report.group.unwrap();
        assert_eq!(group.task_ids.len(), 2);

        let stored = repos.tasks.get_group(&group.id).await.unwrap().unwrap();
        assert_eq!(stored.operation, "scan_stale_tiles");
        assert_eq!(stored.args["how_many"], 10);
        let tasks = repos.tasks.list(Some(TaskStatus::Submitted), Some(&group.id), 10).await.unwrap();
        assert!(tasks.iter().all(|t| t.operation == "discover_tile" && t.expires_at.is_some()));

        let again = selector
            .run(PeriodicOperation::ScanStaleTiles, &args(10), now)
            .await
            .unwrap();
        assert!(again.selected.is_empty());
        assert!(again.group.is_none());
    }

    #[tokio::test]
    async fn aoi_filter_uses_the_matching_flag() {
        let (_dir, repos, selector) = setup().await;
        add_tiles(&repos, &["0", "3"]).await;
        repos.listings.register(1, 38.75, -9.15, 100.0).await.unwrap();
        repos.listings.register(2, -33.9, 151.2, 100.0).await.unwrap();

        let lisbon = BBox::new(-9.2, 38.7, -9.1, 38.8).unwrap();
        let mut flags = AoiFlags::default();
        flags.collect_reviews = false;
        repos.aois.insert(&NewAoi::from_bbox("lisbon", &lisbon, flags).unwrap()).await.unwrap();

        let with_aoi = PeriodicArgs {
            use_aoi: true,
            ..args(10)
        };
        let now = Utc::now();

        let tiles = selector
            .select(PeriodicOperation::ScanStaleTiles, &with_aoi, now)
            .await
            .unwrap();
        assert_eq!(tiles, vec![Selected::Tile(qk("0"))]);

        let calendars = selector
            .select(PeriodicOperation::RefreshCalendars, &with_aoi, now)
            .await
            .unwrap();
        assert_eq!(calendars, vec![Selected::Listing(1)]);

        let reviews = selector
            .select(PeriodicOperation::RefreshReviews, &with_aoi, now)
            .await
            .unwrap();
        assert!(reviews.is_empty());

        let everywhere = selector
            .select(PeriodicOperation::RefreshReviews, &args(10), now)
            .await
            .unwrap();
        assert_eq!(everywhere.len(), 2);
    }

    #[tokio::test]
    async fn recently_refreshed_listings_are_left_alone() {
        let (_dir, repos, selector) = setup().await;
        let now = Utc::now();
        for id in 1..=3 {
            repos.listings.register(id, 10.0, 10.0, 100.0).await.unwrap();
        }
        repos.listings.touch(1, ListingResource::BookingQuote, now - Duration::hours(2)).await.unwrap();
        repos.listings.touch(2, ListingResource::BookingQuote, now - Duration::hours(30)).await.unwrap();

        let selected = selector
            .select(PeriodicOperation::RefreshBookingQuotes, &args(10), now)
            .await
            .unwrap();
        assert_eq!(selected, vec![Selected::Listing(3), Selected::Listing(2)]);
    }

    #[tokio::test]
    async fn invalid_arguments_submit_nothing() {
        let (_dir, repos, selector) = setup().await;
        add_tiles(&repos, &["0"]).await;
        let err = selector
            .run(PeriodicOperation::ScanStaleTiles, &args(-1), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SelectionError::Invalid(_)));
        assert!(repos.tasks.list(None, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn huge_age_is_rejected_instead_of_overflowing() {
        let (_dir, repos, selector) = setup().await;
        repos.listings.register(1, 10.0, 10.0, 100.0).await.unwrap();
        let ancient = PeriodicArgs {
            age_hours: 1e10,
            ..args(10)
        };

        let err = selector
            .select(PeriodicOperation::RefreshCalendars, &ancient, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SelectionError::Invalid(_)));
        assert!(repos.tasks.list(None, None, 10).await.unwrap().is_empty());
    }

    #[test]
    fn numeric_and_string_keys_match() {
        assert_eq!(kwarg_key(&json!(42)).as_deref(), Some("42"));
        assert_eq!(kwarg_key(&json!("42")).as_deref(), Some("42"));
        assert_eq!(kwarg_key(&json!(null)), None);
    }
}
