//! Applies subdivision decisions to the stored grid and submits follow-up work.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use super::probe::{ProbeError, SearchProbe};
use super::protocol::{decide, Outcome};
use crate::grid::Quadkey;
use crate::repository::{DbError, GridRepository};
use crate::work_queue::{end_of_day, QueueError, TaskQueue, TaskSpec};

/// Operation that probes a tile and decides its fate.
pub const DISCOVER_TILE: &str = "discover_tile";
/// Operation that walks the pages of a tile at the depth cap.
pub const DISCOVER_TILE_PAGE: &str = "discover_tile_page";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("tile {0} not found")]
    TileNotFound(Quadkey),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("failed to submit follow-up work: {0}")]
    Queue(#[from] QueueError),
}

impl DiscoveryError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::TileNotFound(_) => false,
            Self::Probe(e) => e.is_retriable(),
            Self::Database(_) => true,
            Self::Queue(e) => matches!(e, QueueError::Database(_)),
        }
    }
}

/// What one discovery step did.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryReport {
    Accepted {
        quadkey: Quadkey,
        estimated_count: Option<i64>,
    },
    Subdivided {
        quadkey: Quadkey,
        children: [Quadkey; 4],
        group_id: String,
    },
    /// A page task was submitted for the next page.
    Paginating {
        quadkey: Quadkey,
        items_offset: u32,
        page: u32,
        task_id: String,
    },
    /// The last page of a paginated tile was fetched.
    PaginationFinished {
        quadkey: Quadkey,
        pages: u32,
        truncated: bool,
    },
}

impl fmt::Display for DiscoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted {
                quadkey,
                estimated_count,
            } => match estimated_count {
                Some(count) => write!(f, "accepted {quadkey} with {count} listings"),
                None => write!(f, "accepted {quadkey}"),
            },
            Self::Subdivided {
                quadkey, group_id, ..
            } => write!(f, "subdivided {quadkey} (group {group_id})"),
            Self::Paginating {
                quadkey,
                items_offset,
                page,
                ..
            } => write!(f, "paginating {quadkey}: page {page} at offset {items_offset}"),
            Self::PaginationFinished {
                quadkey,
                pages,
                truncated,
            } => {
                write!(f, "paginated {quadkey} over {pages} pages")?;
                if *truncated {
                    f.write_str(" (cut off)")?;
                }
                Ok(())
            }
        }
    }
}

/// Where a page task sits in its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub items_offset: u32,
    /// 1-based; the initial probe is page 1.
    pub page: u32,
}

#[derive(Clone)]
pub struct DiscoveryService {
    grid: GridRepository,
    probe: SearchProbe,
    queue: Arc<dyn TaskQueue>,
    max_depth: u8,
    max_pages_per_tile: u32,
}

impl DiscoveryService {
    pub fn new(
        grid: GridRepository,
        probe: SearchProbe,
        queue: Arc<dyn TaskQueue>,
        max_depth: u8,
        max_pages_per_tile: u32,
    ) -> Self {
        Self {
            grid,
            probe,
            queue,
            max_depth,
            max_pages_per_tile,
        }
    }

    /// Probe a tile and accept, subdivide or start paginating it.
    ///
    /// A probe failure leaves the tile untouched.
    pub async fn process(
        &self,
        quadkey: &Quadkey,
        task_id: Option<&str>,
        priority: u8,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let tile = self
            .grid
            .get(quadkey)
            .await?
            .ok_or_else(|| DiscoveryError::TileNotFound(quadkey.clone()))?;

        let probe = self.probe.probe(&tile.bbox, 0, task_id).await?;
        let now = Utc::now();

        match decide(quadkey, &probe.summary(), self.max_depth) {
            Outcome::Accepted { estimated_count } => {
                self.grid.record_estimate(quadkey, estimated_count, now).await?;
                self.grid.mark_scanned(quadkey, now).await?;
                tracing::info!("Accepted tile {} ({:?} listings)", quadkey, estimated_count);
                Ok(DiscoveryReport::Accepted {
                    quadkey: quadkey.clone(),
                    estimated_count,
                })
            }
            Outcome::ContinuePagination {
                items_offset,
                estimated_count,
            } => {
                self.grid.record_estimate(quadkey, estimated_count, now).await?;
                tracing::info!(
                    "Tile {} is at depth cap {} with {:?} listings, paginating",
                    quadkey,
                    self.max_depth,
                    estimated_count
                );
                self.continue_or_finish(quadkey, PageCursor { items_offset, page: 2 }, task_id, priority)
                    .await
            }
            Outcome::SubdivideInto(_) => {
                let children = match self.grid.replace_with_children(quadkey).await {
                    Ok(children) => children,
                    Err(DbError::NotFound) => {
                        tracing::info!("Tile {} was subdivided by another worker", quadkey);
                        return Err(DiscoveryError::TileNotFound(quadkey.clone()));
                    }
                    Err(e) => return Err(e.into()),
                };
                let expires = end_of_day(now);
                let specs = children
                    .iter()
                    .map(|child| {
                        TaskSpec::new(DISCOVER_TILE, json!({ "quadkey": child.as_str() }))
                            .with_priority(priority)
                            .with_parent(task_id)
                            .expires_at(expires)
                    })
                    .collect();
                let group = match self
                    .queue
                    .group(DISCOVER_TILE, json!({ "quadkey": quadkey.as_str() }), specs)
                    .await
                {
                    Ok(group) => group,
                    Err(e) => {
                        // Children are already stored; the stale-tile scan re-queues them.
                        tracing::warn!(
                            "Children of tile {} are stored but were not queued ({}); \
                             scan_stale_tiles will pick them up",
                            quadkey,
                            e
                        );
                        return Err(e.into());
                    }
                };
                tracing::info!(
                    "Subdivided tile {} ({:?} listings) into {} children",
                    quadkey,
                    probe.total_count,
                    children.len()
                );
                Ok(DiscoveryReport::Subdivided {
                    quadkey: quadkey.clone(),
                    children,
                    group_id: group.id,
                })
            }
        }
    }

    /// Fetch one page of a tile at the depth cap and chain the next page if there is one.
    pub async fn follow_page(
        &self,
        quadkey: &Quadkey,
        cursor: PageCursor,
        task_id: Option<&str>,
        priority: u8,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let tile = self
            .grid
            .get(quadkey)
            .await?
            .ok_or_else(|| DiscoveryError::TileNotFound(quadkey.clone()))?;

        let probe = self.probe.probe(&tile.bbox, cursor.items_offset, task_id).await?;
        if probe.total_count.is_some() {
            self.grid
                .record_estimate(quadkey, probe.total_count, Utc::now())
                .await?;
        }

        if !probe.has_next_page {
            self.grid.mark_scanned(quadkey, Utc::now()).await?;
            tracing::info!("Finished paginating tile {} after {} pages", quadkey, cursor.page);
            return Ok(DiscoveryReport::PaginationFinished {
                quadkey: quadkey.clone(),
                pages: cursor.page,
                truncated: false,
            });
        }

        let next = PageCursor {
            items_offset: probe.next_offset,
            page: cursor.page + 1,
        };
        self.continue_or_finish(quadkey, next, task_id, priority).await
    }

    /// Submit the page task for `next`, or stop when the chain hit its bound.
    async fn continue_or_finish(
        &self,
        quadkey: &Quadkey,
        next: PageCursor,
        task_id: Option<&str>,
        priority: u8,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        if next.page > self.max_pages_per_tile {
            tracing::warn!(
                "Tile {} still reports more results after {} pages; stopping",
                quadkey,
                self.max_pages_per_tile
            );
            self.grid.mark_scanned(quadkey, Utc::now()).await?;
            return Ok(DiscoveryReport::PaginationFinished {
                quadkey: quadkey.clone(),
                pages: next.page - 1,
                truncated: true,
            });
        }

        let spec = TaskSpec::new(
            DISCOVER_TILE_PAGE,
            json!({
                "quadkey": quadkey.as_str(),
                "items_offset": next.items_offset,
                "page": next.page,
                "continuation_of": task_id,
            }),
        )
        .with_priority(priority)
        .with_parent(task_id)
        .expires_at(end_of_day(Utc::now()));
        let handle = self.queue.submit(spec).await?;

        Ok(DiscoveryReport::Paginating {
            quadkey: quadkey.clone(),
            items_offset: next.items_offset,
            page: next.page,
            task_id: handle.id,
        })
    }
}
