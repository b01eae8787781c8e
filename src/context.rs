//! Process-wide crawl context: settings, repositories, the vendor API and the queue.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigError, Settings};
use crate::discovery::{DiscoveryService, SearchProbe};
use crate::periodic::PeriodicSelector;
use crate::refresh::ListingRefresher;
use crate::repository::{DbError, Repositories};
use crate::vendor::{Transport, VendorApi, VendorClient};
use crate::work_queue::{DbTaskQueue, OperationRegistry, Scheduler, TaskQueue, Worker};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

/// Everything a unit of work needs, built once per process.
#[derive(Clone)]
pub struct CrawlContext {
    pub settings: Settings,
    pub repos: Repositories,
    pub api: VendorApi,
    pub queue: Arc<dyn TaskQueue>,
}

impl CrawlContext {
    /// Open the database and build the HTTP client from settings.
    pub async fn open(settings: Settings) -> Result<Self, ContextError> {
        let client = VendorClient::from_settings(&settings)?;
        let repos = Repositories::open(&settings.database_url()).await?;
        Ok(Self::with_transport(settings, repos, Arc::new(client)))
    }

    /// Build a context over an existing store and any transport.
    pub fn with_transport(
        settings: Settings,
        repos: Repositories,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let api = VendorApi::new(transport, repos.responses.clone());
        let queue: Arc<dyn TaskQueue> = Arc::new(DbTaskQueue::new(
            repos.tasks.clone(),
            settings.retry.max_retries,
        ));
        Self {
            settings,
            repos,
            api,
            queue,
        }
    }

    pub fn probe(&self) -> SearchProbe {
        SearchProbe::new(
            self.api.clone(),
            self.repos.listings.clone(),
            self.settings.page_size,
            self.settings.listing_move_threshold_m,
        )
    }

    pub fn discovery(&self) -> DiscoveryService {
        DiscoveryService::new(
            self.repos.grid.clone(),
            self.probe(),
            self.queue.clone(),
            self.settings.max_depth,
            self.settings.max_pages_per_tile,
        )
    }

    pub fn refresher(&self) -> ListingRefresher {
        ListingRefresher::new(
            self.api.clone(),
            self.repos.listings.clone(),
            self.settings.listing_move_threshold_m,
        )
    }

    pub fn periodic(&self) -> PeriodicSelector {
        PeriodicSelector::new(&self.repos, self.queue.clone())
    }

    /// A worker dispatching to every crawl operation.
    pub fn worker(&self) -> Worker {
        let registry: Arc<OperationRegistry> = Arc::new(crate::operations::registry(self));
        Worker::new(
            self.repos.tasks.clone(),
            registry,
            Duration::from_millis(self.settings.worker_poll_ms),
        )
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.repos.tasks.clone(),
            self.queue.clone(),
            self.settings.schedule.clone(),
        )
    }
}
