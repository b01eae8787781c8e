//! Search probe: one page of search results for a bounding box.

use thiserror::Error;

use super::protocol::ProbeSummary;
use crate::grid::BBox;
use crate::models::Registration;
use crate::repository::{DbError, ListingRepository};
use crate::vendor::{parse_search_page, ApiError, Endpoint, FoundListing, PayloadError, ResponseLink, VendorApi};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("unparseable search response {response_id}: {source}")]
    Parse {
        response_id: i64,
        #[source]
        source: PayloadError,
    },
    #[error("failed to register listings: {0}")]
    Database(#[from] DbError),
}

impl ProbeError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retriable(),
            Self::Parse { .. } => false,
            Self::Database(_) => true,
        }
    }
}

/// One probed page.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub response_id: i64,
    pub has_next_page: bool,
    pub total_count: Option<i64>,
    pub next_offset: u32,
    pub listings: Vec<FoundListing>,
    /// Listings seen for the first time.
    pub created: usize,
    /// Known listings that moved beyond the threshold.
    pub relocated: usize,
}

impl ProbeResult {
    pub fn summary(&self) -> ProbeSummary {
        ProbeSummary {
            has_next_page: self.has_next_page,
            total_count: self.total_count,
            next_offset: self.next_offset,
        }
    }
}

/// Queries the search endpoint for a bounding box and registers what it finds.
#[derive(Clone)]
pub struct SearchProbe {
    api: VendorApi,
    listings: ListingRepository,
    page_size: u32,
    move_threshold_m: f64,
}

impl SearchProbe {
    pub fn new(api: VendorApi, listings: ListingRepository, page_size: u32, move_threshold_m: f64) -> Self {
        Self {
            api,
            listings,
            page_size,
            move_threshold_m,
        }
    }

    fn query(&self, bbox: &BBox, offset: u32) -> Vec<(String, String)> {
        vec![
            ("sw_lat".to_string(), bbox.south.to_string()),
            ("sw_lng".to_string(), bbox.west.to_string()),
            ("ne_lat".to_string(), bbox.north.to_string()),
            ("ne_lng".to_string(), bbox.east.to_string()),
            ("items_offset".to_string(), offset.to_string()),
            ("items_per_grid".to_string(), self.page_size.to_string()),
        ]
    }

    /// Fetch the page at `offset`. The response is archived before any error is returned.
    pub async fn probe(&self, bbox: &BBox, offset: u32, task_id: Option<&str>) -> Result<ProbeResult, ProbeError> {
        let response = self
            .api
            .call(Endpoint::Search, self.query(bbox, offset), ResponseLink::task(task_id))
            .await?;

        let page = parse_search_page(&response.body, offset, self.page_size).map_err(|source| {
            tracing::error!("Search response {} is malformed: {}", response.response_id, source);
            ProbeError::Parse {
                response_id: response.response_id,
                source,
            }
        })?;

        let mut created = 0;
        let mut relocated = 0;
        for listing in &page.listings {
            match self
                .listings
                .register(listing.id, listing.lat, listing.lng, self.move_threshold_m)
                .await?
            {
                Registration::Created => created += 1,
                Registration::Relocated(relocation) => {
                    tracing::info!(
                        "Listing {} moved {:.0} m",
                        listing.id,
                        relocation.distance_m
                    );
                    relocated += 1;
                }
                Registration::Unchanged => {}
            }
        }

        tracing::debug!(
            "Probed {} at offset {}: {} results, total {:?}, next page {}",
            bbox,
            offset,
            page.listings.len(),
            page.total_count,
            page.has_next_page
        );

        Ok(ProbeResult {
            response_id: response.response_id,
            has_next_page: page.has_next_page,
            total_count: page.total_count,
            next_offset: page.next_offset,
            listings: page.listings,
            created,
            relocated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{migrations, DbPool, ResponseRepository};
    use crate::vendor::ScriptedTransport;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn probe_with(transport: ScriptedTransport) -> (tempfile::TempDir, SearchProbe, ListingRepository, ResponseRepository) {
        let dir = tempdir().unwrap();
        let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
        migrations::run_migrations(&db_url).await.unwrap();
        let pool = DbPool::from_url(&db_url).unwrap();
        let listings = ListingRepository::new(pool.clone());
        let responses = ResponseRepository::new(pool);
        let api = VendorApi::new(Arc::new(transport), responses.clone());
        (dir, SearchProbe::new(api, listings.clone(), 50, 100.0), listings, responses)
    }

    fn bbox() -> BBox {
        BBox::new(-9.2, 38.7, -9.1, 38.8).unwrap()
    }

    #[tokio::test]
    async fn registers_listings_and_sends_window() {
        let transport = ScriptedTransport::always(
            200,
            r#"{"results": [{"id": 1, "lat": 38.75, "lng": -9.15}, {"id": 2, "lat": 38.71, "lng": -9.12}],
                "total_count": 2, "pagination": {"has_next_page": false}}"#,
        );
        let (_dir, probe, listings, _) = probe_with(transport.clone()).await;

        let result = probe.probe(&bbox(), 0, Some("task-1")).await.unwrap();
        assert!(!result.has_next_page);
        assert_eq!(result.total_count, Some(2));
        assert_eq!(result.created, 2);
        assert_eq!(listings.count().await.unwrap(), 2);

        let again = probe.probe(&bbox(), 0, Some("task-1")).await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(listings.count().await.unwrap(), 2);

        let call = &transport.calls()[0];
        assert_eq!(call.path, "/search");
        assert_eq!(call.param("sw_lat"), Some("38.7"));
        assert_eq!(call.param("ne_lng"), Some("-9.1"));
        assert_eq!(call.param("items_offset"), Some("0"));
        assert_eq!(call.param("items_per_grid"), Some("50"));
    }

    #[tokio::test]
    async fn missing_pagination_is_a_parse_error_after_archiving() {
        let transport = ScriptedTransport::always(200, r#"{"results": [], "total_count": 0}"#);
        let (_dir, probe, _, responses) = probe_with(transport).await;

        let err = probe.probe(&bbox(), 0, Some("task-2")).await.unwrap_err();
        assert!(matches!(err, ProbeError::Parse { .. }));
        assert!(!err.is_retriable());
        assert_eq!(responses.for_task("task-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retriable() {
        let (_dir, probe, _, responses) = probe_with(ScriptedTransport::always(429, "")).await;
        let err = probe.probe(&bbox(), 0, Some("task-3")).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(responses.for_task("task-3").await.unwrap()[0].status_code, 429);
    }
}
