//! Per-listing resource refreshers.
//!
//! Each refresh fetches one vendor resource for a listing, leaves the raw
//! payload in the response archive and stamps the listing's timestamp for that
//! resource. Only listing details are read back, for the listing position.

use chrono::Utc;
use thiserror::Error;

use crate::models::{ListingResource, Registration};
use crate::repository::{DbError, ListingRepository};
use crate::vendor::{parse_listing_coordinates, ApiError, Endpoint, PayloadError, ResponseLink, VendorApi};

/// Status the vendor answers with for listings that hide a resource.
const FORBIDDEN: u16 = 403;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("listing {0} not found")]
    ListingNotFound(i64),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("unparseable listing details in response {response_id}: {source}")]
    Parse {
        response_id: i64,
        #[source]
        source: PayloadError,
    },
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl RefreshError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retriable(),
            Self::Database(_) => true,
            Self::ListingNotFound(_) | Self::Parse { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed { response_id: i64 },
    /// The vendor refused the resource; the listing is stamped anyway.
    Unavailable { response_id: i64 },
}

impl RefreshOutcome {
    /// Note stored on the finished task.
    pub fn note(&self) -> String {
        match self {
            Self::Refreshed { response_id } => format!("response {response_id}"),
            Self::Unavailable { .. } => "resource not available".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ListingRefresher {
    api: VendorApi,
    listings: ListingRepository,
    move_threshold_m: f64,
}

impl ListingRefresher {
    pub fn new(api: VendorApi, listings: ListingRepository, move_threshold_m: f64) -> Self {
        Self {
            api,
            listings,
            move_threshold_m,
        }
    }

    fn endpoint(resource: ListingResource, listing_id: i64) -> Endpoint {
        match resource {
            ListingResource::Calendar => Endpoint::Calendar,
            ListingResource::Reviews => Endpoint::Reviews,
            ListingResource::Details => Endpoint::ListingDetail(listing_id),
            ListingResource::BookingQuote => Endpoint::BookingQuote,
        }
    }

    /// Fetch `resource` for a known listing and stamp it.
    pub async fn refresh(
        &self,
        listing_id: i64,
        resource: ListingResource,
        task_id: Option<&str>,
    ) -> Result<RefreshOutcome, RefreshError> {
        if self.listings.get(listing_id).await?.is_none() {
            return Err(RefreshError::ListingNotFound(listing_id));
        }

        let query = vec![("listing_id".to_string(), listing_id.to_string())];
        let link = ResponseLink::task(task_id).listing(listing_id);
        let response = match self
            .api
            .call(Self::endpoint(resource, listing_id), query, link)
            .await
        {
            Ok(response) => response,
            Err(ApiError::Permanent {
                status: FORBIDDEN,
                response_id,
                ..
            }) => {
                tracing::info!(
                    "{} for listing {} is not available",
                    resource.as_str(),
                    listing_id
                );
                self.listings.touch(listing_id, resource, Utc::now()).await?;
                return Ok(RefreshOutcome::Unavailable { response_id });
            }
            Err(e) => return Err(e.into()),
        };

        if resource == ListingResource::Details {
            let coordinates =
                parse_listing_coordinates(&response.body).map_err(|source| RefreshError::Parse {
                    response_id: response.response_id,
                    source,
                })?;
            if let Some((lat, lng)) = coordinates {
                if let Registration::Relocated(relocation) = self
                    .listings
                    .register(listing_id, lat, lng, self.move_threshold_m)
                    .await?
                {
                    tracing::info!(
                        "Listing {} moved {:.0} m",
                        listing_id,
                        relocation.distance_m
                    );
                }
            }
        }

        self.listings.touch(listing_id, resource, Utc::now()).await?;
        tracing::debug!(
            "Refreshed {} for listing {} (response {})",
            resource.as_str(),
            listing_id,
            response.response_id
        );
        Ok(RefreshOutcome::Refreshed {
            response_id: response.response_id,
        })
    }

    /// Fetch and archive a host profile.
    pub async fn collect_user(&self, user_id: i64, task_id: Option<&str>) -> Result<i64, RefreshError> {
        let response = self
            .api
            .call(Endpoint::UserDetail(user_id), Vec::new(), ResponseLink::task(task_id))
            .await?;
        Ok(response.response_id)
    }
}
