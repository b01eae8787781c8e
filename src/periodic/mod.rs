//! Periodic selection of stale tiles and listings.
//!
//! Each periodic operation picks the entities whose relevant timestamp is
//! missing or older than `age_hours`, optionally keeps only those inside an
//! area of interest, skips entities that already have work in flight and fans
//! out one task per entity as a single group.

mod selector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use selector::{PeriodicReport, PeriodicSelector, Selected};

use crate::discovery::{DISCOVER_TILE, DISCOVER_TILE_PAGE};
use crate::models::{AoiFlag, ListingResource};
use crate::repository::DbError;
use crate::work_queue::{QueueError, MAX_PRIORITY};

/// A thousand years; anything older is simply "never refreshed".
pub const MAX_AGE_HOURS: f64 = 24.0 * 366.0 * 1000.0;

pub const COLLECT_CALENDAR: &str = "collect_calendar";
pub const COLLECT_REVIEWS: &str = "collect_reviews";
pub const COLLECT_LISTING_DETAILS: &str = "collect_listing_details";
pub const COLLECT_BOOKING_QUOTE: &str = "collect_booking_quote";

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid periodic arguments: {0}")]
    Invalid(String),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("failed to submit selection: {0}")]
    Queue(#[from] QueueError),
}

/// Arguments shared by every periodic operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicArgs {
    /// Upper bound on entities selected in one run.
    pub how_many: i64,
    /// Entities refreshed more recently than this are left alone.
    pub age_hours: f64,
    /// Restrict to entities inside an AOI that enables the operation.
    pub use_aoi: bool,
    pub priority: i64,
}

impl Default for PeriodicArgs {
    fn default() -> Self {
        Self {
            how_many: 100,
            age_hours: 24.0,
            use_aoi: false,
            priority: 0,
        }
    }
}

impl PeriodicArgs {
    /// Parse task kwargs, filling missing fields with defaults.
    pub fn from_kwargs(kwargs: &serde_json::Value) -> Result<Self, SelectionError> {
        let args: Self = match kwargs {
            serde_json::Value::Null => Self::default(),
            other => serde_json::from_value(other.clone())
                .map_err(|e| SelectionError::Invalid(e.to_string()))?,
        };
        args.validate()?;
        Ok(args)
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.how_many < 0 {
            return Err(SelectionError::Invalid(format!(
                "how_many must not be negative, got {}",
                self.how_many
            )));
        }
        if !self.age_hours.is_finite() || !(0.0..=MAX_AGE_HOURS).contains(&self.age_hours) {
            return Err(SelectionError::Invalid(format!(
                "age_hours must be between 0 and {}, got {}",
                MAX_AGE_HOURS, self.age_hours
            )));
        }
        if !(0..=i64::from(MAX_PRIORITY)).contains(&self.priority) {
            return Err(SelectionError::Invalid(format!(
                "priority must be between 0 and {}, got {}",
                MAX_PRIORITY, self.priority
            )));
        }
        Ok(())
    }

    /// Validated priority as a queue priority.
    pub(crate) fn queue_priority(&self) -> u8 {
        self.priority.clamp(0, i64::from(MAX_PRIORITY)) as u8
    }

    /// Entities last refreshed before this instant are stale.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SelectionError> {
        let millis = self.age_hours * 3_600_000.0;
        let out_of_range = || {
            SelectionError::Invalid(format!("age_hours {} reaches before any date", self.age_hours))
        };
        if !millis.is_finite() || millis >= i64::MAX as f64 {
            return Err(out_of_range());
        }
        let max_age = chrono::Duration::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;
        now.checked_sub_signed(max_age).ok_or_else(out_of_range)
    }
}

/// A periodic operation and the per-entity work it fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodicOperation {
    ScanStaleTiles,
    RefreshCalendars,
    RefreshReviews,
    RefreshListingDetails,
    RefreshBookingQuotes,
}

impl PeriodicOperation {
    pub const ALL: [PeriodicOperation; 5] = [
        Self::ScanStaleTiles,
        Self::RefreshCalendars,
        Self::RefreshReviews,
        Self::RefreshListingDetails,
        Self::RefreshBookingQuotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScanStaleTiles => "scan_stale_tiles",
            Self::RefreshCalendars => "refresh_calendars",
            Self::RefreshReviews => "refresh_reviews",
            Self::RefreshListingDetails => "refresh_listing_details",
            Self::RefreshBookingQuotes => "refresh_booking_quotes",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == s)
    }

    /// Listing resource refreshed, or `None` for the tile scan.
    pub fn resource(&self) -> Option<ListingResource> {
        match self {
            Self::ScanStaleTiles => None,
            Self::RefreshCalendars => Some(ListingResource::Calendar),
            Self::RefreshReviews => Some(ListingResource::Reviews),
            Self::RefreshListingDetails => Some(ListingResource::Details),
            Self::RefreshBookingQuotes => Some(ListingResource::BookingQuote),
        }
    }

    /// Operation submitted once per selected entity.
    pub fn child_operation(&self) -> &'static str {
        match self {
            Self::ScanStaleTiles => DISCOVER_TILE,
            Self::RefreshCalendars => COLLECT_CALENDAR,
            Self::RefreshReviews => COLLECT_REVIEWS,
            Self::RefreshListingDetails => COLLECT_LISTING_DETAILS,
            Self::RefreshBookingQuotes => COLLECT_BOOKING_QUOTE,
        }
    }

    /// Operations whose unfinished tasks count as work in flight for an entity.
    pub fn in_flight_operations(&self) -> Vec<&'static str> {
        match self {
            Self::ScanStaleTiles => vec![DISCOVER_TILE, DISCOVER_TILE_PAGE],
            other => vec![other.child_operation()],
        }
    }

    /// Kwarg naming the entity in child tasks.
    pub fn entity_key(&self) -> &'static str {
        match self {
            Self::ScanStaleTiles => "quadkey",
            _ => "listing_id",
        }
    }

    pub fn aoi_flag(&self) -> AoiFlag {
        match self.resource() {
            Some(resource) => resource.aoi_flag(),
            None => AoiFlag::ScanForNewListings,
        }
    }
}

impl std::fmt::Display for PeriodicOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
