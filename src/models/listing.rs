//! Listing models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::AoiFlag;

/// A vacation-rental listing known to the crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    /// Vendor-assigned listing id.
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub calendar_updated_at: Option<DateTime<Utc>>,
    pub details_updated_at: Option<DateTime<Utc>>,
    pub reviews_updated_at: Option<DateTime<Utc>>,
    pub booking_updated_at: Option<DateTime<Utc>>,
    /// Position history, oldest first.
    pub relocations: Vec<Relocation>,
}

impl Listing {
    pub fn updated_at_for(&self, resource: ListingResource) -> Option<DateTime<Utc>> {
        match resource {
            ListingResource::Calendar => self.calendar_updated_at,
            ListingResource::Details => self.details_updated_at,
            ListingResource::Reviews => self.reviews_updated_at,
            ListingResource::BookingQuote => self.booking_updated_at,
        }
    }
}

/// A recorded change of a listing's reported position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relocation {
    pub at: DateTime<Utc>,
    pub from_lat: f64,
    pub from_lng: f64,
    pub to_lat: f64,
    pub to_lng: f64,
    pub distance_m: f64,
}

/// Result of registering a listing sighting.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Created,
    Unchanged,
    Relocated(Relocation),
}

/// Per-listing resources refreshed on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingResource {
    Calendar,
    Details,
    Reviews,
    BookingQuote,
}

impl ListingResource {
    pub const ALL: [ListingResource; 4] = [
        Self::Calendar,
        Self::Details,
        Self::Reviews,
        Self::BookingQuote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Details => "details",
            Self::Reviews => "reviews",
            Self::BookingQuote => "booking_quote",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calendar" => Some(Self::Calendar),
            "details" => Some(Self::Details),
            "reviews" => Some(Self::Reviews),
            "booking_quote" => Some(Self::BookingQuote),
            _ => None,
        }
    }

    /// AOI flag that enables refreshing this resource.
    pub fn aoi_flag(&self) -> AoiFlag {
        match self {
            Self::Calendar => AoiFlag::Calendars,
            Self::Details => AoiFlag::Details,
            Self::Reviews => AoiFlag::Reviews,
            Self::BookingQuote => AoiFlag::BookingQuotes,
        }
    }
}
