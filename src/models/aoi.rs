//! Areas of interest.

use chrono::{DateTime, Utc};
use geo::{Contains, Intersects, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::grid::{BBox, GridError};

/// Collection flags an AOI can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AoiFlag {
    Calendars,
    Reviews,
    Details,
    BookingQuotes,
    ScanForNewListings,
}

impl AoiFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calendars => "calendars",
            Self::Reviews => "reviews",
            Self::Details => "details",
            Self::BookingQuotes => "booking_quotes",
            Self::ScanForNewListings => "scan_for_new_listings",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calendars" => Some(Self::Calendars),
            "reviews" => Some(Self::Reviews),
            "details" => Some(Self::Details),
            "booking_quotes" => Some(Self::BookingQuotes),
            "scan_for_new_listings" => Some(Self::ScanForNewListings),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoiFlags {
    pub collect_calendars: bool,
    pub collect_reviews: bool,
    pub collect_details: bool,
    pub collect_booking_quotes: bool,
    pub scan_for_new_listings: bool,
}

impl Default for AoiFlags {
    fn default() -> Self {
        Self {
            collect_calendars: true,
            collect_reviews: true,
            collect_details: true,
            collect_booking_quotes: true,
            scan_for_new_listings: true,
        }
    }
}

impl AoiFlags {
    pub fn get(&self, flag: AoiFlag) -> bool {
        match flag {
            AoiFlag::Calendars => self.collect_calendars,
            AoiFlag::Reviews => self.collect_reviews,
            AoiFlag::Details => self.collect_details,
            AoiFlag::BookingQuotes => self.collect_booking_quotes,
            AoiFlag::ScanForNewListings => self.scan_for_new_listings,
        }
    }

    pub fn set(&mut self, flag: AoiFlag, value: bool) {
        match flag {
            AoiFlag::Calendars => self.collect_calendars = value,
            AoiFlag::Reviews => self.collect_reviews = value,
            AoiFlag::Details => self.collect_details = value,
            AoiFlag::BookingQuotes => self.collect_booking_quotes = value,
            AoiFlag::ScanForNewListings => self.scan_for_new_listings = value,
        }
    }
}

/// A named polygon restricting where periodic work is done.
#[derive(Debug, Clone)]
pub struct Aoi {
    pub id: i32,
    pub name: String,
    pub geometry: Polygon<f64>,
    pub bbox: BBox,
    pub flags: AoiFlags,
    pub created_at: DateTime<Utc>,
}

impl Aoi {
    /// Whether a listing position falls inside the area (boundary included).
    pub fn contains_point(&self, lat: f64, lng: f64) -> bool {
        if !self.bbox.contains_point(lng, lat) {
            return false;
        }
        let point = Point::new(lng, lat);
        self.geometry.contains(&point) || self.geometry.intersects(&point)
    }

    /// Whether the area overlaps a tile's bounds.
    pub fn intersects_bbox(&self, bbox: &BBox) -> bool {
        self.bbox.intersects(bbox) && self.geometry.intersects(&bbox.to_polygon())
    }
}

/// An AOI about to be stored.
#[derive(Debug, Clone)]
pub struct NewAoi {
    pub name: String,
    pub geometry: Polygon<f64>,
    pub flags: AoiFlags,
}

impl NewAoi {
    /// Rectangular AOI. Boxes crossing the antimeridian are refused: as a
    /// single polygon they would cover the rest of the world instead.
    pub fn from_bbox(name: impl Into<String>, bbox: &BBox, flags: AoiFlags) -> Result<Self, GridError> {
        if bbox.straddles_antimeridian() {
            return Err(GridError::InvalidBBox(format!(
                "{bbox} crosses the antimeridian; add one AOI on each side of it"
            )));
        }
        Ok(Self {
            name: name.into(),
            geometry: bbox.to_polygon(),
            flags,
        })
    }
}
