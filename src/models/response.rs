//! Archived vendor responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of vendor call that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Search,
    Calendar,
    Review,
    ListingDetail,
    BookingQuote,
    UserDetail,
    SearchMetadata,
    Unknown,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Calendar => "calendar",
            Self::Review => "review",
            Self::ListingDetail => "listing_detail",
            Self::BookingQuote => "booking_quote",
            Self::UserDetail => "user_detail",
            Self::SearchMetadata => "search_metadata",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "search" => Some(Self::Search),
            "calendar" => Some(Self::Calendar),
            "review" => Some(Self::Review),
            "listing_detail" => Some(Self::ListingDetail),
            "booking_quote" => Some(Self::BookingQuote),
            "user_detail" => Some(Self::UserDetail),
            "search_metadata" => Some(Self::SearchMetadata),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A stored vendor response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: i64,
    pub response_type: ResponseType,
    /// HTTP status, or 0 when the request never got a response.
    pub status_code: u16,
    pub payload: String,
    pub url: String,
    /// Query parameters as a JSON object.
    pub query: serde_json::Value,
    pub elapsed_ms: i64,
    pub task_id: Option<String>,
    pub listing_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A response about to be archived.
#[derive(Debug, Clone)]
pub struct NewResponse {
    pub response_type: ResponseType,
    pub status_code: u16,
    pub payload: String,
    pub url: String,
    pub query: serde_json::Value,
    pub elapsed_ms: i64,
    pub task_id: Option<String>,
    pub listing_id: Option<i64>,
}
