//! Diesel ORM models for database tables.
//!
//! Field order matches `schema.rs`; records are loaded positionally.

use diesel::prelude::*;

use crate::schema;

/// Grid tile record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::grid_tiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TileRecord {
    pub id: i32,
    pub quadkey: String,
    pub tile_x: i64,
    pub tile_y: i64,
    pub tile_z: i32,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub width_m: f64,
    pub height_m: f64,
    pub estimated_count: i64,
    pub count_updated_at: Option<String>,
    pub scanned_at: Option<String>,
    pub created_at: String,
}

/// New grid tile for insertion.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::grid_tiles)]
pub struct NewTileRecord {
    pub quadkey: String,
    pub tile_x: i64,
    pub tile_y: i64,
    pub tile_z: i32,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub width_m: f64,
    pub height_m: f64,
    pub estimated_count: i64,
    pub created_at: String,
}

/// Listing record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::listings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ListingRecord {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub created_at: String,
    pub updated_at: String,
    pub calendar_updated_at: Option<String>,
    pub details_updated_at: Option<String>,
    pub reviews_updated_at: Option<String>,
    pub booking_updated_at: Option<String>,
    pub relocations: String,
}

/// New listing for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::listings)]
pub struct NewListingRecord<'a> {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub relocations: &'a str,
}

/// Archived response record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::responses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ResponseRow {
    pub id: i64,
    pub response_type: String,
    pub status_code: i32,
    pub payload: String,
    pub url: String,
    pub query: String,
    pub elapsed_ms: i64,
    pub task_id: Option<String>,
    pub listing_id: Option<i64>,
    pub created_at: String,
}

/// New response for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::responses)]
pub struct NewResponseRow<'a> {
    pub response_type: &'a str,
    pub status_code: i32,
    pub payload: &'a str,
    pub url: &'a str,
    pub query: &'a str,
    pub elapsed_ms: i64,
    pub task_id: Option<&'a str>,
    pub listing_id: Option<i64>,
    pub created_at: &'a str,
}

/// Task record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRecord {
    pub id: String,
    pub operation: String,
    pub kwargs: String,
    pub status: String,
    pub priority: i32,
    pub group_id: Option<String>,
    pub parent_id: Option<String>,
    pub retries: i32,
    pub max_retries: i32,
    pub eta: Option<String>,
    pub expires_at: Option<String>,
    pub submitted_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// New task for insertion.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::tasks)]
pub struct NewTaskRecord {
    pub id: String,
    pub operation: String,
    pub kwargs: String,
    pub status: String,
    pub priority: i32,
    pub group_id: Option<String>,
    pub parent_id: Option<String>,
    pub retries: i32,
    pub max_retries: i32,
    pub eta: Option<String>,
    pub expires_at: Option<String>,
    pub submitted_at: String,
}

/// Column changes applied when a task moves between states.
///
/// `None` fields are left untouched.
#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = schema::tasks)]
pub struct TaskChangeset<'a> {
    pub status: Option<&'a str>,
    pub retries: Option<i32>,
    pub eta: Option<&'a str>,
    pub started_at: Option<&'a str>,
    pub finished_at: Option<&'a str>,
    pub result: Option<&'a str>,
    pub error: Option<&'a str>,
}

/// Task group record from the database.
#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone)]
#[diesel(table_name = schema::task_groups)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskGroupRecord {
    pub id: String,
    pub operation: String,
    pub args: String,
    pub created_at: String,
}

/// AOI record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::aois)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AoiRecord {
    pub id: i32,
    pub name: String,
    pub geometry: String,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub collect_calendars: i32,
    pub collect_reviews: i32,
    pub collect_details: i32,
    pub collect_booking_quotes: i32,
    pub scan_for_new_listings: i32,
    pub created_at: String,
}

/// New AOI for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::aois)]
pub struct NewAoiRecord<'a> {
    pub name: &'a str,
    pub geometry: &'a str,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub collect_calendars: i32,
    pub collect_reviews: i32,
    pub collect_details: i32,
    pub collect_booking_quotes: i32,
    pub scan_for_new_listings: i32,
    pub created_at: &'a str,
}
