//! Listing repository.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use geo::{Distance, Haversine, Point};

use super::models::{ListingRecord, NewListingRecord};
use super::pool::{DbPool, DieselError};
use super::util::{corrupt_column, format_datetime};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Listing, ListingResource, Registration, Relocation};
use crate::schema::listings;
use crate::with_conn;

impl TryFrom<ListingRecord> for Listing {
    type Error = DieselError;

    fn try_from(record: ListingRecord) -> Result<Self, Self::Error> {
        let relocations = serde_json::from_str(&record.relocations)
            .map_err(|e| corrupt_column("listings.relocations", &record.relocations, e))?;
        Ok(Listing {
            id: record.id,
            lat: record.lat,
            lng: record.lng,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
            calendar_updated_at: parse_datetime_opt(record.calendar_updated_at),
            details_updated_at: parse_datetime_opt(record.details_updated_at),
            reviews_updated_at: parse_datetime_opt(record.reviews_updated_at),
            booking_updated_at: parse_datetime_opt(record.booking_updated_at),
            relocations,
        })
    }
}

/// Great-circle distance in meters between two WGS84 positions.
pub fn distance_m(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> f64 {
    Haversine.distance(Point::new(lng_a, lat_a), Point::new(lng_b, lat_b))
}

/// Diesel-based listing repository.
#[derive(Clone)]
pub struct ListingRepository {
    pool: DbPool,
}

impl ListingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Listing>, DieselError> {
        with_conn!(self.pool, conn, {
            listings::table
                .find(id)
                .first::<ListingRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(Listing::try_from).transpose())
        })
    }

    /// Record a sighting of a listing at a position.
    ///
    /// Unknown listings are created. Known listings that moved further than
    /// `move_threshold_m` get their position updated and the move appended to
    /// their history; smaller differences are ignored.
    pub async fn register(
        &self,
        id: i64,
        lat: f64,
        lng: f64,
        move_threshold_m: f64,
    ) -> Result<Registration, DieselError> {
        let now = Utc::now();
        let now_str = format_datetime(&now);

        with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(move |conn| {
                Box::pin(async move {
                    let inserted = diesel::insert_into(listings::table)
                        .values(&NewListingRecord {
                            id,
                            lat,
                            lng,
                            created_at: &now_str,
                            updated_at: &now_str,
                            relocations: "[]",
                        })
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                    if inserted > 0 {
                        return Ok(Registration::Created);
                    }

                    let existing: Listing = listings::table
                        .find(id)
                        .first::<ListingRecord>(conn)
                        .await?
                        .try_into()?;
                    let moved = distance_m(existing.lat, existing.lng, lat, lng);
                    if moved <= move_threshold_m {
                        return Ok(Registration::Unchanged);
                    }

                    let relocation = Relocation {
                        at: now,
                        from_lat: existing.lat,
                        from_lng: existing.lng,
                        to_lat: lat,
                        to_lng: lng,
                        distance_m: moved,
                    };
                    let mut history = existing.relocations;
                    history.push(relocation.clone());
                    let history = serde_json::to_string(&history)
                        .map_err(|e| DieselError::SerializationError(Box::new(e)))?;

                    diesel::update(listings::table.find(id))
                        .set((
                            listings::lat.eq(lat),
                            listings::lng.eq(lng),
                            listings::updated_at.eq(now_str.as_str()),
                            listings::relocations.eq(history.as_str()),
                        ))
                        .execute(conn)
                        .await?;
                    Ok(Registration::Relocated(relocation))
                })
            })
            .await
        })
    }

    /// Stamp when a per-listing resource was last refreshed.
    pub async fn touch(
        &self,
        id: i64,
        resource: ListingResource,
        at: DateTime<Utc>,
    ) -> Result<bool, DieselError> {
        let at = format_datetime(&at);
        let at = Some(at.as_str());
        let target = listings::table.find(id);
        with_conn!(self.pool, conn, {
            let rows = match resource {
                ListingResource::Calendar => {
                    diesel::update(target)
                        .set(listings::calendar_updated_at.eq(at))
                        .execute(&mut conn)
                        .await?
                }
                ListingResource::Details => {
                    diesel::update(target)
                        .set(listings::details_updated_at.eq(at))
                        .execute(&mut conn)
                        .await?
                }
                ListingResource::Reviews => {
                    diesel::update(target)
                        .set(listings::reviews_updated_at.eq(at))
                        .execute(&mut conn)
                        .await?
                }
                ListingResource::BookingQuote => {
                    diesel::update(target)
                        .set(listings::booking_updated_at.eq(at))
                        .execute(&mut conn)
                        .await?
                }
            };
            Ok(rows > 0)
        })
    }

    /// Listings whose `resource` was never refreshed or refreshed before
    /// `cutoff`, oldest first.
    pub async fn select_stale(
        &self,
        resource: ListingResource,
        cutoff: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Listing>, DieselError> {
        let cutoff = format_datetime(&cutoff);
        let cutoff = cutoff.as_str();
        let query = listings::table.into_boxed();
        let query = match resource {
            ListingResource::Calendar => query
                .filter(
                    listings::calendar_updated_at
                        .is_null()
                        .or(listings::calendar_updated_at.lt(cutoff)),
                )
                .order((listings::calendar_updated_at.asc(), listings::id.asc())),
            ListingResource::Details => query
                .filter(
                    listings::details_updated_at
                        .is_null()
                        .or(listings::details_updated_at.lt(cutoff)),
                )
                .order((listings::details_updated_at.asc(), listings::id.asc())),
            ListingResource::Reviews => query
                .filter(
                    listings::reviews_updated_at
                        .is_null()
                        .or(listings::reviews_updated_at.lt(cutoff)),
                )
                .order((listings::reviews_updated_at.asc(), listings::id.asc())),
            ListingResource::BookingQuote => query
                .filter(
                    listings::booking_updated_at
                        .is_null()
                        .or(listings::booking_updated_at.lt(cutoff)),
                )
                .order((listings::booking_updated_at.asc(), listings::id.asc())),
        };

        with_conn!(self.pool, conn, {
            query
                .offset(offset)
                .limit(limit)
                .load::<ListingRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(Listing::try_from).collect())
        })
    }

    pub async fn count(&self) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            listings::table.count().get_result::<i64>(&mut conn).await
        })
    }
}
