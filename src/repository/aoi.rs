//! Area-of-interest repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use geo::{BoundingRect, Coord, LineString, Polygon};

use super::models::{AoiRecord, NewAoiRecord};
use super::pool::{DbPool, DieselError};
use super::util::{corrupt_column, format_datetime};
use super::{last_insert_rowid, parse_datetime};
use crate::grid::BBox;
use crate::models::{Aoi, AoiFlag, AoiFlags, NewAoi};
use crate::schema::aois;
use crate::with_conn;

/// Exterior ring as `[[lng, lat], ...]`.
fn encode_geometry(polygon: &Polygon<f64>) -> String {
    let ring: Vec<[f64; 2]> = polygon.exterior().coords().map(|c| [c.x, c.y]).collect();
    serde_json::json!(ring).to_string()
}

fn decode_geometry(raw: &str) -> Result<Polygon<f64>, DieselError> {
    let ring: Vec<[f64; 2]> =
        serde_json::from_str(raw).map_err(|e| corrupt_column("aois.geometry", raw, e))?;
    if ring.len() < 4 {
        return Err(corrupt_column("aois.geometry", raw, "ring needs at least 4 points"));
    }
    let exterior: LineString<f64> = ring.into_iter().map(|[x, y]| Coord { x, y }).collect();
    Ok(Polygon::new(exterior, vec![]))
}

impl TryFrom<AoiRecord> for Aoi {
    type Error = DieselError;

    fn try_from(record: AoiRecord) -> Result<Self, Self::Error> {
        Ok(Aoi {
            id: record.id,
            geometry: decode_geometry(&record.geometry)?,
            name: record.name,
            bbox: BBox {
                west: record.west,
                south: record.south,
                east: record.east,
                north: record.north,
            },
            flags: AoiFlags {
                collect_calendars: record.collect_calendars != 0,
                collect_reviews: record.collect_reviews != 0,
                collect_details: record.collect_details != 0,
                collect_booking_quotes: record.collect_booking_quotes != 0,
                scan_for_new_listings: record.scan_for_new_listings != 0,
            },
            created_at: parse_datetime(&record.created_at),
        })
    }
}

#[derive(Clone)]
pub struct AoiRepository {
    pool: DbPool,
}

impl AoiRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, aoi: &NewAoi) -> Result<Aoi, DieselError> {
        let rect = aoi
            .geometry
            .bounding_rect()
            .ok_or_else(|| corrupt_column("aois.geometry", &aoi.name, "empty polygon"))?;
        let geometry = encode_geometry(&aoi.geometry);
        let created_at = format_datetime(&Utc::now());
        let flags = &aoi.flags;
        let record = NewAoiRecord {
            name: &aoi.name,
            geometry: &geometry,
            west: rect.min().x,
            south: rect.min().y,
            east: rect.max().x,
            north: rect.max().y,
            collect_calendars: flags.collect_calendars as i32,
            collect_reviews: flags.collect_reviews as i32,
            collect_details: flags.collect_details as i32,
            collect_booking_quotes: flags.collect_booking_quotes as i32,
            scan_for_new_listings: flags.scan_for_new_listings as i32,
            created_at: &created_at,
        };

        let id = with_conn!(self.pool, conn, {
            diesel::insert_into(aois::table)
                .values(&record)
                .execute(&mut conn)
                .await?;
            last_insert_rowid(&mut conn).await
        })?;

        self.get(id as i32).await?.ok_or(DieselError::NotFound)
    }

    pub async fn get(&self, id: i32) -> Result<Option<Aoi>, DieselError> {
        with_conn!(self.pool, conn, {
            aois::table
                .find(id)
                .first::<AoiRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(Aoi::try_from).transpose())
        })
    }

    pub async fn list(&self) -> Result<Vec<Aoi>, DieselError> {
        with_conn!(self.pool, conn, {
            aois::table
                .order(aois::id.asc())
                .load::<AoiRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(Aoi::try_from).collect())
        })
    }

    /// AOIs with `flag` enabled.
    pub async fn with_flag(&self, flag: AoiFlag) -> Result<Vec<Aoi>, DieselError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|aoi| aoi.flags.get(flag))
            .collect())
    }
}
