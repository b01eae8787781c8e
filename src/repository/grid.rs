//! Grid tile repository.
//!
//! Persisted tiles are the leaves of the discovery quadtree: no stored tile
//! is ever an ancestor or descendant of another.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{NewTileRecord, TileRecord};
use super::pool::{DbPool, DieselError, SqliteConn};
use super::util::{corrupt_column, format_datetime};
use super::{last_insert_rowid, parse_datetime, parse_datetime_opt};
use crate::grid::{BBox, Quadkey, TileXyz};
use crate::models::{NewTile, Tile, UNKNOWN_COUNT};
use crate::schema::grid_tiles;
use crate::with_conn;

impl TryFrom<TileRecord> for Tile {
    type Error = DieselError;

    fn try_from(record: TileRecord) -> Result<Self, Self::Error> {
        let quadkey = Quadkey::parse(&record.quadkey)
            .map_err(|e| corrupt_column("grid_tiles.quadkey", &record.quadkey, e))?;
        Ok(Tile {
            id: record.id,
            xyz: TileXyz {
                x: record.tile_x as u32,
                y: record.tile_y as u32,
                z: record.tile_z as u8,
            },
            quadkey,
            bbox: BBox {
                west: record.west,
                south: record.south,
                east: record.east,
                north: record.north,
            },
            width_m: record.width_m,
            height_m: record.height_m,
            estimated_count: record.estimated_count,
            count_updated_at: parse_datetime_opt(record.count_updated_at),
            scanned_at: parse_datetime_opt(record.scanned_at),
            created_at: parse_datetime(&record.created_at),
        })
    }
}

impl NewTileRecord {
    fn from_new_tile(tile: &NewTile, now: &str) -> Self {
        Self {
            quadkey: tile.quadkey.as_str().to_string(),
            tile_x: i64::from(tile.xyz.x),
            tile_y: i64::from(tile.xyz.y),
            tile_z: i32::from(tile.xyz.z),
            west: tile.bbox.west,
            south: tile.bbox.south,
            east: tile.bbox.east,
            north: tile.bbox.north,
            width_m: tile.width_m,
            height_m: tile.height_m,
            estimated_count: UNKNOWN_COUNT,
            created_at: now.to_string(),
        }
    }
}

/// Outcome of inserting a tile.
#[derive(Debug, Clone, PartialEq)]
pub enum TileInsert {
    Inserted(Tile),
    AlreadyExists,
    /// An ancestor or descendant of the tile is already stored.
    Overlaps(Quadkey),
}

/// Diesel-based grid repository.
#[derive(Clone)]
pub struct GridRepository {
    pool: DbPool,
}

impl GridRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Build an unsaved tile from its address.
    pub fn create_tile_from_address(quadkey: &Quadkey) -> NewTile {
        NewTile::from_quadkey(quadkey)
    }

    pub async fn get(&self, quadkey: &Quadkey) -> Result<Option<Tile>, DieselError> {
        with_conn!(self.pool, conn, {
            grid_tiles::table
                .filter(grid_tiles::quadkey.eq(quadkey.as_str()))
                .first::<TileRecord>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(Tile::try_from).transpose())
        })
    }

    pub async fn has_tile(&self, quadkey: &Quadkey) -> Result<bool, DieselError> {
        Ok(self.get(quadkey).await?.is_some())
    }

    /// Whether any stored tile strictly contains or is contained by `quadkey`.
    ///
    /// The root tile counts as an ancestor of everything.
    pub async fn has_ancestor_or_descendant(&self, quadkey: &Quadkey) -> Result<bool, DieselError> {
        with_conn!(self.pool, conn, {
            Ok(find_overlapping(&mut conn, quadkey).await?.is_some())
        })
    }

    /// Insert a tile unless it, an ancestor, or a descendant is already stored.
    pub async fn insert_tile(&self, tile: &NewTile) -> Result<TileInsert, DieselError> {
        let now = format_datetime(&Utc::now());
        let record = NewTileRecord::from_new_tile(tile, &now);
        let quadkey = tile.quadkey.clone();

        let inserted = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(move |conn| {
                Box::pin(async move {
                    let existing = grid_tiles::table
                        .filter(grid_tiles::quadkey.eq(quadkey.as_str()))
                        .select(grid_tiles::id)
                        .first::<i32>(conn)
                        .await
                        .optional()?;
                    if existing.is_some() {
                        return Ok(Err(TileInsert::AlreadyExists));
                    }
                    if let Some(other) = find_overlapping(conn, &quadkey).await? {
                        return Ok(Err(TileInsert::Overlaps(other)));
                    }
                    diesel::insert_into(grid_tiles::table)
                        .values(&record)
                        .execute(conn)
                        .await?;
                    last_insert_rowid(conn).await.map(Ok)
                })
            })
            .await
        })?;

        match inserted {
            Ok(id) => {
                let tile = self
                    .get(&tile.quadkey)
                    .await?
                    .filter(|t| i64::from(t.id) == id)
                    .ok_or(DieselError::NotFound)?;
                Ok(TileInsert::Inserted(tile))
            }
            Err(outcome) => Ok(outcome),
        }
    }

    /// Atomically replace a tile with its four children.
    ///
    /// Returns `NotFound` if the parent is no longer stored. Any failure rolls
    /// back the whole replacement.
    pub async fn replace_with_children(
        &self,
        quadkey: &Quadkey,
    ) -> Result<[Quadkey; 4], DieselError> {
        let now = format_datetime(&Utc::now());
        let children = quadkey.children();
        let records: Vec<NewTileRecord> = children
            .iter()
            .map(|child| NewTileRecord::from_new_tile(&NewTile::from_quadkey(child), &now))
            .collect();
        let parent = quadkey.as_str().to_string();

        with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(move |conn| {
                Box::pin(async move {
                    let deleted =
                        diesel::delete(grid_tiles::table.filter(grid_tiles::quadkey.eq(parent.as_str())))
                            .execute(conn)
                            .await?;
                    if deleted == 0 {
                        return Err(DieselError::NotFound);
                    }
                    for record in &records {
                        diesel::insert_into(grid_tiles::table)
                            .values(record)
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await
        })?;

        Ok(children)
    }

    /// Store the vendor's listing total for a tile.
    pub async fn record_estimate(
        &self,
        quadkey: &Quadkey,
        estimated_count: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<bool, DieselError> {
        let at = format_datetime(&at);
        with_conn!(self.pool, conn, {
            let rows = diesel::update(grid_tiles::table.filter(grid_tiles::quadkey.eq(quadkey.as_str())))
                .set((
                    grid_tiles::estimated_count.eq(estimated_count.unwrap_or(UNKNOWN_COUNT)),
                    grid_tiles::count_updated_at.eq(Some(at.as_str())),
                ))
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    /// Stamp a tile as fully scanned.
    pub async fn mark_scanned(&self, quadkey: &Quadkey, at: DateTime<Utc>) -> Result<bool, DieselError> {
        let at = format_datetime(&at);
        with_conn!(self.pool, conn, {
            let rows = diesel::update(grid_tiles::table.filter(grid_tiles::quadkey.eq(quadkey.as_str())))
                .set(grid_tiles::scanned_at.eq(Some(at.as_str())))
                .execute(&mut conn)
                .await?;
            Ok(rows > 0)
        })
    }

    /// Tiles under `prefix` (or all tiles), ordered by quadkey.
    pub async fn list(&self, prefix: Option<&Quadkey>, limit: i64) -> Result<Vec<Tile>, DieselError> {
        let mut query = grid_tiles::table.order(grid_tiles::quadkey.asc()).into_boxed();
        if let Some(prefix) = prefix {
            query = query.filter(grid_tiles::quadkey.like(format!("{}%", prefix.as_str())));
        }
        with_conn!(self.pool, conn, {
            query
                .limit(limit)
                .load::<TileRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(Tile::try_from).collect())
        })
    }

    pub async fn all_quadkeys(&self) -> Result<Vec<Quadkey>, DieselError> {
        let keys = with_conn!(self.pool, conn, {
            grid_tiles::table
                .select(grid_tiles::quadkey)
                .order(grid_tiles::quadkey.asc())
                .load::<String>(&mut conn)
                .await
        })?;
        keys.into_iter()
            .map(|k| Quadkey::parse(&k).map_err(|e| corrupt_column("grid_tiles.quadkey", &k, e)))
            .collect()
    }

    pub async fn count(&self) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            grid_tiles::table.count().get_result::<i64>(&mut conn).await
        })
    }

    /// Number of tiles per zoom level.
    pub async fn count_by_depth(&self) -> Result<Vec<(i32, i64)>, DieselError> {
        with_conn!(self.pool, conn, {
            grid_tiles::table
                .group_by(grid_tiles::tile_z)
                .select((grid_tiles::tile_z, diesel::dsl::count_star()))
                .order(grid_tiles::tile_z.asc())
                .load::<(i32, i64)>(&mut conn)
                .await
        })
    }

    /// Tiles never scanned or last scanned before `cutoff`, oldest first.
    pub async fn select_stale(
        &self,
        cutoff: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Tile>, DieselError> {
        let cutoff = format_datetime(&cutoff);
        with_conn!(self.pool, conn, {
            grid_tiles::table
                .filter(
                    grid_tiles::scanned_at
                        .is_null()
                        .or(grid_tiles::scanned_at.lt(cutoff.as_str())),
                )
                .order((grid_tiles::scanned_at.asc(), grid_tiles::id.asc()))
                .offset(offset)
                .limit(limit)
                .load::<TileRecord>(&mut conn)
                .await
                .and_then(|records| records.into_iter().map(Tile::try_from).collect())
        })
    }
}

/// First stored tile that strictly contains or is contained by `quadkey`.
async fn find_overlapping(
    conn: &mut SqliteConn,
    quadkey: &Quadkey,
) -> Result<Option<Quadkey>, DieselError> {
    let ancestors: Vec<String> = quadkey
        .ancestors()
        .into_iter()
        .map(String::from)
        .collect();
    let descendants = format!("{}_%", quadkey.as_str());

    let found = grid_tiles::table
        .filter(
            grid_tiles::quadkey
                .eq_any(ancestors)
                .or(grid_tiles::quadkey.like(descendants)),
        )
        .select(grid_tiles::quadkey)
        .first::<String>(conn)
        .await
        .optional()?;

    found
        .map(|k| Quadkey::parse(&k).map_err(|e| corrupt_column("grid_tiles.quadkey", &k, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrations;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, GridRepository) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db_url = format!("sqlite:{}", db_path.display());
        migrations::run_migrations(&db_url).await.unwrap();
        let repo = GridRepository::new(DbPool::from_url(&db_url).unwrap());
        (dir, repo)
    }

    fn qk(s: &str) -> Quadkey {
        Quadkey::parse(s).unwrap()
    }

    async fn insert(repo: &GridRepository, key: &str) -> TileInsert {
        repo.insert_tile(&GridRepository::create_tile_from_address(&qk(key)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_overlaps() {
        let (_dir, repo) = setup().await;

        let TileInsert::Inserted(tile) = insert(&repo, "0313").await else {
            panic!("expected insert");
        };
        assert_eq!(tile.quadkey, qk("0313"));
        assert_eq!(tile.estimated_count(), None);
        assert_eq!(tile.xyz.z, 4);

        assert_eq!(insert(&repo, "0313").await, TileInsert::AlreadyExists);
        assert_eq!(insert(&repo, "03").await, TileInsert::Overlaps(qk("0313")));
        assert_eq!(insert(&repo, "03132").await, TileInsert::Overlaps(qk("0313")));
        assert_eq!(insert(&repo, "").await, TileInsert::Overlaps(qk("0313")));
        assert!(matches!(insert(&repo, "0312").await, TileInsert::Inserted(_)));
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ancestor_or_descendant_lookup() {
        let (_dir, repo) = setup().await;
        insert(&repo, "1202").await;

        assert!(repo.has_ancestor_or_descendant(&qk("12")).await.unwrap());
        assert!(repo.has_ancestor_or_descendant(&qk("120231")).await.unwrap());
        assert!(repo.has_ancestor_or_descendant(&Quadkey::root()).await.unwrap());
        assert!(!repo.has_ancestor_or_descendant(&qk("1202")).await.unwrap());
        assert!(!repo.has_ancestor_or_descendant(&qk("1203")).await.unwrap());
        assert!(!repo.has_ancestor_or_descendant(&qk("2")).await.unwrap());
    }

    #[tokio::test]
    async fn replace_with_children_swaps_exactly_one_tile() {
        let (_dir, repo) = setup().await;
        insert(&repo, "0231").await;
        insert(&repo, "0232").await;

        let children = repo.replace_with_children(&qk("0231")).await.unwrap();
        assert_eq!(children, qk("0231").children());
        assert!(!repo.has_tile(&qk("0231")).await.unwrap());

        let keys: Vec<String> = repo
            .all_quadkeys()
            .await
            .unwrap()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(keys, vec!["02310", "02311", "02312", "02313", "0232"]);

        let err = repo.replace_with_children(&qk("0231")).await.unwrap_err();
        assert!(matches!(err, DieselError::NotFound));
    }

    #[tokio::test]
    async fn failed_replacement_rolls_back() {
        let (_dir, repo) = setup().await;
        insert(&repo, "01").await;

        // Plant a conflicting child directly so the third insert fails
        let now = format_datetime(&Utc::now());
        let planted = NewTileRecord::from_new_tile(&NewTile::from_quadkey(&qk("012")), &now);
        let mut conn = repo.pool.get().await.unwrap();
        diesel::insert_into(grid_tiles::table)
            .values(&planted)
            .execute(&mut conn)
            .await
            .unwrap();
        drop(conn);

        assert!(repo.replace_with_children(&qk("01")).await.is_err());
        assert!(repo.has_tile(&qk("01")).await.unwrap());
        assert!(!repo.has_tile(&qk("010")).await.unwrap());
        assert!(!repo.has_tile(&qk("011")).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_selection_orders_unscanned_first() {
        let (_dir, repo) = setup().await;
        for key in ["10", "11", "12"] {
            insert(&repo, key).await;
        }
        let now = Utc::now();
        repo.mark_scanned(&qk("10"), now - chrono::Duration::hours(48)).await.unwrap();
        repo.mark_scanned(&qk("11"), now - chrono::Duration::hours(1)).await.unwrap();

        let stale = repo
            .select_stale(now - chrono::Duration::hours(24), 0, 10)
            .await
            .unwrap();
        let keys: Vec<&str> = stale.iter().map(|t| t.quadkey.as_str()).collect();
        assert_eq!(keys, vec!["12", "10"]);

        assert!(repo.record_estimate(&qk("12"), Some(37), now).await.unwrap());
        assert_eq!(repo.get(&qk("12")).await.unwrap().unwrap().estimated_count(), Some(37));
        assert!(!repo.mark_scanned(&qk("33"), now).await.unwrap());
    }
}
