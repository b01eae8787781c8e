//! Grid tile models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grid::{BBox, Quadkey, TileXyz};

/// Sentinel stored in `estimated_count` until a search probe has reported a total.
pub const UNKNOWN_COUNT: i64 = -1;

/// A persisted leaf of the discovery grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: i32,
    pub quadkey: Quadkey,
    pub xyz: TileXyz,
    pub bbox: BBox,
    pub width_m: f64,
    pub height_m: f64,
    /// Listing total reported by the vendor, or [`UNKNOWN_COUNT`].
    pub estimated_count: i64,
    pub count_updated_at: Option<DateTime<Utc>>,
    /// When the tile was last fully scanned.
    pub scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Tile {
    pub fn estimated_count(&self) -> Option<i64> {
        (self.estimated_count != UNKNOWN_COUNT).then_some(self.estimated_count)
    }
}

/// A tile built from its address alone, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTile {
    pub quadkey: Quadkey,
    pub xyz: TileXyz,
    pub bbox: BBox,
    pub width_m: f64,
    pub height_m: f64,
}

impl NewTile {
    /// Derive coordinates, bounds and metric size from a quadkey.
    pub fn from_quadkey(quadkey: &Quadkey) -> Self {
        let bbox = quadkey.bbox();
        Self {
            quadkey: quadkey.clone(),
            xyz: quadkey.to_xyz(),
            width_m: bbox.width_m(),
            height_m: bbox.height_m(),
            bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tile_carries_geometry() {
        let quadkey = Quadkey::parse("03131").unwrap();
        let tile = NewTile::from_quadkey(&quadkey);
        assert_eq!(tile.xyz.z, 5);
        assert_eq!(tile.bbox, quadkey.bbox());
        assert!(tile.width_m > 0.0 && tile.height_m > 0.0);
    }
}
