use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use geo::{coord, Distance, Haversine, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};

use super::{GridError, Quadkey, MAX_LATITUDE, MAX_ZOOM};

/// Inward nudge applied to every edge so a tile's own bounds resolve to the
/// tile rather than its neighbours.
const EDGE_EPSILON: f64 = 1e-9;

/// Axis-aligned geographic bounds in WGS84 degrees.
///
/// `west > east` denotes a box that crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, GridError> {
        for (name, value, limit) in [
            ("west", west, 180.0),
            ("east", east, 180.0),
            ("south", south, 90.0),
            ("north", north, 90.0),
        ] {
            if !value.is_finite() || value.abs() > limit {
                return Err(GridError::InvalidBBox(format!(
                    "{name} = {value} is outside [-{limit}, {limit}]"
                )));
            }
        }
        if south > north {
            return Err(GridError::InvalidBBox(format!(
                "south ({south}) is above north ({north})"
            )));
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    pub fn straddles_antimeridian(&self) -> bool {
        self.west > self.east
    }

    pub fn straddles_equator(&self) -> bool {
        self.south < 0.0 && self.north > 0.0
    }

    pub fn center(&self) -> Point<f64> {
        Point::new((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }

    pub fn contains_point(&self, lng: f64, lat: f64) -> bool {
        lat >= self.south && lat <= self.north && lng >= self.west && lng <= self.east
    }

    /// True when the two boxes share interior area or an edge.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.west, y: self.south },
            coord! { x: self.east, y: self.north },
        )
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    /// East-west extent in meters, measured along the middle latitude.
    pub fn width_m(&self) -> f64 {
        let lat = (self.south + self.north) / 2.0;
        Haversine.distance(Point::new(self.west, lat), Point::new(self.east, lat))
    }

    /// North-south extent in meters.
    pub fn height_m(&self) -> f64 {
        let lng = (self.west + self.east) / 2.0;
        Haversine.distance(Point::new(lng, self.south), Point::new(lng, self.north))
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

/// Parses `west,south,east,north`.
impl FromStr for BBox {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| GridError::InvalidBBox(format!("'{s}': {e}")))?;
        match parts.as_slice() {
            [west, south, east, north] => BBox::new(*west, *south, *east, *north),
            _ => Err(GridError::InvalidBBox(format!(
                "'{s}': expected four comma-separated numbers"
            ))),
        }
    }
}

fn point_to_tile(lng: f64, lat: f64, zoom: u8) -> Quadkey {
    let n = f64::from(1u32 << zoom);
    let max_index = (1u32 << zoom) - 1;
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();

    let x = ((lng + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n).floor();

    let clamp = |v: f64| (v.max(0.0) as u32).min(max_index);
    // from_xyz only fails above MAX_ZOOM, which callers never pass
    Quadkey::from_xyz(super::TileXyz {
        x: clamp(x),
        y: clamp(y),
        z: zoom,
    })
    .unwrap_or_else(|_| Quadkey::root())
}

/// Smallest tile that fully encloses `bbox`.
///
/// With `zoom` set, the enclosing tile is coarsened to at most that zoom.
/// Boxes crossing the antimeridian or the equator only fit in the root tile.
pub fn bbox_to_tile(bbox: &BBox, zoom: Option<u8>) -> Quadkey {
    if bbox.straddles_antimeridian() || bbox.straddles_equator() {
        return Quadkey::root();
    }

    let inset_x = EDGE_EPSILON.min((bbox.east - bbox.west) / 2.0);
    let inset_y = EDGE_EPSILON.min((bbox.north - bbox.south) / 2.0);
    let north_west = point_to_tile(bbox.west + inset_x, bbox.north - inset_y, MAX_ZOOM);
    let south_east = point_to_tile(bbox.east - inset_x, bbox.south + inset_y, MAX_ZOOM);

    let common = north_west
        .as_str()
        .bytes()
        .zip(south_east.as_str().bytes())
        .take_while(|(a, b)| a == b)
        .count();
    let enclosing = north_west.truncate(common as u8);

    match zoom {
        Some(z) => enclosing.truncate(z),
        None => enclosing,
    }
}
