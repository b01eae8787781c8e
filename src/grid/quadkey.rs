use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{BBox, GridError};

/// Deepest zoom level a quadkey may address.
pub const MAX_ZOOM: u8 = 28;

/// A quadtree tile address.
///
/// Each digit selects one quadrant of the parent tile: `0` north-west,
/// `1` north-east, `2` south-west, `3` south-east.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quadkey(String);

/// Slippy-map tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileXyz {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl Quadkey {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(s: &str) -> Result<Self, GridError> {
        if let Some(found) = s.chars().find(|c| !matches!(c, '0'..='3')) {
            return Err(GridError::InvalidQuadkey {
                quadkey: s.to_string(),
                found,
            });
        }
        if s.len() > MAX_ZOOM as usize {
            return Err(GridError::TooDeep(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Zoom level of the tile (number of digits).
    pub fn depth(&self) -> u8 {
        self.0.len() as u8
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The four quadrants of this tile, in digit order.
    pub fn children(&self) -> [Quadkey; 4] {
        ['0', '1', '2', '3'].map(|digit| {
            let mut key = String::with_capacity(self.0.len() + 1);
            key.push_str(&self.0);
            key.push(digit);
            Quadkey(key)
        })
    }

    pub fn parent(&self) -> Option<Quadkey> {
        if self.is_root() {
            None
        } else {
            Some(self.truncate(self.depth() - 1))
        }
    }

    /// Ancestor at zoom `depth`, or the tile itself if it is not deeper.
    pub fn truncate(&self, depth: u8) -> Quadkey {
        let depth = (depth as usize).min(self.0.len());
        Quadkey(self.0[..depth].to_string())
    }

    /// Every non-empty prefix of this key, shortest first, ending with the key itself.
    pub fn parent_chain(&self) -> Vec<Quadkey> {
        (1..=self.0.len())
            .map(|len| Quadkey(self.0[..len].to_string()))
            .collect()
    }

    /// Strict ancestors, root included, nearest last.
    pub fn ancestors(&self) -> Vec<Quadkey> {
        (0..self.0.len())
            .map(|len| Quadkey(self.0[..len].to_string()))
            .collect()
    }

    /// The other three children of this tile's parent.
    pub fn siblings(&self) -> Vec<Quadkey> {
        match self.parent() {
            Some(parent) => parent
                .children()
                .into_iter()
                .filter(|child| child != self)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_ancestor_of(&self, other: &Quadkey) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }

    /// True when one tile contains the other (equal keys overlap).
    pub fn overlaps(&self, other: &Quadkey) -> bool {
        self.0.starts_with(&other.0) || other.0.starts_with(&self.0)
    }

    pub fn to_xyz(&self) -> TileXyz {
        let z = self.depth();
        let mut x = 0u32;
        let mut y = 0u32;
        for (i, digit) in self.0.bytes().enumerate() {
            let mask = 1u32 << (z as usize - i - 1);
            match digit {
                b'1' => x |= mask,
                b'2' => y |= mask,
                b'3' => {
                    x |= mask;
                    y |= mask;
                }
                _ => {}
            }
        }
        TileXyz { x, y, z }
    }

    pub fn from_xyz(tile: TileXyz) -> Result<Quadkey, GridError> {
        if tile.z > MAX_ZOOM {
            return Err(GridError::TooDeep(format!("{}/{}/{}", tile.z, tile.x, tile.y)));
        }
        let mut key = String::with_capacity(tile.z as usize);
        for level in (1..=tile.z).rev() {
            let mask = 1u32 << (level - 1);
            let mut digit = b'0';
            if tile.x & mask != 0 {
                digit += 1;
            }
            if tile.y & mask != 0 {
                digit += 2;
            }
            key.push(digit as char);
        }
        Ok(Quadkey(key))
    }

    /// Geographic bounds of the tile in WGS84 degrees.
    pub fn bbox(&self) -> BBox {
        let TileXyz { x, y, z } = self.to_xyz();
        let n = f64::from(1u32 << z);
        BBox {
            west: f64::from(x) / n * 360.0 - 180.0,
            east: f64::from(x + 1) / n * 360.0 - 180.0,
            north: tile_y_to_lat(f64::from(y), n),
            south: tile_y_to_lat(f64::from(y + 1), n),
        }
    }
}

fn tile_y_to_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Bounds of the tile addressed by `quadkey`.
pub fn quadkey_to_bbox(quadkey: &str) -> Result<BBox, GridError> {
    Ok(Quadkey::parse(quadkey)?.bbox())
}

impl fmt::Display for Quadkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl FromStr for Quadkey {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quadkey::parse(s)
    }
}

impl TryFrom<String> for Quadkey {
    type Error = GridError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Quadkey::parse(&value)
    }
}

impl From<Quadkey> for String {
    fn from(value: Quadkey) -> Self {
        value.0
    }
}
