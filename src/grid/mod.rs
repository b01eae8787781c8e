//! Quadtree tile addressing and geometry.
//!
//! Tiles are addressed with Bing-style quadkeys: a string of digits `0..=3`
//! whose length is the zoom level. The empty quadkey is the root tile that
//! covers the whole Web Mercator world.

mod bbox;
mod cover;
mod quadkey;

pub use bbox::{bbox_to_tile, BBox};
pub use cover::covering;
pub use quadkey::{quadkey_to_bbox, Quadkey, TileXyz, MAX_ZOOM};

use thiserror::Error;

/// Latitude limit of the Web Mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GridError {
    #[error("invalid quadkey '{quadkey}': unexpected character '{found}'")]
    InvalidQuadkey { quadkey: String, found: char },

    #[error("quadkey '{0}' is deeper than zoom {max}", max = MAX_ZOOM)]
    TooDeep(String),

    #[error("invalid bounding box: {0}")]
    InvalidBBox(String),
}
