use geo::{BoundingRect, Polygon, Relate};

use super::{bbox_to_tile, BBox, Quadkey};

enum TileAction {
    /// Overlaps the area but is still too coarse.
    Enter,
    /// No shared interior with the area.
    Drop,
    /// Overlaps the area at the requested zoom.
    Return,
}

/// Tiles at `zoom` whose interior overlaps `area`.
///
/// Traversal starts from the tile enclosing the area's bounds, so seeding a
/// small AOI does not walk the whole world. Tiles that only touch the area's
/// boundary are left out. If the enclosing tile is already deeper than
/// `zoom`, its ancestor at `zoom` is the only result.
pub fn covering(area: &Polygon<f64>, zoom: u8) -> Vec<Quadkey> {
    let Some(rect) = area.bounding_rect() else {
        return Vec::new();
    };
    let bounds = BBox {
        west: rect.min().x,
        south: rect.min().y,
        east: rect.max().x,
        north: rect.max().y,
    };
    let start = bbox_to_tile(&bounds, Some(zoom));

    let decide = |tile: &Quadkey| {
        let matrix = area.relate(&tile.bbox().to_polygon());
        if !matrix.is_intersects() || matrix.is_touches() {
            TileAction::Drop
        } else if tile.depth() >= zoom {
            TileAction::Return
        } else {
            TileAction::Enter
        }
    };

    let mut results = Vec::new();
    let mut stack = vec![start];
    while let Some(tile) = stack.pop() {
        match decide(&tile) {
            TileAction::Enter => stack.extend(tile.children().into_iter().rev()),
            TileAction::Return => results.push(tile),
            TileAction::Drop => {}
        }
    }
    results
}
