//! The subdivision decision, free of I/O.

use crate::grid::Quadkey;

/// What a search probe said about a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSummary {
    pub has_next_page: bool,
    pub total_count: Option<i64>,
    /// Offset of the page after the one probed.
    pub next_offset: u32,
}

/// What to do with a probed tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// One page held every listing; the tile is done.
    Accepted { estimated_count: Option<i64> },
    /// Too many listings for one page; replace the tile with its children.
    SubdivideInto([Quadkey; 4]),
    /// Too many listings but the tile is at the depth cap; walk the pages instead.
    ContinuePagination {
        items_offset: u32,
        estimated_count: Option<i64>,
    },
}

/// Decide how to proceed with `quadkey` after probing its first page.
pub fn decide(quadkey: &Quadkey, probe: &ProbeSummary, max_depth: u8) -> Outcome {
    if !probe.has_next_page {
        Outcome::Accepted {
            estimated_count: probe.total_count,
        }
    } else if quadkey.depth() >= max_depth {
        Outcome::ContinuePagination {
            items_offset: probe.next_offset,
            estimated_count: probe.total_count,
        }
    } else {
        Outcome::SubdivideInto(quadkey.children())
    }
}
