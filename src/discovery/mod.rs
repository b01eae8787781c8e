//! Adaptive grid discovery.
//!
//! A tile is probed with one search page. Tiles whose results fit on that
//! page are accepted; the rest are split into their four children, or walked
//! page by page once they reach the depth cap.

mod probe;
mod protocol;
mod service;

pub use probe::{ProbeError, ProbeResult, SearchProbe};
pub use protocol::{decide, Outcome, ProbeSummary};
pub use service::{
    DiscoveryError, DiscoveryReport, DiscoveryService, PageCursor, DISCOVER_TILE,
    DISCOVER_TILE_PAGE,
};
