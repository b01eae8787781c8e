//! rentgrid - adaptive grid crawler for vacation-rental listings.
//!
//! Discovers listings by splitting a map region into quadtree tiles until
//! every tile's search results fit on one page, and keeps per-listing
//! resources fresh with periodic, AOI-filtered refreshes.

#![allow(clippy::should_implement_trait)]

pub mod cli;
pub mod config;
pub mod context;
pub mod discovery;
pub mod grid;
pub mod migrations;
pub mod models;
pub mod operations;
pub mod periodic;
pub mod refresh;
pub mod repository;
pub mod schema;
pub mod vendor;
pub mod work_queue;
