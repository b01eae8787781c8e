//! Grid commands.

use console::style;
use serde_json::json;

use crate::config::Settings;
use crate::context::CrawlContext;
use crate::discovery::{DiscoveryError, DISCOVER_TILE};
use crate::grid::Quadkey;
use crate::models::NewTile;
use crate::repository::TileInsert;
use crate::work_queue::{end_of_day, TaskQueue, TaskSpec};

use super::helpers::{format_time, open_repos, queue};

/// Add a single tile to the grid.
pub async fn cmd_add_quadkey(settings: &Settings, quadkey: &str) -> anyhow::Result<()> {
    let quadkey = Quadkey::parse(quadkey)?;
    let repos = open_repos(settings).await?;

    match repos.grid.insert_tile(&NewTile::from_quadkey(&quadkey)).await? {
        TileInsert::Inserted(tile) => println!(
            "{} Added tile {} ({:.0} x {:.0} m)",
            style("✓").green(),
            tile.quadkey,
            tile.width_m,
            tile.height_m
        ),
        TileInsert::AlreadyExists => {
            println!("{} Tile {} already exists", style("!").yellow(), quadkey)
        }
        TileInsert::Overlaps(other) => anyhow::bail!(
            "tile {} overlaps stored tile {}",
            quadkey,
            other
        ),
    }
    Ok(())
}

/// Scan a stored tile, inline or through the queue.
pub async fn cmd_scan_quadkey(
    settings: &Settings,
    quadkey: &str,
    now: bool,
    priority: u8,
) -> anyhow::Result<()> {
    let quadkey = Quadkey::parse(quadkey)?;

    if now {
        let ctx = CrawlContext::open(settings.clone()).await?;
        return match ctx.discovery().process(&quadkey, None, priority).await {
            Ok(report) => {
                println!("{} {}", style("✓").green(), report);
                Ok(())
            }
            Err(DiscoveryError::TileNotFound(qk)) => {
                eprintln!("{} Tile {} not found", style("!").yellow(), qk);
                Ok(())
            }
            Err(e) => Err(e.into()),
        };
    }

    let repos = open_repos(settings).await?;
    if !repos.grid.has_tile(&quadkey).await? {
        eprintln!("{} Tile {} not found", style("!").yellow(), quadkey);
        return Ok(());
    }
    let spec = TaskSpec::new(DISCOVER_TILE, json!({ "quadkey": quadkey.as_str() }))
        .with_priority(priority)
        .expires_at(end_of_day(chrono::Utc::now()));
    let handle = queue(settings, &repos).submit(spec).await?;
    println!(
        "{} Submitted {} for {} as task {}",
        style("✓").green(),
        DISCOVER_TILE,
        quadkey,
        handle.id
    );
    Ok(())
}

/// List stored tiles.
pub async fn cmd_grid_list(settings: &Settings, prefix: Option<&str>, limit: i64) -> anyhow::Result<()> {
    let prefix = prefix.map(Quadkey::parse).transpose()?;
    let repos = open_repos(settings).await?;
    let tiles = repos.grid.list(prefix.as_ref(), limit).await?;

    if tiles.is_empty() {
        println!("{} No tiles", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<24} {:>5} {:>9} {:>9} {:<17}",
        "Quadkey", "Zoom", "Width m", "Listings", "Scanned"
    );
    println!("{}", "-".repeat(68));
    for tile in tiles {
        println!(
            "{:<24} {:>5} {:>9.0} {:>9} {:<17}",
            tile.quadkey.as_str(),
            tile.quadkey.depth(),
            tile.width_m,
            tile.estimated_count()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string()),
            format_time(tile.scanned_at),
        );
    }
    Ok(())
}

/// Tile counts by depth.
pub async fn cmd_grid_stats(settings: &Settings) -> anyhow::Result<()> {
    let repos = open_repos(settings).await?;
    let total = repos.grid.count().await?;
    let by_depth = repos.grid.count_by_depth().await?;

    println!("\n{}", style("Grid").bold());
    println!("{}", "-".repeat(30));
    for (depth, count) in by_depth {
        println!("  zoom {:<4} {:>10}", depth, count);
    }
    println!("  {:<9} {:>10}", "total", total);
    println!("  {:<9} {:>10}", "listings", repos.listings.count().await?);
    Ok(())
}
