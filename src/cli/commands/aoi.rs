//! Area-of-interest commands.

use console::style;

use crate::config::Settings;
use crate::grid::{covering, BBox, MAX_ZOOM};
use crate::models::{AoiFlag, AoiFlags, NewAoi, NewTile};
use crate::repository::TileInsert;

use super::helpers::open_repos;

/// Store an AOI, optionally seeding the grid over it.
pub async fn cmd_add_aoi(
    settings: &Settings,
    bbox: &str,
    name: Option<String>,
    create_grid: bool,
    seed_zoom: Option<u8>,
    flags: AoiFlags,
) -> anyhow::Result<()> {
    let bbox: BBox = bbox.parse()?;
    let zoom = seed_zoom.unwrap_or(settings.seed_zoom);
    if zoom > settings.max_depth || zoom >= MAX_ZOOM {
        anyhow::bail!("seed zoom {} is deeper than max_depth {}", zoom, settings.max_depth);
    }

    let name = name.unwrap_or_else(|| bbox.to_string());
    let new_aoi = NewAoi::from_bbox(name, &bbox, flags)?;

    let repos = open_repos(settings).await?;
    let aoi = repos.aois.insert(&new_aoi).await?;
    println!("{} Added AOI {} ({})", style("✓").green(), aoi.id, aoi.name);

    if !create_grid {
        return Ok(());
    }

    let mut inserted = 0;
    let mut skipped = 0;
    for quadkey in covering(&aoi.geometry, zoom) {
        match repos.grid.insert_tile(&NewTile::from_quadkey(&quadkey)).await? {
            TileInsert::Inserted(_) => inserted += 1,
            TileInsert::AlreadyExists => skipped += 1,
            TileInsert::Overlaps(other) => {
                tracing::debug!("Skipping {}: overlaps stored tile {}", quadkey, other);
                skipped += 1;
            }
        }
    }
    println!(
        "  {} Seeded {} tiles at zoom {} ({} already covered)",
        style("✓").green(),
        inserted,
        zoom,
        skipped
    );
    Ok(())
}

/// List areas of interest.
pub async fn cmd_aoi_list(settings: &Settings) -> anyhow::Result<()> {
    let repos = open_repos(settings).await?;
    let aois = repos.aois.list().await?;

    if aois.is_empty() {
        println!("{} No areas of interest", style("!").yellow());
        return Ok(());
    }

    let flags = [
        AoiFlag::Calendars,
        AoiFlag::Reviews,
        AoiFlag::Details,
        AoiFlag::BookingQuotes,
        AoiFlag::ScanForNewListings,
    ];
    for aoi in aois {
        let enabled: Vec<&str> = flags
            .iter()
            .filter(|flag| aoi.flags.get(**flag))
            .map(|flag| flag.as_str())
            .collect();
        println!(
            "{:>4}  {:<24} {}  [{}]",
            aoi.id,
            aoi.name,
            style(aoi.bbox.to_string()).dim(),
            enabled.join(", ")
        );
    }
    Ok(())
}
