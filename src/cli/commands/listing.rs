//! Listing commands.

use console::style;

use crate::config::Settings;

use super::helpers::{format_time, open_repos};

/// Show one listing with its refresh times and position history.
pub async fn cmd_listing_show(settings: &Settings, id: i64) -> anyhow::Result<()> {
    let repos = open_repos(settings).await?;
    let Some(listing) = repos.listings.get(id).await? else {
        eprintln!("{} Listing {} not found", style("!").yellow(), id);
        return Ok(());
    };

    println!("\n{}", style(format!("Listing {}", listing.id)).bold());
    println!("{}", "-".repeat(40));
    println!("{:<16} {:.6}, {:.6}", "Position:", listing.lat, listing.lng);
    println!("{:<16} {}", "First seen:", format_time(Some(listing.created_at)));
    println!("{:<16} {}", "Updated:", format_time(Some(listing.updated_at)));
    println!("{:<16} {}", "Calendar:", format_time(listing.calendar_updated_at));
    println!("{:<16} {}", "Reviews:", format_time(listing.reviews_updated_at));
    println!("{:<16} {}", "Details:", format_time(listing.details_updated_at));
    println!("{:<16} {}", "Booking quote:", format_time(listing.booking_updated_at));

    if !listing.relocations.is_empty() {
        println!("\n{}", style("Relocations").bold());
        for r in &listing.relocations {
            println!(
                "  {}  {:.6},{:.6} -> {:.6},{:.6}  ({:.0} m)",
                format_time(Some(r.at)),
                r.from_lat,
                r.from_lng,
                r.to_lat,
                r.to_lng,
                r.distance_m
            );
        }
    }
    Ok(())
}
