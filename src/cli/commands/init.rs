//! Initialize command.

use console::style;

use crate::config::Settings;

use super::helpers::open_repos;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let repos = open_repos(settings).await?;
    let tiles = repos.grid.count().await?;

    if settings.api_base.is_none() {
        println!(
            "{} No vendor API configured; set api_base in rentgrid.toml or RENTGRID_API_BASE",
            style("!").yellow()
        );
    }

    println!(
        "{} Initialized rentgrid in {} ({} tiles)",
        style("✓").green(),
        settings.data_dir.display(),
        tiles
    );

    Ok(())
}
