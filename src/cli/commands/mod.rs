//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod aoi;
mod grid;
mod helpers;
mod init;
mod listing;
mod periodic;
mod tasks;
mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "rentgrid")]
#[command(about = "Adaptive grid crawler for vacation-rental listings")]
#[command(version)]
pub struct Cli {
    /// Data directory or database file (overrides config file).
    /// Can be a directory containing rentgrid.db or a .db file directly.
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Add a single tile to the grid
    AddQuadkey {
        /// Quadkey of the tile (digits 0-3)
        quadkey: String,
    },

    /// Scan a stored tile for listings
    ScanQuadkey {
        quadkey: String,
        /// Run the first step inline instead of submitting a task
        #[arg(long)]
        now: bool,
        /// Task priority (0-9)
        #[arg(long, default_value = "5")]
        priority: u8,
    },

    /// Store an area of interest
    AddAoi {
        /// Bounds as west,south,east,north
        #[arg(long)]
        bbox: String,
        /// AOI name (defaults to the bbox)
        #[arg(long)]
        name: Option<String>,
        /// Seed the grid with tiles covering the area
        #[arg(long)]
        create_grid: bool,
        /// Zoom of seeded tiles (default: seed_zoom setting)
        #[arg(long)]
        seed_zoom: Option<u8>,
        /// Do not collect calendars for this area
        #[arg(long)]
        without_calendars: bool,
        /// Do not collect reviews for this area
        #[arg(long)]
        without_reviews: bool,
        /// Do not collect listing details for this area
        #[arg(long)]
        without_details: bool,
        /// Do not collect booking quotes for this area
        #[arg(long)]
        without_booking_quotes: bool,
        /// Do not rescan this area for new listings
        #[arg(long)]
        without_scan: bool,
    },

    /// Areas of interest
    Aoi {
        #[command(subcommand)]
        command: AoiCommands,
    },

    /// Inspect the discovery grid
    Grid {
        #[command(subcommand)]
        command: GridCommands,
    },

    /// Submit a periodic selection
    Periodic {
        /// scan_stale_tiles, refresh_calendars, refresh_reviews,
        /// refresh_listing_details or refresh_booking_quotes
        operation: String,
        /// Maximum number of entities to select
        #[arg(long, default_value = "100")]
        how_many: i64,
        /// Select entities older than this many hours
        #[arg(long, default_value = "24")]
        age_hours: f64,
        /// Only select entities inside an enabled area of interest
        #[arg(long)]
        use_aoi: bool,
        /// Priority of the submitted tasks (0-9)
        #[arg(long, default_value = "0")]
        priority: i64,
        /// Select and submit inline instead of queueing the selection
        #[arg(long)]
        now: bool,
    },

    /// Run queue workers
    Worker {
        /// Number of concurrent task loops
        #[arg(short = 'n', long, default_value = "4")]
        concurrency: usize,
    },

    /// Submit scheduled periodic operations when they are due
    Beat {
        /// Seconds between schedule checks
        #[arg(long, default_value = "60")]
        interval: u64,
    },

    /// List recent tasks
    Tasks {
        /// Filter by status (submitted, started, retry, success, failure, revoked)
        #[arg(short, long)]
        status: Option<String>,
        /// Filter by group id
        #[arg(short, long)]
        group: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Revoke a task that has not finished
    Revoke {
        task_id: String,
    },

    /// Listings
    Listing {
        #[command(subcommand)]
        command: ListingCommands,
    },
}

#[derive(Subcommand)]
enum AoiCommands {
    /// List areas of interest
    List,
}

#[derive(Subcommand)]
enum GridCommands {
    /// List stored tiles
    List {
        /// Only tiles under this quadkey
        #[arg(long)]
        prefix: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Tile counts by depth
    Stats,
}

#[derive(Subcommand)]
enum ListingCommands {
    /// Show one listing
    Show { id: i64 },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data: cli.target,
    };
    let (settings, _config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::AddQuadkey { quadkey } => grid::cmd_add_quadkey(&settings, &quadkey).await,
        Commands::ScanQuadkey {
            quadkey,
            now,
            priority,
        } => grid::cmd_scan_quadkey(&settings, &quadkey, now, priority).await,
        Commands::AddAoi {
            bbox,
            name,
            create_grid,
            seed_zoom,
            without_calendars,
            without_reviews,
            without_details,
            without_booking_quotes,
            without_scan,
        } => {
            let flags = crate::models::AoiFlags {
                collect_calendars: !without_calendars,
                collect_reviews: !without_reviews,
                collect_details: !without_details,
                collect_booking_quotes: !without_booking_quotes,
                scan_for_new_listings: !without_scan,
            };
            aoi::cmd_add_aoi(&settings, &bbox, name, create_grid, seed_zoom, flags).await
        }
        Commands::Aoi { command } => match command {
            AoiCommands::List => aoi::cmd_aoi_list(&settings).await,
        },
        Commands::Grid { command } => match command {
            GridCommands::List { prefix, limit } => {
                grid::cmd_grid_list(&settings, prefix.as_deref(), limit).await
            }
            GridCommands::Stats => grid::cmd_grid_stats(&settings).await,
        },
        Commands::Periodic {
            operation,
            how_many,
            age_hours,
            use_aoi,
            priority,
            now,
        } => {
            let args = crate::periodic::PeriodicArgs {
                how_many,
                age_hours,
                use_aoi,
                priority,
            };
            periodic::cmd_periodic(&settings, &operation, args, now).await
        }
        Commands::Worker { concurrency } => worker::cmd_worker(&settings, concurrency).await,
        Commands::Beat { interval } => worker::cmd_beat(&settings, interval).await,
        Commands::Tasks {
            status,
            group,
            limit,
        } => tasks::cmd_tasks(&settings, status.as_deref(), group.as_deref(), limit).await,
        Commands::Revoke { task_id } => tasks::cmd_revoke(&settings, &task_id).await,
        Commands::Listing { command } => match command {
            ListingCommands::Show { id } => listing::cmd_listing_show(&settings, id).await,
        },
    }
}
