//! Worker and beat daemons.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use tokio::sync::watch;

use crate::config::Settings;
use crate::context::CrawlContext;

/// Flip `tx` to true on Ctrl-C.
fn shutdown_on_ctrl_c(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing tasks in flight");
            let _ = tx.send(true);
        }
    });
}

/// Run queue workers until interrupted.
pub async fn cmd_worker(settings: &Settings, concurrency: usize) -> anyhow::Result<()> {
    if concurrency == 0 {
        anyhow::bail!("concurrency must be at least 1");
    }
    let ctx = CrawlContext::open(settings.clone()).await?;
    let worker = Arc::new(ctx.worker());

    println!(
        "{} Worker started with {} loops on {}",
        style("→").cyan(),
        concurrency,
        settings.database_url()
    );

    let (tx, rx) = watch::channel(false);
    shutdown_on_ctrl_c(tx);
    worker.run(concurrency, rx).await;

    println!("{} Worker stopped", style("✓").green());
    Ok(())
}

/// Submit scheduled operations until interrupted.
pub async fn cmd_beat(settings: &Settings, interval: u64) -> anyhow::Result<()> {
    if settings.schedule.is_empty() {
        println!(
            "{} No [[schedule]] entries configured; nothing to do",
            style("!").yellow()
        );
        return Ok(());
    }
    let ctx = CrawlContext::open(settings.clone()).await?;
    let scheduler = ctx.scheduler();

    for entry in &settings.schedule {
        println!(
            "  {} {} every {}h",
            style("•").dim(),
            entry.operation,
            entry.every_hours
        );
    }

    let (tx, rx) = watch::channel(false);
    shutdown_on_ctrl_c(tx);
    scheduler.run(Duration::from_secs(interval.max(1)), rx).await;

    println!("{} Beat stopped", style("✓").green());
    Ok(())
}
