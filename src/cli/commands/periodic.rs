//! Periodic selection command.

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::periodic::{PeriodicArgs, PeriodicOperation, PeriodicSelector};
use crate::work_queue::{TaskQueue, TaskSpec};

use super::helpers::{open_repos, queue};

/// Submit a periodic operation, or run its selection inline with `now`.
pub async fn cmd_periodic(
    settings: &Settings,
    operation: &str,
    args: PeriodicArgs,
    now: bool,
) -> anyhow::Result<()> {
    let Some(operation) = PeriodicOperation::from_str(operation) else {
        let known: Vec<&str> = PeriodicOperation::ALL.iter().map(|op| op.as_str()).collect();
        anyhow::bail!(
            "unknown periodic operation {:?} (expected one of: {})",
            operation,
            known.join(", ")
        );
    };
    args.validate()?;

    let repos = open_repos(settings).await?;
    let queue = queue(settings, &repos);

    if now {
        let report = PeriodicSelector::new(&repos, queue)
            .run(operation, &args, Utc::now())
            .await?;
        match report.group {
            Some(group) => println!(
                "{} Selected {} for {} (group {})",
                style("✓").green(),
                report.selected.len(),
                operation.child_operation(),
                group.id
            ),
            None => println!("{} Nothing to do for {}", style("!").yellow(), operation),
        }
        return Ok(());
    }

    let priority = u8::try_from(args.priority)?;
    let spec = TaskSpec::new(operation.as_str(), serde_json::to_value(&args)?).with_priority(priority);
    let handle = queue.submit(spec).await?;
    println!(
        "{} Submitted {} as task {}",
        style("✓").green(),
        operation,
        handle.id
    );
    Ok(())
}
