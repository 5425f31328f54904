//! List command implementation.

use crate::cli::Cli;
use crate::config::Config;
use crate::dest::{Destination, LatestStatus};
use crate::retention;
use crate::Result;
use chrono::Utc;

/// Print the snapshots at the destination and the partition the
/// retention planner would compute right now. Touches nothing.
pub async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let dest = Destination::new(config.destination_endpoint());

    let snapshots = dest.list_snapshots().await?;
    if snapshots.is_empty() {
        println!("No snapshots at {}", dest.root());
        return Ok(());
    }

    let latest = match dest.latest_status().await? {
        LatestStatus::Valid(name) => Some(name),
        LatestStatus::Absent => None,
        LatestStatus::Broken => {
            println!("Warning: the latest marker is broken");
            None
        }
    };

    let plan = retention::plan(&snapshots, &config.smart_remove, Utc::now().naive_utc());
    println!("Snapshots at {} (keep/remove per current policy):", dest.root());
    for snapshot in &snapshots {
        let verdict = if plan.keep.contains(snapshot) { "keep" } else { "remove" };
        let marker = if latest.as_deref() == Some(snapshot.name.as_str()) {
            "  <- latest"
        } else {
            ""
        };
        println!("  {}  {:6}{marker}", snapshot.name, verdict);
    }
    println!("{} total, {} kept, {} to remove", snapshots.len(), plan.keep.len(), plan.remove.len());
    Ok(())
}
