//! Snapshot deletion.
//!
//! The pruner deletes the snapshots the retention planner marked for
//! removal. Each deletion stands alone: one failure is recorded and
//! skipped, the rest of the batch proceeds. Deleting a snapshot never
//! touches data still hard-linked from a surviving snapshot, so deletion
//! order is irrelevant to correctness.

use crate::dest::{Destination, LatestStatus};
use crate::error::Error;
use crate::snapshot::Snapshot;
use tracing::{info, warn};

/// Result of one pruning pass.
#[derive(Debug, Default)]
pub struct PruneOutcome {
    /// Snapshots actually deleted.
    pub removed: usize,
    /// Per-snapshot failures, each an [`Error::Prune`].
    pub failures: Vec<Error>,
}

/// Delete every snapshot in `remove`, isolating per-item failures.
///
/// The snapshot the `latest` marker resolves to is never deleted here,
/// whatever the plan says: a marker pointing at a removed directory would
/// be a data-integrity error for the next run's seeding step.
pub async fn prune(dest: &Destination, remove: &[Snapshot]) -> PruneOutcome {
    let mut outcome = PruneOutcome::default();
    if remove.is_empty() {
        info!("no snapshot to remove");
        return outcome;
    }

    let latest = match dest.latest_status().await {
        Ok(LatestStatus::Valid(name)) => Some(name),
        Ok(_) => None,
        Err(e) => {
            warn!("cannot resolve latest marker before pruning: {e}");
            None
        }
    };

    for snapshot in remove {
        if latest.as_deref() == Some(snapshot.name.as_str()) {
            let failure = Error::Prune {
                snapshot: snapshot.name.clone(),
                cause: "still referenced by the latest marker".into(),
            };
            warn!("{failure}");
            outcome.failures.push(failure);
            continue;
        }

        info!("deleting snapshot {}", snapshot.name);
        match dest.remove_tree(&snapshot.name).await {
            Ok(()) => outcome.removed += 1,
            Err(e) => {
                let failure = Error::Prune {
                    snapshot: snapshot.name.clone(),
                    cause: e.to_string(),
                };
                warn!("{failure}");
                outcome.failures.push(failure);
            }
        }
    }
    outcome
}
