//! Stall detection: reclaiming leases whose worker went silent.
//!
//! A lease (or processing job) whose heartbeat is older than
//! `tick * max_lease_multiplier` is handed back to the queue tail, or failed
//! once it has been reclaimed more than `max_retries` times. Reclaims are
//! compare-and-remove on the store side, so concurrent sweeps from several
//! coordinators never requeue the same job twice.

use db::{JobStore, ReclaimOutcome, Reclaimed, StoreError};
use queue_core::{Millis, QueueConfig, QueueName};

/// Result of one sweep over every known queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Number of queues visited.
    pub queues_scanned: usize,
    /// Every reclaimed lease with its queue.
    pub reclaimed: Vec<(QueueName, Reclaimed)>,
    /// Queues whose sweep failed; they are retried on the next tick.
    pub errors: usize,
    /// Queues dropped from the registry because they held no jobs.
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty()
    }

    /// Number of reclaims with the given outcome.
    pub fn count(&self, outcome: ReclaimOutcome) -> usize {
        self.reclaimed
            .iter()
            .filter(|(_, entry)| entry.outcome == outcome)
            .count()
    }
}

/// Reclaim stalled leases of one queue.
pub async fn sweep_queue<S: JobStore>(
    store: &S,
    queue: &QueueName,
    config: &QueueConfig,
    now: Millis,
) -> Result<Vec<Reclaimed>, StoreError> {
    let cutoff = config.stall_cutoff(now);
    let reclaimed = store
        .reclaim_stalled(queue, cutoff, config.max_retries, now)
        .await?;

    for entry in &reclaimed {
        match entry.outcome {
            ReclaimOutcome::Requeued => tracing::warn!(
                queue = %queue,
                job_id = %entry.job_id,
                retry_count = entry.retry_count,
                "Stalled job requeued"
            ),
            ReclaimOutcome::Failed => tracing::error!(
                queue = %queue,
                job_id = %entry.job_id,
                retry_count = entry.retry_count,
                "Stalled job exceeded retry limit"
            ),
            ReclaimOutcome::Orphaned => tracing::error!(
                queue = %queue,
                job_id = %entry.job_id,
                "Stalled lease had no stored document"
            ),
        }
    }

    Ok(reclaimed)
}

/// Reclaim stalled leases of every queue in the store registry.
///
/// A failing queue is logged and skipped so the others are still swept.
/// Queues left with no jobs are unregistered; the next enqueue registers
/// them again.
pub async fn sweep_all<S: JobStore>(
    store: &S,
    config: &QueueConfig,
    now: Millis,
) -> Result<SweepReport, StoreError> {
    let queues = store.queues().await?;
    let mut report = SweepReport {
        queues_scanned: queues.len(),
        ..Default::default()
    };

    for queue in queues {
        match sweep_queue(store, &queue, config, now).await {
            Ok(reclaimed) => {
                report
                    .reclaimed
                    .extend(reclaimed.into_iter().map(|entry| (queue.clone(), entry)));
                match store.prune_queue(&queue).await {
                    Ok(true) => report.pruned += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(queue = %queue, error = %e, "Failed to prune queue"),
                }
            }
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, "Stall sweep failed");
                report.errors += 1;
            }
        }
    }

    Ok(report)
}
