//! The store contract shared by every backend.

use std::future::Future;
use std::sync::Arc;

use queue_core::{
    Assignment, Job, JobId, JobRecord, Millis, QueueName, ScoreBound, ScoredMember, ScoredSet,
};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// What the stall sweep did with one reclaimed lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimOutcome {
    /// Appended to the queue tail for another attempt.
    Requeued,
    /// Retry limit exceeded; the record is marked failed.
    Failed,
    /// The record document was gone; the lease was dropped.
    Orphaned,
}

impl ReclaimOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimOutcome::Requeued => "requeued",
            ReclaimOutcome::Failed => "failed",
            ReclaimOutcome::Orphaned => "orphaned",
        }
    }
}

impl std::str::FromStr for ReclaimOutcome {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requeued" => Ok(ReclaimOutcome::Requeued),
            "failed" => Ok(ReclaimOutcome::Failed),
            "orphaned" => Ok(ReclaimOutcome::Orphaned),
            other => Err(StoreError::UnexpectedReply(format!(
                "reclaim outcome: {other}"
            ))),
        }
    }
}

/// A lease removed by the stall sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclaimed {
    pub job_id: String,
    pub outcome: ReclaimOutcome,
    /// Retry count after the reclaim.
    pub retry_count: u32,
}

/// Atomic job queue operations over a shared store.
///
/// Each method is one atomic step on the store side, so several coordinator
/// instances can share a store without double assignment.
pub trait JobStore: Send + Sync + 'static {
    /// Persist the record and append the id to the queue tail.
    fn enqueue(&self, job: &Job, now: Millis) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Pop the queue head and lease it at `now`.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    fn lease_next(
        &self,
        queue: &QueueName,
        now: Millis,
    ) -> impl Future<Output = Result<Option<Assignment>, StoreError>> + Send;

    /// Move a leased job to processing. Returns `false` if it was not leased.
    fn accept(
        &self,
        queue: &QueueName,
        job_id: &JobId,
        now: Millis,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Refresh the heartbeat of a leased or processing job and record its
    /// progress. Returns `false` without writing if neither set holds it.
    fn report_progress(
        &self,
        queue: &QueueName,
        job_id: &JobId,
        progress: f64,
        now: Millis,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Drop the job from every state set and persist its final document.
    fn complete(&self, job: &Job, now: Millis) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reclaim leases with a heartbeat strictly below `cutoff`.
    fn reclaim_stalled(
        &self,
        queue: &QueueName,
        cutoff: Millis,
        max_retries: Option<u32>,
        now: Millis,
    ) -> impl Future<Output = Result<Vec<Reclaimed>, StoreError>> + Send;

    /// Record an idle announcement unless a newer one is stored.
    fn record_idle(
        &self,
        queue: &QueueName,
        worker_id: &str,
        at: Millis,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Remove idle workers announced at or before `cutoff`.
    fn purge_idle(
        &self,
        queue: &QueueName,
        cutoff: Millis,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Queued job ids, head first.
    fn list_queued(
        &self,
        queue: &QueueName,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Members of a sorted set within inclusive bounds, by ascending score.
    fn list_scored(
        &self,
        queue: &QueueName,
        set: ScoredSet,
        from: ScoreBound,
        to: ScoreBound,
    ) -> impl Future<Output = Result<Vec<ScoredMember>, StoreError>> + Send;

    /// Queues registered for stall sweeps.
    ///
    /// Enqueue registers a queue; [`JobStore::prune_queue`] drops it again
    /// once it holds no jobs.
    fn queues(&self) -> impl Future<Output = Result<Vec<QueueName>, StoreError>> + Send;

    /// Drop `queue` from the registry if its queued list and its leased and
    /// processing sets are all empty. Returns whether it was removed.
    fn prune_queue(&self, queue: &QueueName) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Fetch a job record.
    fn get_record(
        &self,
        job_id: &JobId,
    ) -> impl Future<Output = Result<Option<JobRecord>, StoreError>> + Send;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore,
{
    fn enqueue(&self, job: &Job, now: Millis) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.as_ref().enqueue(job, now)
    }

    fn lease_next(
        &self,
        queue: &QueueName,
        now: Millis,
    ) -> impl Future<Output = Result<Option<Assignment>, StoreError>> + Send {
        self.as_ref().lease_next(queue, now)
    }

    fn accept(
        &self,
        queue: &QueueName,
        job_id: &JobId,
        now: Millis,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.as_ref().accept(queue, job_id, now)
    }

    fn report_progress(
        &self,
        queue: &QueueName,
        job_id: &JobId,
        progress: f64,
        now: Millis,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.as_ref().report_progress(queue, job_id, progress, now)
    }

    fn complete(&self, job: &Job, now: Millis) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.as_ref().complete(job, now)
    }

    fn reclaim_stalled(
        &self,
        queue: &QueueName,
        cutoff: Millis,
        max_retries: Option<u32>,
        now: Millis,
    ) -> impl Future<Output = Result<Vec<Reclaimed>, StoreError>> + Send {
        self.as_ref().reclaim_stalled(queue, cutoff, max_retries, now)
    }

    fn record_idle(
        &self,
        queue: &QueueName,
        worker_id: &str,
        at: Millis,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.as_ref().record_idle(queue, worker_id, at)
    }

    fn purge_idle(
        &self,
        queue: &QueueName,
        cutoff: Millis,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send {
        self.as_ref().purge_idle(queue, cutoff)
    }

    fn list_queued(
        &self,
        queue: &QueueName,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send {
        self.as_ref().list_queued(queue)
    }

    fn list_scored(
        &self,
        queue: &QueueName,
        set: ScoredSet,
        from: ScoreBound,
        to: ScoreBound,
    ) -> impl Future<Output = Result<Vec<ScoredMember>, StoreError>> + Send {
        self.as_ref().list_scored(queue, set, from, to)
    }

    fn queues(&self) -> impl Future<Output = Result<Vec<QueueName>, StoreError>> + Send {
        self.as_ref().queues()
    }

    fn prune_queue(&self, queue: &QueueName) -> impl Future<Output = Result<bool, StoreError>> + Send {
        self.as_ref().prune_queue(queue)
    }

    fn get_record(
        &self,
        job_id: &JobId,
    ) -> impl Future<Output = Result<Option<JobRecord>, StoreError>> + Send {
        self.as_ref().get_record(job_id)
    }
}
