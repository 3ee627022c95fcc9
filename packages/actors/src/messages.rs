//! Message types for actor communication.

use db::StoreError;
use queue_core::{Assignment, Job, JobId, ListRequest, Millis, QueueListing, QueueName};
use ractor::{ActorRef, RpcReplyPort};

use crate::SweepReport;

/// Reply port carrying a coordinator result.
pub type Reply<T> = RpcReplyPort<Result<T, CoordinatorError>>;

/// Messages for the CoordinatorActor.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Enqueue a new job.
    Enqueue { job: Box<Job>, reply: Reply<()> },

    /// Lease the next job of a queue to a worker.
    Lease {
        queue_name: QueueName,
        worker_id: String,
        reply: Reply<Option<Assignment>>,
    },

    /// Move a leased job to processing.
    Accept {
        queue_name: QueueName,
        job_id: JobId,
        reply: Reply<bool>,
    },

    /// Heartbeat with a progress value.
    Progress {
        queue_name: QueueName,
        job_id: JobId,
        progress: f64,
        reply: Reply<bool>,
    },

    /// Report job completion with its final document.
    Complete { job: Box<Job>, reply: Reply<()> },

    /// A worker announced it is idle. `at` defaults to the current time.
    WorkerIdle {
        queue_name: QueueName,
        worker_id: String,
        at: Option<Millis>,
        reply: Reply<bool>,
    },

    /// List one of a queue's structures.
    List {
        queue_name: QueueName,
        request: ListRequest,
        reply: Reply<QueueListing>,
    },

    /// Reclaim stalled leases across every known queue.
    SweepStalled { reply: Option<Reply<SweepReport>> },

    /// Shutdown the coordinator.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Get the supervised coordinator.
    GetCoordinator {
        reply: RpcReplyPort<ActorRef<CoordinatorMessage>>,
    },

    /// Periodic tick driving the stall sweep.
    Tick,

    /// Shutdown the coordinator and the supervisor.
    Shutdown,
}

/// Error type for coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Timeout")]
    Timeout,
}
