//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, QueueName};

/// Events emitted by the coordinator as jobs and workers change state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A job was appended to its queue.
    JobEnqueued {
        job_id: JobId,
        queue_name: QueueName,
        timestamp: DateTime<Utc>,
    },
    /// A job was claimed by a worker.
    JobLeased {
        job_id: JobId,
        queue_name: QueueName,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker accepted its leased job.
    JobAccepted {
        job_id: JobId,
        queue_name: QueueName,
        timestamp: DateTime<Utc>,
    },
    /// A worker reported progress.
    JobProgress {
        job_id: JobId,
        queue_name: QueueName,
        progress: f64,
        timestamp: DateTime<Utc>,
    },
    /// A job completed.
    JobCompleted {
        job_id: JobId,
        queue_name: QueueName,
        timestamp: DateTime<Utc>,
    },
    /// A stalled job went back to the queue.
    JobRequeued {
        job_id: String,
        queue_name: QueueName,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// A stalled job ran out of retries.
    JobFailed {
        job_id: String,
        queue_name: QueueName,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker announced it is idle.
    WorkerIdle {
        worker_id: String,
        queue_name: QueueName,
        timestamp: DateTime<Utc>,
    },
    /// Expired idle workers were purged.
    WorkersExpired {
        queue_name: QueueName,
        removed: u64,
        timestamp: DateTime<Utc>,
    },
}
