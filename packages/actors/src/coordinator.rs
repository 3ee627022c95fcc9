//! Coordinator actor applying the job state machine.

use std::marker::PhantomData;

use db::{JobStore, ReclaimOutcome, StoreError};
use queue_core::{
    Assignment, Clock, Job, JobEvent, JobId, ListRequest, Millis, QueueConfig, QueueListing,
    QueueName, ScoreBound, ScoredSet, to_datetime,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::messages::{CoordinatorError, CoordinatorMessage};
use crate::stall::{self, SweepReport};

/// Startup arguments for the coordinator.
pub struct CoordinatorArgs<S> {
    /// Shared store.
    pub store: S,
    /// Timing and retry policy.
    pub config: QueueConfig,
    /// Source of "now".
    pub clock: Clock,
    /// Event broadcaster.
    pub event_tx: broadcast::Sender<JobEvent>,
}

impl<S: JobStore> CoordinatorArgs<S> {
    /// Create arguments with default policy, the system clock and a fresh
    /// event channel.
    pub fn new(store: S) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            store,
            config: QueueConfig::default(),
            clock: Clock::System,
            event_tx,
        }
    }

    /// Set the timing and retry policy.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// State for the coordinator actor.
pub struct CoordinatorState<S> {
    store: S,
    config: QueueConfig,
    clock: Clock,
    event_tx: broadcast::Sender<JobEvent>,
}

impl<S: JobStore> CoordinatorState<S> {
    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn enqueue(&self, job: Job) -> Result<(), CoordinatorError> {
        let now = self.clock.now();
        self.store.enqueue(&job, now).await?;

        tracing::info!(queue = %job.queue_name, job_id = %job.id, "Job enqueued");
        self.broadcast(JobEvent::JobEnqueued {
            job_id: job.id,
            queue_name: job.queue_name,
            timestamp: to_datetime(now),
        });
        Ok(())
    }

    async fn lease(
        &self,
        queue: &QueueName,
        worker_id: String,
    ) -> Result<Option<Assignment>, CoordinatorError> {
        let now = self.clock.now();
        let assignment = match self.store.lease_next(queue, now).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => {
                tracing::debug!(queue = %queue, worker_id = %worker_id, "No job available");
                return Ok(None);
            }
            Err(StoreError::CorruptAssignment { job_id }) => {
                tracing::error!(
                    queue = %queue,
                    job_id = %job_id,
                    worker_id = %worker_id,
                    "Leased job has no stored document"
                );
                return Err(StoreError::CorruptAssignment { job_id }.into());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            queue = %queue,
            job_id = %assignment.job.id,
            worker_id = %worker_id,
            retry_count = assignment.retry_count,
            "Job leased"
        );
        self.broadcast(JobEvent::JobLeased {
            job_id: assignment.job.id.clone(),
            queue_name: queue.clone(),
            worker_id,
            timestamp: to_datetime(now),
        });

        self.purge_expired_workers(queue, now).await;
        Ok(Some(assignment))
    }

    /// Failures are logged; they never fail the lease that triggered them.
    async fn purge_expired_workers(&self, queue: &QueueName, now: Millis) {
        match self.store.purge_idle(queue, self.config.idle_cutoff(now)).await {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(queue = %queue, removed, "Expired idle workers purged");
                self.broadcast(JobEvent::WorkersExpired {
                    queue_name: queue.clone(),
                    removed,
                    timestamp: to_datetime(now),
                });
            }
            Err(e) => {
                tracing::warn!(queue = %queue, error = %e, "Failed to purge expired idle workers");
            }
        }
    }

    async fn accept(&self, queue: &QueueName, job_id: JobId) -> Result<bool, CoordinatorError> {
        let now = self.clock.now();
        let moved = self.store.accept(queue, &job_id, now).await?;

        if moved {
            tracing::info!(queue = %queue, job_id = %job_id, "Job processing");
            self.broadcast(JobEvent::JobAccepted {
                job_id,
                queue_name: queue.clone(),
                timestamp: to_datetime(now),
            });
        } else {
            tracing::warn!(queue = %queue, job_id = %job_id, "Accept for a job that is not leased");
        }
        Ok(moved)
    }

    async fn progress(
        &self,
        queue: &QueueName,
        job_id: JobId,
        progress: f64,
    ) -> Result<bool, CoordinatorError> {
        let now = self.clock.now();
        let held = self
            .store
            .report_progress(queue, &job_id, progress, now)
            .await?;

        if held {
            tracing::debug!(queue = %queue, job_id = %job_id, progress, "Job progress");
            self.broadcast(JobEvent::JobProgress {
                job_id,
                queue_name: queue.clone(),
                progress,
                timestamp: to_datetime(now),
            });
        } else {
            tracing::warn!(queue = %queue, job_id = %job_id, "Rejected heartbeat for a job that is not leased");
        }
        Ok(held)
    }

    async fn complete(&self, job: Job) -> Result<(), CoordinatorError> {
        let now = self.clock.now();
        self.store.complete(&job, now).await?;

        tracing::info!(queue = %job.queue_name, job_id = %job.id, "Job completed");
        self.broadcast(JobEvent::JobCompleted {
            job_id: job.id,
            queue_name: job.queue_name,
            timestamp: to_datetime(now),
        });
        Ok(())
    }

    async fn worker_idle(
        &self,
        queue: &QueueName,
        worker_id: String,
        at: Option<Millis>,
    ) -> Result<bool, CoordinatorError> {
        let at = at.unwrap_or_else(|| self.clock.now());
        let written = self.store.record_idle(queue, &worker_id, at).await?;

        if written {
            tracing::debug!(queue = %queue, worker_id = %worker_id, "Worker idle");
            self.broadcast(JobEvent::WorkerIdle {
                worker_id,
                queue_name: queue.clone(),
                timestamp: to_datetime(at),
            });
        } else {
            tracing::debug!(queue = %queue, worker_id = %worker_id, "Ignoring stale idle announcement");
        }
        Ok(written)
    }

    async fn list(
        &self,
        queue: &QueueName,
        request: ListRequest,
    ) -> Result<QueueListing, CoordinatorError> {
        let all = (ScoreBound::NegInfinity, ScoreBound::PosInfinity);
        let (set, (from, to)) = match request {
            ListRequest::Queued => {
                return Ok(QueueListing::Jobs(self.store.list_queued(queue).await?));
            }
            ListRequest::Leased => (ScoredSet::Leased, all),
            ListRequest::Processing => (ScoredSet::Processing, all),
            ListRequest::Progress => (ScoredSet::Progress, all),
            ListRequest::Idle { from, to } => (ScoredSet::Idle, (from, to)),
        };

        let members = self.store.list_scored(queue, set, from, to).await?;
        Ok(QueueListing::Scored(members))
    }

    async fn sweep(&self) -> Result<SweepReport, CoordinatorError> {
        let now = self.clock.now();
        let report = stall::sweep_all(&self.store, &self.config, now).await?;

        for (queue, entry) in &report.reclaimed {
            let event = match entry.outcome {
                ReclaimOutcome::Requeued => JobEvent::JobRequeued {
                    job_id: entry.job_id.clone(),
                    queue_name: queue.clone(),
                    retry_count: entry.retry_count,
                    timestamp: to_datetime(now),
                },
                ReclaimOutcome::Failed => JobEvent::JobFailed {
                    job_id: entry.job_id.clone(),
                    queue_name: queue.clone(),
                    retry_count: entry.retry_count,
                    timestamp: to_datetime(now),
                },
                ReclaimOutcome::Orphaned => continue,
            };
            self.broadcast(event);
        }

        Ok(report)
    }
}

/// Coordinator actor.
///
/// The mailbox serialises every operation of this process; cross-process
/// atomicity comes from the store.
pub struct CoordinatorActor<S>(PhantomData<fn() -> S>);

impl<S> CoordinatorActor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for CoordinatorActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for CoordinatorActor<S> {
    type Msg = CoordinatorMessage;
    type State = CoordinatorState<S>;
    type Arguments = CoordinatorArgs<S>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting coordinator (tick {}ms, max lease {}ms)",
            args.config.tick_interval_ms,
            args.config.max_lease_ms()
        );
        Ok(CoordinatorState {
            store: args.store,
            config: args.config,
            clock: args.clock,
            event_tx: args.event_tx,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMessage::Enqueue { job, reply } => {
                let _ = reply.send(state.enqueue(*job).await);
            }

            CoordinatorMessage::Lease {
                queue_name,
                worker_id,
                reply,
            } => {
                let _ = reply.send(state.lease(&queue_name, worker_id).await);
            }

            CoordinatorMessage::Accept {
                queue_name,
                job_id,
                reply,
            } => {
                let _ = reply.send(state.accept(&queue_name, job_id).await);
            }

            CoordinatorMessage::Progress {
                queue_name,
                job_id,
                progress,
                reply,
            } => {
                let _ = reply.send(state.progress(&queue_name, job_id, progress).await);
            }

            CoordinatorMessage::Complete { job, reply } => {
                let _ = reply.send(state.complete(*job).await);
            }

            CoordinatorMessage::WorkerIdle {
                queue_name,
                worker_id,
                at,
                reply,
            } => {
                let _ = reply.send(state.worker_idle(&queue_name, worker_id, at).await);
            }

            CoordinatorMessage::List {
                queue_name,
                request,
                reply,
            } => {
                let _ = reply.send(state.list(&queue_name, request).await);
            }

            CoordinatorMessage::SweepStalled { reply } => {
                let result = state.sweep().await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::error!("Stall sweep failed: {}", e);
                        }
                    }
                }
            }

            CoordinatorMessage::Shutdown => {
                tracing::info!("Shutting down coordinator");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
