//! Typed request/reply access to a running coordinator.

use std::time::Duration;

use queue_core::{Assignment, Job, JobId, ListRequest, Millis, QueueListing, QueueName};
use ractor::ActorRef;
use ractor::rpc::CallResult;

use crate::SweepReport;
use crate::messages::{CoordinatorError, CoordinatorMessage, Reply};

/// Handle for calling the coordinator and awaiting its replies.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    actor: ActorRef<CoordinatorMessage>,
    timeout: Duration,
}

impl CoordinatorClient {
    /// Wrap a coordinator reference with the default reply timeout (10s).
    pub fn new(actor: ActorRef<CoordinatorMessage>) -> Self {
        Self {
            actor,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set how long to wait for each reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn actor(&self) -> &ActorRef<CoordinatorMessage> {
        &self.actor
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> CoordinatorMessage,
    ) -> Result<T, CoordinatorError>
    where
        T: Send + 'static,
    {
        match ractor::rpc::call(&self.actor, build, Some(self.timeout)).await {
            Ok(CallResult::Success(result)) => result,
            Ok(CallResult::Timeout) => Err(CoordinatorError::Timeout),
            Ok(CallResult::SenderError) => {
                Err(CoordinatorError::Actor("coordinator dropped the reply".into()))
            }
            Err(e) => Err(CoordinatorError::Actor(e.to_string())),
        }
    }

    pub async fn enqueue(&self, job: Job) -> Result<(), CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Enqueue {
            job: Box::new(job),
            reply,
        })
        .await
    }

    /// Returns `None` when the queue is empty.
    pub async fn lease(
        &self,
        queue_name: QueueName,
        worker_id: impl Into<String>,
    ) -> Result<Option<Assignment>, CoordinatorError> {
        let worker_id = worker_id.into();
        self.call(|reply| CoordinatorMessage::Lease {
            queue_name,
            worker_id,
            reply,
        })
        .await
    }

    pub async fn accept(&self, queue_name: QueueName, job_id: JobId) -> Result<bool, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Accept {
            queue_name,
            job_id,
            reply,
        })
        .await
    }

    pub async fn progress(
        &self,
        queue_name: QueueName,
        job_id: JobId,
        progress: f64,
    ) -> Result<bool, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Progress {
            queue_name,
            job_id,
            progress,
            reply,
        })
        .await
    }

    pub async fn complete(&self, job: Job) -> Result<(), CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Complete {
            job: Box::new(job),
            reply,
        })
        .await
    }

    pub async fn worker_idle(
        &self,
        queue_name: QueueName,
        worker_id: impl Into<String>,
        at: Option<Millis>,
    ) -> Result<bool, CoordinatorError> {
        let worker_id = worker_id.into();
        self.call(|reply| CoordinatorMessage::WorkerIdle {
            queue_name,
            worker_id,
            at,
            reply,
        })
        .await
    }

    pub async fn list(
        &self,
        queue_name: QueueName,
        request: ListRequest,
    ) -> Result<QueueListing, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::List {
            queue_name,
            request,
            reply,
        })
        .await
    }

    /// Run a stall sweep now and wait for its report.
    pub async fn sweep(&self) -> Result<SweepReport, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::SweepStalled { reply: Some(reply) })
            .await
    }
}
