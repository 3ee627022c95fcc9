//! Message boundary: inbound lines in, coordinator calls and outbound
//! messages out.

use queue_core::{
    Action, Clock, InboundMessage, Job, JobRef, ListRequest, ListRequestPayload, OutboundMessage,
    ProgressReport, QueueConfig, QueueListing, QueueRef, ScoreBound, parse_timestamp,
    to_datetime,
};
use serde::de::DeserializeOwned;

use crate::client::CoordinatorClient;
use crate::messages::CoordinatorError;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Unparseable line or malformed payload; logged and dropped.
    Dropped,
    /// Topic is not a job queue action.
    Ignored,
    /// The operation changed state.
    Applied,
    /// The operation was valid but had nothing to change.
    Unchanged,
    /// A message to publish back to the transport.
    Outbound(OutboundMessage),
    /// A lease request found the queue empty.
    NoJobAvailable,
    /// Result of a listing request.
    Listing(QueueListing),
    /// The coordinator or store failed; logged.
    Failed,
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Routes inbound messages to the coordinator.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: CoordinatorClient,
    topic_prefix: String,
    config: QueueConfig,
    clock: Clock,
}

impl Dispatcher {
    /// Create a dispatcher for topics under `"{namespace}/job_queue/"`.
    pub fn new(client: CoordinatorClient, namespace: &str) -> Self {
        Self {
            client,
            topic_prefix: format!("{namespace}/job_queue/"),
            config: QueueConfig::default(),
            clock: Clock::System,
        }
    }

    /// Set the policy used for default listing windows.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the clock used for outbound timestamps and listing windows.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Parse and dispatch one raw line.
    pub async fn dispatch_line(&self, line: &str) -> DispatchOutcome {
        match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                tracing::error!(line, error = %e, "payload is not valid JSON");
                DispatchOutcome::Dropped
            }
        }
    }

    /// Dispatch one parsed message.
    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        let Some(action) = Action::from_topic(&message.topic, &self.topic_prefix) else {
            tracing::debug!(topic = %message.topic, "Ignoring unrecognised topic");
            return DispatchOutcome::Ignored;
        };

        tracing::debug!(topic = %message.topic, action = %action, "Dispatching message");

        match self.apply(action, &message).await {
            Ok(outcome) => outcome,
            Err(e @ (DispatchError::Payload(_) | DispatchError::Missing(_))) => {
                tracing::error!(
                    topic = %message.topic,
                    payload = %message.payload,
                    error = %e,
                    "Dropping malformed message"
                );
                DispatchOutcome::Dropped
            }
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    action = %action,
                    error = %e,
                    "Failed to handle message"
                );
                DispatchOutcome::Failed
            }
        }
    }

    async fn apply(
        &self,
        action: Action,
        message: &InboundMessage,
    ) -> Result<DispatchOutcome, DispatchError> {
        match action {
            Action::AddJob => {
                let job: Job = payload(message)?;
                self.client.enqueue(job).await?;
                Ok(DispatchOutcome::Applied)
            }

            Action::LeaseJob => {
                let worker_id = service_uuid(message)?;
                let QueueRef { queue_name } = payload(message)?;
                match self.client.lease(queue_name, worker_id).await? {
                    Some(assignment) => Ok(DispatchOutcome::Outbound(
                        OutboundMessage::job_assignment(
                            worker_id,
                            &assignment,
                            to_datetime(self.clock.now()),
                        ),
                    )),
                    None => Ok(DispatchOutcome::NoJobAvailable),
                }
            }

            Action::AcceptJob => {
                let JobRef { uuid, queue_name } = payload(message)?;
                let moved = self.client.accept(queue_name, uuid).await?;
                Ok(changed(moved))
            }

            Action::CompleteJob => {
                let job: Job = payload(message)?;
                self.client.complete(job).await?;
                Ok(DispatchOutcome::Applied)
            }

            Action::WorkerIdle => {
                let worker_id = service_uuid(message)?;
                let QueueRef { queue_name } = payload(message)?;
                let at = message.created_at.as_deref().and_then(parse_timestamp);
                let written = self.client.worker_idle(queue_name, worker_id, at).await?;
                Ok(changed(written))
            }

            Action::WorkerProgress => {
                let ProgressReport {
                    uuid,
                    queue_name,
                    progress,
                } = payload(message)?;
                let held = self.client.progress(queue_name, uuid, progress).await?;
                Ok(changed(held))
            }

            Action::ListJobQueue => self.list(message, action, ListRequest::Queued).await,
            Action::ListLeasedQueue => self.list(message, action, ListRequest::Leased).await,
            Action::ListProcessingQueue => {
                self.list(message, action, ListRequest::Processing).await
            }
            Action::ListProgressQueue => self.list(message, action, ListRequest::Progress).await,

            Action::ListWorkerQueue => {
                let request: ListRequestPayload = payload(message)?;
                let default_from = ScoreBound::At(self.config.idle_cutoff(self.clock.now()) as f64);
                let from = ScoreBound::parse_lower(request.later_than.as_ref(), default_from);
                let to = ScoreBound::parse_upper(request.earlier_than.as_ref());
                self.list(message, action, ListRequest::Idle { from, to })
                    .await
            }
        }
    }

    async fn list(
        &self,
        message: &InboundMessage,
        action: Action,
        request: ListRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let QueueRef { queue_name } = payload(message)?;
        let listing = self.client.list(queue_name.clone(), request).await?;

        tracing::info!(
            queue = %queue_name,
            action = %action,
            count = listing.len(),
            members = ?listing.members(),
            "Queue listing"
        );
        Ok(DispatchOutcome::Listing(listing))
    }
}

fn payload<T: DeserializeOwned>(message: &InboundMessage) -> Result<T, DispatchError> {
    Ok(serde_json::from_value(message.payload.clone())?)
}

fn service_uuid(message: &InboundMessage) -> Result<&str, DispatchError> {
    message
        .service_uuid
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(DispatchError::Missing("service_uuid"))
}

fn changed(applied: bool) -> DispatchOutcome {
    if applied {
        DispatchOutcome::Applied
    } else {
        DispatchOutcome::Unchanged
    }
}
