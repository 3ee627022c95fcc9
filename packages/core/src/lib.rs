//! Core domain types for the job queue coordinator.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobRecord and JobState for work items
//! - QueueName, QueueConfig and listing types for queues
//! - Inbound and outbound protocol messages
//! - Events for real-time updates

mod error;
mod events;
mod job;
mod message;
mod queue;
mod time;

pub use error::ValidationError;
pub use events::JobEvent;
pub use job::{Assignment, Job, JobId, JobRecord, JobState};
pub use message::{
    Action, InboundMessage, JobRef, ListRequestPayload, MessageTemplate, OutboundMessage,
    ProgressReport, QueueRef,
};
pub use queue::{
    ListRequest, QueueConfig, QueueListing, QueueName, ScoreBound, ScoredMember, ScoredSet,
};
pub use time::{Clock, Millis, now_millis, parse_timestamp, to_datetime};
