//! Actor system for the job queue coordinator.
//!
//! This crate provides the Ractor-based actors that drive the job state
//! machine on top of a [`db::JobStore`].
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns the coordinator and drives
//!   the stall sweep on every tick
//! - `CoordinatorActor` - Applies enqueue/lease/accept/progress/complete,
//!   idle announcements and listings, one message at a time
//! - `Dispatcher` - Parses inbound lines and routes them to the coordinator
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Dispatcher, start_coordinator};
//!
//! let handle = start_coordinator(store, QueueConfig::default(), Clock::System).await?;
//! let dispatcher = Dispatcher::new(handle.client(), "acme");
//! let outcome = dispatcher.dispatch_line(line).await;
//! ```

mod client;
mod coordinator;
mod dispatcher;
mod messages;
pub mod stall;
mod supervisor;

pub use client::CoordinatorClient;
pub use coordinator::{CoordinatorActor, CoordinatorArgs};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use messages::{CoordinatorError, CoordinatorMessage, SupervisorMessage};
pub use stall::SweepReport;
pub use supervisor::{CoordinatorHandle, Supervisor, start_coordinator};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
