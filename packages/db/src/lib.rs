//! Shared store client for the job queue coordinator.
//!
//! This crate provides the [`JobStore`] contract and two implementations:
//!
//! - [`RedisStore`]: Redis lists, sorted sets and hashes driven by Lua
//!   scripts and `MULTI` pipelines, shared between coordinator instances
//! - [`MemoryStore`]: in-process store with the same key layout and
//!   semantics, used by tests
//!
//! Every state transition is a single atomic step on the store side.

mod connection;
mod keys;
mod memory;
mod record;
mod redis_store;
mod retry;
mod scripts;
mod store;

pub use connection::{StoreConfig, StoreError};
pub use keys::{KeyPrefixes, Keys};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use retry::RetryPolicy;
pub use store::{JobStore, ReclaimOutcome, Reclaimed};
