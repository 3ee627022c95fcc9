#![allow(dead_code)]

use std::time::Duration;

use actors::{CoordinatorHandle, start_coordinator};
use db::MemoryStore;
use queue_core::{Clock, Job, JobEvent, JobId, QueueConfig, QueueName};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

pub const T0: i64 = 1_700_000_000_000;

pub struct TestCoordinator {
    pub store: MemoryStore,
    pub clock: Clock,
    pub handle: CoordinatorHandle,
}

/// Start a coordinator over a fresh in-memory store with a manual clock at
/// `T0`.
pub async fn setup(config: QueueConfig) -> TestCoordinator {
    setup_with_store(MemoryStore::new(), config).await
}

pub async fn setup_with_store(store: MemoryStore, config: QueueConfig) -> TestCoordinator {
    let clock = Clock::manual(T0);
    let handle = start_coordinator(store.clone(), config, clock.clone())
        .await
        .expect("coordinator should start");
    TestCoordinator {
        store,
        clock,
        handle,
    }
}

/// Config whose sweeps never fire on their own during a test.
pub fn quiet_config() -> QueueConfig {
    QueueConfig::default().with_tick_interval_ms(60_000)
}

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name).unwrap()
}

pub fn job_id(id: &str) -> JobId {
    JobId::new(id).unwrap()
}

pub fn job(queue_name: &str, id: &str) -> Job {
    Job::new(queue(queue_name), Map::new())
        .with_id(job_id(id))
        .with_field("command", Value::String(format!("run {id}")))
}

/// Next event matching `pred`, or `None` after `wait`.
pub async fn next_event<F>(
    rx: &mut broadcast::Receiver<JobEvent>,
    wait: Duration,
    mut pred: F,
) -> Option<JobEvent>
where
    F: FnMut(&JobEvent) -> bool,
{
    tokio::time::timeout(wait, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
