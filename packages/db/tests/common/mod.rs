#![allow(dead_code)]

pub mod contract;

use std::future::Future;

use db::{JobStore, KeyPrefixes, MemoryStore, RedisStore, StoreConfig, StoreError};
use queue_core::{Job, JobId, QueueName, ScoredSet};
use redis::AsyncCommands;
use serde_json::{Map, Value};

pub const T0: i64 = 1_700_000_000_000;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Store access the contract tests need beyond [`JobStore`].
pub trait StoreFixture: JobStore + Clone {
    /// Remove a job's record document, leaving its queue entries in place.
    fn drop_document(&self, job_id: &JobId) -> impl Future<Output = ()>;

    /// Overwrite one member's score in a per-queue sorted set.
    fn set_score(
        &self,
        queue: &QueueName,
        set: ScoredSet,
        member: &str,
        score: f64,
    ) -> impl Future<Output = ()>;

    /// Remove everything the test wrote.
    fn teardown(&self) -> impl Future<Output = ()>;
}

impl StoreFixture for MemoryStore {
    async fn drop_document(&self, job_id: &JobId) {
        MemoryStore::drop_document(self, job_id).await;
    }

    async fn set_score(&self, queue: &QueueName, set: ScoredSet, member: &str, score: f64) {
        MemoryStore::set_score(self, queue, set, member, score).await;
    }

    async fn teardown(&self) {}
}

impl StoreFixture for RedisStore {
    async fn drop_document(&self, job_id: &JobId) {
        let key = self.keys().record(job_id.as_str());
        let mut conn = redis_connection().await;
        let _: i64 = conn.hdel(key, "json").await.unwrap();
    }

    async fn set_score(&self, queue: &QueueName, set: ScoredSet, member: &str, score: f64) {
        let key = self.keys().scored(queue, set);
        let mut conn = redis_connection().await;
        let _: i64 = conn.zadd(key, member, score).await.unwrap();
    }

    async fn teardown(&self) {
        let prefixes = self.keys().prefixes();
        let mut conn = redis_connection().await;

        let mut keys = vec![prefixes.registry.clone()];
        for prefix in [
            &prefixes.queued,
            &prefixes.leased,
            &prefixes.processing,
            &prefixes.progress,
            &prefixes.idle,
            &prefixes.record,
        ] {
            let found: Vec<String> = conn.keys(format!("{prefix}*")).await.unwrap();
            keys.extend(found);
        }
        let _: i64 = conn.del(keys).await.unwrap();
    }
}

pub fn setup_store() -> MemoryStore {
    MemoryStore::new()
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Connect to the server at `REDIS_URL` with every key under a fresh prefix,
/// so concurrent tests never see each other's data.
pub async fn setup_redis_store() -> Result<RedisStore, StoreError> {
    let base = format!("test:{}:", JobId::generate());
    let defaults = KeyPrefixes::default();
    let prefixes = KeyPrefixes {
        queued: format!("{base}{}", defaults.queued),
        leased: format!("{base}{}", defaults.leased),
        processing: format!("{base}{}", defaults.processing),
        progress: format!("{base}{}", defaults.progress),
        idle: format!("{base}{}", defaults.idle),
        record: format!("{base}{}", defaults.record),
        registry: format!("{base}{}", defaults.registry),
    };

    RedisStore::connect(StoreConfig::new(redis_url()).with_prefixes(prefixes)).await
}

async fn redis_connection() -> redis::aio::MultiplexedConnection {
    redis::Client::open(redis_url())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

/// Generate one `#[tokio::test]` per contract test, each on a fresh store.
macro_rules! store_contract_tests {
    (@one [$(#[$attr:meta])*] $setup:expr; $name:ident) => {
        #[tokio::test]
        $(#[$attr])*
        async fn $name() -> common::TestResult {
            let store = $setup;
            common::contract::$name(&store).await?;
            common::StoreFixture::teardown(&store).await;
            Ok(())
        }
    };
    (@attrs [$($attrs:tt)*] #[$attr:meta] $($rest:tt)*) => {
        common::store_contract_tests!(@attrs [$($attrs)* #[$attr]] $($rest)*);
    };
    (@attrs $attrs:tt $setup:expr => $($name:ident),* $(,)?) => {
        $(
            common::store_contract_tests!(@one $attrs $setup; $name);
        )*
    };
    ($($rest:tt)*) => {
        common::store_contract_tests!(@attrs [] $($rest)*);
    };
}

pub(crate) use store_contract_tests;

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
