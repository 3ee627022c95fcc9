//! Redis-backed [`JobStore`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use queue_core::{
    Assignment, Job, JobId, JobRecord, Millis, QueueName, ScoreBound, ScoredMember, ScoredSet,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::record::{self, complete_fields, enqueue_fields, parse_count, parse_millis};
use crate::{JobStore, Keys, ReclaimOutcome, Reclaimed, RetryPolicy, StoreConfig, StoreError, scripts};

struct Scripts {
    lease_next: Script,
    accept: Script,
    report_progress: Script,
    record_idle: Script,
    reclaim_stalled: Script,
    prune_queue: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            lease_next: Script::new(scripts::LEASE_NEXT),
            accept: Script::new(scripts::ACCEPT),
            report_progress: Script::new(scripts::REPORT_PROGRESS),
            record_idle: Script::new(scripts::RECORD_IDLE),
            reclaim_stalled: Script::new(scripts::RECLAIM_STALLED),
            prune_queue: Script::new(scripts::PRUNE_QUEUE),
        }
    }
}

/// Job store shared through Redis.
///
/// Cloning is cheap and every clone shares the same reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: Keys,
    retry: RetryPolicy,
    scripts: Arc<Scripts>,
}

impl RedisStore {
    /// Open a managed connection to the configured server.
    pub async fn connect(config: StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())?;
        let addr = client.get_connection_info().addr.to_string();
        tracing::info!("Connecting to store: {}", addr);

        let conn = tokio::time::timeout(config.retry.op_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout { op: "connect" })??;

        tracing::info!("Connected to store: {}", addr);

        Ok(Self {
            conn,
            keys: Keys::new(config.prefixes),
            retry: config.retry,
            scripts: Arc::new(Scripts::load()),
        })
    }

    /// Release the connection.
    pub async fn close(self) {
        tracing::info!("Closing store connection");
        drop(self.conn);
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    async fn call<T, F, Fut>(&self, op: &'static str, idempotent: bool, f: F) -> Result<T, StoreError>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        self.retry
            .run(op, idempotent, || {
                let attempt = f(self.conn.clone());
                async move { attempt.await.map_err(StoreError::from) }
            })
            .await
    }
}

impl JobStore for RedisStore {
    async fn enqueue(&self, job: &Job, now: Millis) -> Result<(), StoreError> {
        let fields = enqueue_fields(job, now)?;
        let record = self.keys.record(job.id.as_str());
        let queued = self.keys.queued(&job.queue_name);
        let (fields, record, queued) = (&fields, record.as_str(), queued.as_str());
        let registry = self.keys.registry();
        let (id, queue_name) = (job.id.as_str(), job.queue_name.as_str());

        self.call("enqueue", false, |mut conn| async move {
            let mut pipe = redis::pipe();
            pipe.atomic()
                .del(record)
                .ignore()
                .hset_multiple(record, fields.as_slice())
                .ignore()
                .rpush(queued, id)
                .ignore()
                .sadd(registry, queue_name)
                .ignore();
            pipe.query_async::<_, ()>(&mut conn).await
        })
        .await?;

        tracing::debug!(queue = queue_name, job_id = id, "Job enqueued");
        Ok(())
    }

    async fn lease_next(&self, queue: &QueueName, now: Millis) -> Result<Option<Assignment>, StoreError> {
        let queued = self.keys.queued(queue);
        let leased = self.keys.leased(queue);
        let (queued, leased) = (queued.as_str(), leased.as_str());
        let prefix = self.keys.prefixes().record.as_str();
        let script = &self.scripts.lease_next;

        let reply: Vec<String> = self
            .call("lease_next", false, |mut conn| async move {
                let mut invocation = script.prepare_invoke();
                invocation.key(queued).key(leased).arg(now).arg(prefix);
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        match reply.as_slice() {
            [tag] if tag == "empty" => Ok(None),
            [tag, job_id] if tag == "corrupt" => Err(StoreError::CorruptAssignment {
                job_id: job_id.clone(),
            }),
            [tag, job_id, json, retries, queued_at] if tag == "leased" => {
                let job = record::decode_job(json).map_err(|_| StoreError::CorruptAssignment {
                    job_id: job_id.clone(),
                })?;
                Ok(Some(Assignment {
                    job,
                    leased_at: now,
                    queued_at: parse_millis(queued_at)?,
                    retry_count: parse_count(Some(retries))?,
                }))
            }
            other => Err(StoreError::UnexpectedReply(format!("lease_next: {other:?}"))),
        }
    }

    async fn accept(&self, queue: &QueueName, job_id: &JobId, now: Millis) -> Result<bool, StoreError> {
        let keys = [
            self.keys.leased(queue),
            self.keys.processing(queue),
            self.keys.progress(queue),
            self.keys.record(job_id.as_str()),
        ];
        let keys = &keys;
        let id = job_id.as_str();
        let script = &self.scripts.accept;

        let moved: i64 = self
            .call("accept", true, |mut conn| async move {
                let mut invocation = script.prepare_invoke();
                for key in keys {
                    invocation.key(key);
                }
                invocation.arg(id).arg(now);
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        Ok(moved == 1)
    }

    async fn report_progress(
        &self,
        queue: &QueueName,
        job_id: &JobId,
        progress: f64,
        now: Millis,
    ) -> Result<bool, StoreError> {
        let keys = [
            self.keys.leased(queue),
            self.keys.processing(queue),
            self.keys.progress(queue),
        ];
        let keys = &keys;
        let id = job_id.as_str();
        let script = &self.scripts.report_progress;

        let held: i64 = self
            .call("report_progress", true, |mut conn| async move {
                let mut invocation = script.prepare_invoke();
                for key in keys {
                    invocation.key(key);
                }
                invocation.arg(id).arg(now).arg(progress);
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        Ok(held == 1)
    }

    async fn complete(&self, job: &Job, now: Millis) -> Result<(), StoreError> {
        let fields = complete_fields(job, now)?;
        let queue = &job.queue_name;
        let keys = [
            self.keys.queued(queue),
            self.keys.leased(queue),
            self.keys.processing(queue),
            self.keys.progress(queue),
            self.keys.record(job.id.as_str()),
        ];
        let [queued, leased, processing, progress, record] = &keys;
        let fields = &fields;
        let id = job.id.as_str();

        self.call("complete", true, |mut conn| async move {
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(queued, 0, id)
                .ignore()
                .zrem(leased, id)
                .ignore()
                .zrem(processing, id)
                .ignore()
                .zrem(progress, id)
                .ignore()
                .hset_multiple(record, fields.as_slice())
                .ignore();
            pipe.query_async(&mut conn).await
        })
        .await
    }

    async fn reclaim_stalled(
        &self,
        queue: &QueueName,
        cutoff: Millis,
        max_retries: Option<u32>,
        now: Millis,
    ) -> Result<Vec<Reclaimed>, StoreError> {
        let keys = [
            self.keys.queued(queue),
            self.keys.leased(queue),
            self.keys.processing(queue),
            self.keys.progress(queue),
        ];
        let keys = &keys;
        let limit = max_retries.map(i64::from).unwrap_or(-1);
        let prefix = self.keys.prefixes().record.as_str();
        let script = &self.scripts.reclaim_stalled;

        let reply: Vec<String> = self
            .call("reclaim_stalled", true, |mut conn| async move {
                let mut invocation = script.prepare_invoke();
                for key in keys {
                    invocation.key(key);
                }
                invocation.arg(cutoff).arg(limit).arg(now).arg(prefix);
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        if reply.len() % 3 != 0 {
            return Err(StoreError::UnexpectedReply(format!(
                "reclaim_stalled: {} values",
                reply.len()
            )));
        }

        reply
            .chunks_exact(3)
            .map(|entry| {
                Ok(Reclaimed {
                    job_id: entry[0].clone(),
                    outcome: entry[1].parse::<ReclaimOutcome>()?,
                    retry_count: parse_count(Some(&entry[2]))?,
                })
            })
            .collect()
    }

    async fn record_idle(&self, queue: &QueueName, worker_id: &str, at: Millis) -> Result<bool, StoreError> {
        let idle = self.keys.idle(queue);
        let idle = idle.as_str();
        let script = &self.scripts.record_idle;

        let written: i64 = self
            .call("record_idle", true, |mut conn| async move {
                let mut invocation = script.prepare_invoke();
                invocation.key(idle).arg(worker_id).arg(at);
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        Ok(written == 1)
    }

    async fn purge_idle(&self, queue: &QueueName, cutoff: Millis) -> Result<u64, StoreError> {
        let idle = self.keys.idle(queue);
        let idle = idle.as_str();

        self.call("purge_idle", true, |mut conn| async move {
            conn.zrembyscore(idle, "-inf", cutoff).await
        })
        .await
    }

    async fn list_queued(&self, queue: &QueueName) -> Result<Vec<String>, StoreError> {
        let queued = self.keys.queued(queue);
        let queued = queued.as_str();

        self.call("list_queued", true, |mut conn| async move {
            conn.lrange(queued, 0, -1).await
        })
        .await
    }

    async fn list_scored(
        &self,
        queue: &QueueName,
        set: ScoredSet,
        from: ScoreBound,
        to: ScoreBound,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let key = self.keys.scored(queue, set);
        let (min, max) = (from.to_arg(), to.to_arg());
        let (key, min, max) = (key.as_str(), min.as_str(), max.as_str());

        let members: Vec<(String, f64)> = self
            .call("list_scored", true, |mut conn| async move {
                conn.zrangebyscore_withscores(key, min, max).await
            })
            .await?;

        Ok(members
            .into_iter()
            .map(|(member, score)| ScoredMember::new(member, score))
            .collect())
    }

    async fn queues(&self) -> Result<Vec<QueueName>, StoreError> {
        let registry = self.keys.registry();

        let mut names: Vec<String> = self
            .call("queues", true, |mut conn| async move {
                conn.smembers(registry).await
            })
            .await?;
        names.sort();

        Ok(names
            .into_iter()
            .filter_map(|name| match QueueName::new(name) {
                Ok(name) => Some(name),
                Err(e) => {
                    tracing::warn!("Skipping registry entry: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn prune_queue(&self, queue: &QueueName) -> Result<bool, StoreError> {
        let keys = [
            self.keys.queued(queue),
            self.keys.leased(queue),
            self.keys.processing(queue),
        ];
        let keys = &keys;
        let registry = self.keys.registry();
        let name = queue.as_str();
        let script = &self.scripts.prune_queue;

        let removed: i64 = self
            .call("prune_queue", true, |mut conn| async move {
                let mut invocation = script.prepare_invoke();
                for key in keys {
                    invocation.key(key);
                }
                invocation.key(registry).arg(name);
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        if removed == 1 {
            tracing::debug!(queue = name, "Queue unregistered");
        }
        Ok(removed == 1)
    }

    async fn get_record(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let key = self.keys.record(job_id.as_str());
        let key = key.as_str();

        let fields: HashMap<String, String> = self
            .call("get_record", true, |mut conn| async move { conn.hgetall(key).await })
            .await?;

        record::parse_record(&fields)
    }
}
