//! In-memory store for tests and single-process use.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use queue_core::{
    Assignment, Job, JobId, JobRecord, JobState, Millis, QueueName, ScoreBound, ScoredMember,
    ScoredSet,
};
use tokio::sync::Mutex;

use crate::record::{self, complete_fields, enqueue_fields, parse_count, parse_millis};
use crate::{JobStore, KeyPrefixes, Keys, ReclaimOutcome, Reclaimed, StoreError};

/// Lists, sorted sets, hashes and sets keyed the same way as in Redis.
#[derive(Debug, Default)]
struct Keyspace {
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Keyspace {
    fn rpush(&mut self, key: &str, value: &str) {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
    }

    fn lpop(&mut self, key: &str) -> Option<String> {
        self.lists.get_mut(key).and_then(VecDeque::pop_front)
    }

    fn lrem(&mut self, key: &str, value: &str) {
        if let Some(list) = self.lists.get_mut(key) {
            list.retain(|entry| entry != value);
        }
    }

    fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.zsets.get(key).and_then(|set| set.get(member).copied())
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        self.zsets
            .get_mut(key)
            .is_some_and(|set| set.remove(member).is_some())
    }

    /// Members within inclusive bounds, ordered by score then member.
    fn zrange(&self, key: &str, from: ScoreBound, to: ScoreBound) -> Vec<ScoredMember> {
        let mut members: Vec<ScoredMember> = self
            .zsets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| from.admits_from(**score) && to.admits_to(**score))
                    .map(|(member, score)| ScoredMember::new(member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();

        members.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.member.cmp(&b.member))
        });
        members
    }

    fn hget(&self, key: &str, field: &str) -> Option<&String> {
        self.hashes.get(key).and_then(|hash| hash.get(field))
    }

    fn hset(&mut self, key: &str, field: &str, value: impl Into<String>) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
    }

    fn hdel(&mut self, key: &str, field: &str) {
        if let Some(hash) = self.hashes.get_mut(key) {
            hash.remove(field);
        }
    }
}

/// In-memory job store.
///
/// Every operation runs under one lock, which gives the same atomicity as
/// the Redis scripts. Cloning creates a new handle to the **same** data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    keys: Keys,
    data: Arc<Mutex<Keyspace>>,
}

impl MemoryStore {
    /// Create an empty store with the default key layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with custom key prefixes.
    pub fn with_prefixes(prefixes: KeyPrefixes) -> Self {
        Self {
            keys: Keys::new(prefixes),
            data: Arc::default(),
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Overwrite a score directly. Tests use this to age heartbeats.
    pub async fn set_score(&self, queue: &QueueName, set: ScoredSet, member: &str, score: f64) {
        let key = self.keys.scored(queue, set);
        self.data.lock().await.zadd(&key, member, score);
    }

    /// Remove a job's record document, leaving its queue entries in place.
    pub async fn drop_document(&self, job_id: &JobId) {
        let key = self.keys.record(job_id.as_str());
        self.data.lock().await.hdel(&key, record::JSON);
    }
}

impl JobStore for MemoryStore {
    async fn enqueue(&self, job: &Job, now: Millis) -> Result<(), StoreError> {
        let fields = enqueue_fields(job, now)?;
        let record = self.keys.record(job.id.as_str());
        let mut data = self.data.lock().await;

        data.hashes.remove(&record);
        for (field, value) in fields {
            data.hset(&record, field, value);
        }
        data.rpush(&self.keys.queued(&job.queue_name), job.id.as_str());
        data.sets
            .entry(self.keys.registry().to_string())
            .or_default()
            .insert(job.queue_name.to_string());

        tracing::debug!(queue = %job.queue_name, job_id = %job.id, "Job enqueued");
        Ok(())
    }

    async fn lease_next(&self, queue: &QueueName, now: Millis) -> Result<Option<Assignment>, StoreError> {
        let mut data = self.data.lock().await;

        let Some(job_id) = data.lpop(&self.keys.queued(queue)) else {
            return Ok(None);
        };
        let record = self.keys.record(&job_id);
        let Some(json) = data.hget(&record, record::JSON).cloned() else {
            return Err(StoreError::CorruptAssignment { job_id });
        };

        data.zadd(&self.keys.leased(queue), &job_id, now as f64);
        data.hset(&record, record::STATE, JobState::Leased.as_str());
        data.hset(&record, record::LEASED_AT, now.to_string());

        let job = record::decode_job(&json).map_err(|_| StoreError::CorruptAssignment {
            job_id: job_id.clone(),
        })?;
        let retry_count = parse_count(data.hget(&record, record::RETRY_COUNT).map(String::as_str))?;
        let queued_at = match data.hget(&record, record::QUEUED_AT) {
            Some(raw) => parse_millis(raw)?,
            None => now,
        };

        Ok(Some(Assignment {
            job,
            leased_at: now,
            queued_at,
            retry_count,
        }))
    }

    async fn accept(&self, queue: &QueueName, job_id: &JobId, now: Millis) -> Result<bool, StoreError> {
        let id = job_id.as_str();
        let mut data = self.data.lock().await;

        if !data.zrem(&self.keys.leased(queue), id) {
            return Ok(false);
        }
        data.zadd(&self.keys.processing(queue), id, now as f64);
        data.zadd(&self.keys.progress(queue), id, 0.0);

        let record = self.keys.record(id);
        data.hset(&record, record::STATE, JobState::Processing.as_str());
        data.hset(&record, record::PROCESSING_AT, now.to_string());

        Ok(true)
    }

    async fn report_progress(
        &self,
        queue: &QueueName,
        job_id: &JobId,
        progress: f64,
        now: Millis,
    ) -> Result<bool, StoreError> {
        let id = job_id.as_str();
        let processing = self.keys.processing(queue);
        let leased = self.keys.leased(queue);
        let mut data = self.data.lock().await;

        let held = if data.zscore(&processing, id).is_some() {
            processing
        } else if data.zscore(&leased, id).is_some() {
            leased
        } else {
            return Ok(false);
        };

        data.zadd(&held, id, now as f64);
        data.zadd(&self.keys.progress(queue), id, progress);
        Ok(true)
    }

    async fn complete(&self, job: &Job, now: Millis) -> Result<(), StoreError> {
        let fields = complete_fields(job, now)?;
        let queue = &job.queue_name;
        let id = job.id.as_str();
        let record = self.keys.record(id);
        let mut data = self.data.lock().await;

        data.lrem(&self.keys.queued(queue), id);
        data.zrem(&self.keys.leased(queue), id);
        data.zrem(&self.keys.processing(queue), id);
        data.zrem(&self.keys.progress(queue), id);
        for (field, value) in fields {
            data.hset(&record, field, value);
        }

        Ok(())
    }

    async fn reclaim_stalled(
        &self,
        queue: &QueueName,
        cutoff: Millis,
        max_retries: Option<u32>,
        now: Millis,
    ) -> Result<Vec<Reclaimed>, StoreError> {
        let queued = self.keys.queued(queue);
        let leased = self.keys.leased(queue);
        let processing = self.keys.processing(queue);
        let progress = self.keys.progress(queue);
        let mut data = self.data.lock().await;
        let mut reclaimed = Vec::new();

        for (from, other) in [(&leased, &processing), (&processing, &leased)] {
            let stalled: Vec<String> = data
                .zrange(from, ScoreBound::NegInfinity, ScoreBound::PosInfinity)
                .into_iter()
                .filter(|member| member.score < cutoff as f64)
                .map(|member| member.member)
                .collect();

            for job_id in stalled {
                if !data.zrem(from, &job_id) {
                    continue;
                }
                data.zrem(other, &job_id);
                data.zrem(&progress, &job_id);

                let record = self.keys.record(&job_id);
                if data.hget(&record, record::JSON).is_none() {
                    reclaimed.push(Reclaimed {
                        job_id,
                        outcome: ReclaimOutcome::Orphaned,
                        retry_count: 0,
                    });
                    continue;
                }

                let retry_count =
                    parse_count(data.hget(&record, record::RETRY_COUNT).map(String::as_str))?
                        .saturating_add(1);
                data.hset(&record, record::RETRY_COUNT, retry_count.to_string());
                data.hdel(&record, record::LEASED_AT);
                data.hdel(&record, record::PROCESSING_AT);

                let outcome = if max_retries.is_some_and(|limit| retry_count > limit) {
                    data.hset(&record, record::STATE, JobState::Failed.as_str());
                    data.hset(&record, record::FAILED_AT, now.to_string());
                    ReclaimOutcome::Failed
                } else {
                    data.hset(&record, record::STATE, JobState::Queued.as_str());
                    data.rpush(&queued, &job_id);
                    ReclaimOutcome::Requeued
                };

                reclaimed.push(Reclaimed {
                    job_id,
                    outcome,
                    retry_count,
                });
            }
        }

        Ok(reclaimed)
    }

    async fn record_idle(&self, queue: &QueueName, worker_id: &str, at: Millis) -> Result<bool, StoreError> {
        let idle = self.keys.idle(queue);
        let mut data = self.data.lock().await;

        if data
            .zscore(&idle, worker_id)
            .is_some_and(|current| current > at as f64)
        {
            return Ok(false);
        }
        data.zadd(&idle, worker_id, at as f64);
        Ok(true)
    }

    async fn purge_idle(&self, queue: &QueueName, cutoff: Millis) -> Result<u64, StoreError> {
        let idle = self.keys.idle(queue);
        let mut data = self.data.lock().await;

        let Some(set) = data.zsets.get_mut(&idle) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|_, score| *score > cutoff as f64);
        Ok((before - set.len()) as u64)
    }

    async fn list_queued(&self, queue: &QueueName) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .lists
            .get(&self.keys.queued(queue))
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_scored(
        &self,
        queue: &QueueName,
        set: ScoredSet,
        from: ScoreBound,
        to: ScoreBound,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let data = self.data.lock().await;
        Ok(data.zrange(&self.keys.scored(queue, set), from, to))
    }

    async fn queues(&self) -> Result<Vec<QueueName>, StoreError> {
        let data = self.data.lock().await;
        let Some(names) = data.sets.get(self.keys.registry()) else {
            return Ok(Vec::new());
        };

        Ok(names
            .iter()
            .filter_map(|name| QueueName::new(name.as_str()).ok())
            .collect())
    }

    async fn prune_queue(&self, queue: &QueueName) -> Result<bool, StoreError> {
        let mut data = self.data.lock().await;
        let queued = data
            .lists
            .get(&self.keys.queued(queue))
            .is_some_and(|list| !list.is_empty());
        let held = [self.keys.leased(queue), self.keys.processing(queue)]
            .iter()
            .any(|key| data.zsets.get(key).is_some_and(|set| !set.is_empty()));
        if queued || held {
            return Ok(false);
        }

        Ok(data
            .sets
            .get_mut(self.keys.registry())
            .is_some_and(|names| names.remove(queue.as_str())))
    }

    async fn get_record(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let data = self.data.lock().await;
        match data.hashes.get(&self.keys.record(job_id.as_str())) {
            Some(fields) => record::parse_record(fields),
            None => Ok(None),
        }
    }
}
