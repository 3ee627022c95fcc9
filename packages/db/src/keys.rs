//! Store key layout.

use queue_core::{QueueName, ScoredSet};

/// Key prefixes for every per-queue structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefixes {
    pub queued: String,
    pub leased: String,
    pub processing: String,
    pub progress: String,
    pub idle: String,
    pub record: String,
    /// Full key of the set of queues visited by the stall sweep.
    pub registry: String,
}

impl Default for KeyPrefixes {
    fn default() -> Self {
        Self {
            queued: "job_queue:".to_string(),
            leased: "leased_queue:".to_string(),
            processing: "processing_queue:".to_string(),
            progress: "progress_queue:".to_string(),
            idle: "idle_queue:".to_string(),
            record: "job:".to_string(),
            registry: "job_queues".to_string(),
        }
    }
}

/// Resolves queue names and job ids to store keys.
#[derive(Debug, Clone, Default)]
pub struct Keys {
    prefixes: KeyPrefixes,
}

impl Keys {
    pub fn new(prefixes: KeyPrefixes) -> Self {
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &KeyPrefixes {
        &self.prefixes
    }

    pub fn queued(&self, queue: &QueueName) -> String {
        format!("{}{}", self.prefixes.queued, queue)
    }

    pub fn leased(&self, queue: &QueueName) -> String {
        format!("{}{}", self.prefixes.leased, queue)
    }

    pub fn processing(&self, queue: &QueueName) -> String {
        format!("{}{}", self.prefixes.processing, queue)
    }

    pub fn progress(&self, queue: &QueueName) -> String {
        format!("{}{}", self.prefixes.progress, queue)
    }

    pub fn idle(&self, queue: &QueueName) -> String {
        format!("{}{}", self.prefixes.idle, queue)
    }

    /// Key of a sorted set by kind.
    pub fn scored(&self, queue: &QueueName, set: ScoredSet) -> String {
        match set {
            ScoredSet::Leased => self.leased(queue),
            ScoredSet::Processing => self.processing(queue),
            ScoredSet::Progress => self.progress(queue),
            ScoredSet::Idle => self.idle(queue),
        }
    }

    /// Key of a job's record hash.
    pub fn record(&self, job_id: &str) -> String {
        format!("{}{}", self.prefixes.record, job_id)
    }

    pub fn registry(&self) -> &str {
        &self.prefixes.registry
    }
}
