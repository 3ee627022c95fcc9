//! Job domain types for work items in the queue.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::{Millis, QueueName, ValidationError};

/// Unique, opaque identifier for a job.
///
/// Producers usually bring their own id (the `uuid` field on the wire); any
/// non-empty string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an existing id, rejecting empty strings.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::EmptyJobId);
        }
        Ok(Self(id))
    }

    /// Generate a fresh ULID-based id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        JobId::new(raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue's FIFO sequence.
    #[default]
    Queued,
    /// Claimed by a worker, not yet accepted.
    Leased,
    /// Accepted by a worker and reporting progress.
    Processing,
    /// Finished; the final document is persisted.
    Completed,
    /// Exceeded the stall retry limit.
    Failed,
}

impl JobState {
    /// Check if the job will never move again on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Get the stored representation of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Leased => "leased",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "leased" => Ok(JobState::Leased),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job document as producers submit it.
///
/// Only `uuid` and `queue_name` are interpreted; every other field is kept
/// verbatim in `fields` and round-trips through the store untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    #[serde(rename = "uuid")]
    pub id: JobId,
    /// The queue this job belongs to.
    pub queue_name: QueueName,
    /// Remaining document fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Job {
    /// Create a new job with a generated id.
    pub fn new(queue_name: QueueName, fields: Map<String, Value>) -> Self {
        Self {
            id: JobId::generate(),
            queue_name,
            fields,
        }
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Set one document field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The full document as a JSON object, identifiers included.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut document = self.fields.clone();
        document.insert("uuid".into(), Value::String(self.id.to_string()));
        document.insert(
            "queue_name".into(),
            Value::String(self.queue_name.to_string()),
        );
        document
    }
}

/// Persisted record of a job: its latest document plus lifecycle stamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub state: JobState,
    pub queued_at: Millis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leased_at: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_at: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Millis>,
    #[serde(default)]
    pub retry_count: u32,
}

/// A successful claim: the job handed to a worker and when it was leased.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub job: Job,
    pub leased_at: Millis,
    pub queued_at: Millis,
    pub retry_count: u32,
}

impl Assignment {
    /// Job document augmented with the lease stamp, as sent to the worker.
    pub fn document(&self) -> Map<String, Value> {
        let mut document = self.job.to_document();
        document.insert("leased_at".into(), Value::from(self.leased_at));
        document.insert("retry_count".into(), Value::from(self.retry_count));
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_keeps_unknown_fields() {
        let job: Job = serde_json::from_value(json!({
            "uuid": "B81B43B3",
            "queue_name": "test1",
            "priority": "1",
            "command": "ls -l"
        }))
        .unwrap();

        assert_eq!(job.id.as_str(), "B81B43B3");
        assert_eq!(job.queue_name.as_str(), "test1");
        assert_eq!(job.fields.get("command"), Some(&json!("ls -l")));

        let document = job.to_document();
        assert_eq!(document.get("uuid"), Some(&json!("B81B43B3")));
        assert_eq!(document.get("priority"), Some(&json!("1")));
    }

    #[test]
    fn empty_identifiers_are_rejected() {
        let empty_id = serde_json::from_value::<Job>(json!({"uuid": "", "queue_name": "q"}));
        assert!(empty_id.is_err());

        let empty_queue = serde_json::from_value::<Job>(json!({"uuid": "a", "queue_name": ""}));
        assert!(empty_queue.is_err());

        let missing = serde_json::from_value::<Job>(json!({"queue_name": "q"}));
        assert!(missing.is_err());
    }

    #[test]
    fn assignment_document_carries_lease_stamp() {
        let job = Job::new(QueueName::new("render").unwrap(), Map::new())
            .with_id(JobId::new("job-1").unwrap())
            .with_field("frame", 7);
        let assignment = Assignment {
            job,
            leased_at: 1_700_000_000_000,
            queued_at: 1_699_999_999_000,
            retry_count: 2,
        };

        let document = assignment.document();
        assert_eq!(document.get("leased_at"), Some(&json!(1_700_000_000_000_i64)));
        assert_eq!(document.get("retry_count"), Some(&json!(2)));
        assert_eq!(document.get("frame"), Some(&json!(7)));
    }

    #[test]
    fn job_state_round_trips_through_str() {
        for state in [
            JobState::Queued,
            JobState::Leased,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>(), Ok(state));
        }
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Leased.is_terminal());
    }
}
