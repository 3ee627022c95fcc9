//! Protocol messages exchanged with producers and workers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Assignment, JobId, QueueName};

/// Envelope of every inbound line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Namespace-prefixed action topic.
    pub topic: String,
    /// Sender id. Identifies the worker for leases and idle announcements.
    #[serde(default)]
    pub service_uuid: Option<String>,
    /// When the sender created the message (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Recognised actions, after the namespace prefix is stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    AddJob,
    LeaseJob,
    AcceptJob,
    CompleteJob,
    WorkerIdle,
    WorkerProgress,
    ListJobQueue,
    ListLeasedQueue,
    ListProcessingQueue,
    ListProgressQueue,
    ListWorkerQueue,
}

impl Action {
    /// Resolve a topic to an action.
    ///
    /// The prefix is removed when present; topics without it are matched as
    /// they are. Unknown actions return `None`.
    pub fn from_topic(topic: &str, prefix: &str) -> Option<Action> {
        let action = if prefix.is_empty() {
            topic
        } else {
            topic.strip_prefix(prefix).unwrap_or(topic)
        };

        match action {
            "add_job" => Some(Action::AddJob),
            "lease_job" | "request_job" => Some(Action::LeaseJob),
            "accept_job" => Some(Action::AcceptJob),
            "complete_job" => Some(Action::CompleteJob),
            "worker_idle" => Some(Action::WorkerIdle),
            "worker_progress" => Some(Action::WorkerProgress),
            "list_job_queue" => Some(Action::ListJobQueue),
            "list_leased_queue" => Some(Action::ListLeasedQueue),
            "list_processing_queue" => Some(Action::ListProcessingQueue),
            "list_progress_queue" => Some(Action::ListProgressQueue),
            "list_worker_queue" => Some(Action::ListWorkerQueue),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::AddJob => "add_job",
            Action::LeaseJob => "lease_job",
            Action::AcceptJob => "accept_job",
            Action::CompleteJob => "complete_job",
            Action::WorkerIdle => "worker_idle",
            Action::WorkerProgress => "worker_progress",
            Action::ListJobQueue => "list_job_queue",
            Action::ListLeasedQueue => "list_leased_queue",
            Action::ListProcessingQueue => "list_processing_queue",
            Action::ListProgressQueue => "list_progress_queue",
            Action::ListWorkerQueue => "list_worker_queue",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload naming only a queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueRef {
    pub queue_name: QueueName,
}

/// Payload naming a job in a queue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobRef {
    pub uuid: JobId,
    pub queue_name: QueueName,
}

/// Payload of `worker_progress`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressReport {
    pub uuid: JobId,
    pub queue_name: QueueName,
    #[serde(deserialize_with = "progress_value")]
    pub progress: f64,
}

/// Payload of the `list_*_queue` actions.
///
/// Bounds stay raw so absent, `"-inf"`/`"+inf"` and unparseable values can
/// each fall back differently.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListRequestPayload {
    pub queue_name: QueueName,
    #[serde(default)]
    pub later_than: Option<Value>,
    #[serde(default)]
    pub earlier_than: Option<Value>,
}

fn progress_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(number) => number,
        Raw::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("progress is not a number: {text}")))?,
    };

    if !value.is_finite() {
        return Err(serde::de::Error::custom("progress must be finite"));
    }
    Ok(value)
}

/// A message written back to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Value,
    pub created_at: String,
}

impl OutboundMessage {
    /// Build the `job_assignment` notification for a successful claim.
    pub fn job_assignment(
        service_uuid: &str,
        assignment: &Assignment,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: format!("{service_uuid}/job_assignment"),
            payload: Value::Object(assignment.document()),
            created_at: created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Render as a single line, through `template` when one is configured.
    pub fn render(&self, template: Option<&MessageTemplate>) -> Result<String, serde_json::Error> {
        match template {
            Some(template) => template.render(self),
            None => serde_json::to_string(self),
        }
    }
}

/// Outbound line template with `$NAME` / `${NAME}` placeholders.
///
/// Recognised names are `TOPIC`, `PAYLOAD` (compact JSON) and `CREATED_AT`.
/// Unknown placeholders are left as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    template: String,
}

impl MessageTemplate {
    /// Build a template from file contents; lines are trimmed and joined.
    pub fn from_lines(source: &str) -> Self {
        Self {
            template: source.lines().map(str::trim).collect(),
        }
    }

    /// Substitute the message into the template in a single pass.
    pub fn render(&self, message: &OutboundMessage) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_string(&message.payload)?;
        let lookup = |name: &str| match name {
            "TOPIC" => Some(message.topic.as_str()),
            "PAYLOAD" => Some(payload.as_str()),
            "CREATED_AT" => Some(message.created_at.as_str()),
            _ => None,
        };

        let mut rendered = String::with_capacity(self.template.len() + payload.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find('$') {
            rendered.push_str(&rest[..start]);
            let after = &rest[start + 1..];

            let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
                match braced.find('}') {
                    Some(end) => (&braced[..end], end + 2),
                    None => ("", 0),
                }
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            };

            match lookup(name) {
                Some(value) if consumed > 0 => {
                    rendered.push_str(value);
                    rest = &after[consumed..];
                }
                _ => {
                    rendered.push('$');
                    rest = after;
                }
            }
        }
        rendered.push_str(rest);

        Ok(rendered)
    }
}
